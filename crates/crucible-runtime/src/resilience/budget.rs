//! Spend ledger with a hard daily ceiling.
//!
//! A call may only be dispatched after a successful reservation against
//! the remaining ceiling; the measured cost is committed after the call
//! completes. Rejection happens before dispatch, never by refund after,
//! so cumulative spend cannot exceed the ceiling.

use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Budget configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Hard ceiling on spend per accounting day, in USD
    pub daily_ceiling_usd: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_ceiling_usd: 10.0,
        }
    }
}

#[derive(Debug)]
struct LedgerInner {
    spent: f64,
    reserved: f64,
    day: NaiveDate,
}

/// Process-wide running-cost ledger.
///
/// All mutation happens under one mutex, so a reservation and the
/// ceiling check it depends on are a single atomic step; concurrent
/// callers cannot jointly overshoot the ceiling.
pub struct BudgetLedger {
    ceiling: f64,
    inner: Mutex<LedgerInner>,
}

impl BudgetLedger {
    /// Create a ledger with the given daily ceiling in USD.
    pub fn new(ceiling: f64) -> Self {
        Self {
            ceiling,
            inner: Mutex::new(LedgerInner {
                spent: 0.0,
                reserved: 0.0,
                day: today(),
            }),
        }
    }

    /// Reserve headroom for an estimated call cost.
    ///
    /// Returns false, mutating nothing, if the estimate does not fit in
    /// the remaining ceiling. Rolls the accounting day first: a new day
    /// zeroes spend but keeps outstanding reservations, so calls that
    /// started before the reset are not penalized.
    pub fn reserve(&self, estimated: f64) -> bool {
        let mut inner = self.inner.lock();
        roll_day(&mut inner, today());

        if inner.spent + inner.reserved + estimated > self.ceiling {
            return false;
        }
        inner.reserved += estimated;
        true
    }

    /// Commit the measured cost of a completed call, releasing its
    /// reservation.
    pub fn commit(&self, estimated: f64, actual: f64) {
        let mut inner = self.inner.lock();
        inner.reserved = (inner.reserved - estimated).max(0.0);
        inner.spent += actual;
    }

    /// Release a reservation for a call that failed before incurring
    /// cost.
    pub fn release(&self, estimated: f64) {
        let mut inner = self.inner.lock();
        inner.reserved = (inner.reserved - estimated).max(0.0);
    }

    /// Remaining headroom under the ceiling.
    pub fn remaining(&self) -> f64 {
        let mut inner = self.inner.lock();
        roll_day(&mut inner, today());
        (self.ceiling - inner.spent - inner.reserved).max(0.0)
    }

    /// Committed spend for the current accounting day.
    pub fn spent(&self) -> f64 {
        self.inner.lock().spent
    }

    /// The configured ceiling.
    pub fn ceiling(&self) -> f64 {
        self.ceiling
    }

    #[cfg(test)]
    fn backdate(&self, day: NaiveDate) {
        self.inner.lock().day = day;
    }
}

impl std::fmt::Debug for BudgetLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BudgetLedger")
            .field("ceiling", &self.ceiling)
            .field("spent", &inner.spent)
            .field("reserved", &inner.reserved)
            .field("day", &inner.day)
            .finish()
    }
}

fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

fn roll_day(inner: &mut LedgerInner, today: NaiveDate) {
    if inner.day != today {
        tracing::info!(
            previous_day = %inner.day,
            spent = inner.spent,
            "Budget ledger rolled to new accounting day"
        );
        inner.spent = 0.0;
        inner.day = today;
    }
}
