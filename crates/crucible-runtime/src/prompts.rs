//! Prompt construction for contract-enforced calls.
//!
//! Layered for cache efficiency:
//! 1. Format instructions (per contract) - stable across retries
//! 2. Task prompt - stable across retries
//! 3. Correction hint / feedback - changes per attempt
//!
//! Everything here is a pure function of its inputs: the same attempts
//! produce the same hint, the same feedback produces the same
//! regeneration prompt. No call is issued from this module.

use crucible_core::{FeedbackItem, OutputContract, OutputFormat};

/// Directive injected when an endpoint or contract requires extended
/// reasoning. Resolved from configuration flags, never from matching a
/// role name at call time.
pub const EXTENDED_REASONING_DIRECTIVE: &str = "\
Think through the problem step by step before producing the final \
output. Weigh alternatives and check your work against the stated \
requirements before answering.";

const JSON_FORMAT_HEADER: &str = "\
## Output Format

Respond with a single JSON object and nothing else: no prose, no \
markdown fences, no commentary before or after. The object must \
conform to this JSON Schema:";

const TEXT_FORMAT_HEADER: &str = "\
## Output Format

Respond with the requested content as plain text.";

/// System-message format instructions for a contract.
pub fn format_instructions(contract: &OutputContract) -> String {
    let mut instructions = match contract.format {
        OutputFormat::Json => {
            let schema = contract
                .schema
                .as_ref()
                .and_then(|s| serde_json::to_string_pretty(s).ok())
                .unwrap_or_else(|| "{}".to_string());
            format!("{JSON_FORMAT_HEADER}\n\n{schema}")
        }
        OutputFormat::Text => TEXT_FORMAT_HEADER.to_string(),
    };

    if contract.requires_extended_reasoning {
        instructions.push_str("\n\n");
        instructions.push_str(EXTENDED_REASONING_DIRECTIVE);
    }

    instructions
}

/// Correction hint appended to the task prompt on retry.
///
/// Specificity escalates with the attempt count: the first retry names
/// the violation, later retries list the history and quote the last
/// raw response so the model can see exactly what it produced.
pub fn correction_hint(violations: &[String], last_raw: &str) -> String {
    let mut hint = String::new();

    match violations.len() {
        0 => return hint,
        1 => {
            hint.push_str("## Correction Required\n\n");
            hint.push_str("Your previous response did not conform to the required format:\n");
            hint.push_str(&format!("- {}\n", violations[0]));
            hint.push_str("\nReturn only a corrected response that fixes this violation.");
        }
        n => {
            hint.push_str("## Correction Required\n\n");
            hint.push_str(&format!(
                "You have produced {n} non-conforming responses. Every violation so far:\n"
            ));
            for (i, violation) in violations.iter().enumerate() {
                hint.push_str(&format!("{}. {}\n", i + 1, violation));
            }
            hint.push_str("\nYour last response began with:\n");
            hint.push_str(&format!("> {}\n", truncate(last_raw, 400)));
            hint.push_str(
                "\nProduce a response that fixes every violation listed above. \
                 Output the corrected content only.",
            );
        }
    }

    hint
}

/// Regeneration prompt for the next refinement iteration.
///
/// Deterministic given the feedback: the loop's behavior is
/// reproducible from its recorded history.
pub fn regeneration_prompt(task: &str, previous_candidate: &str, feedback: &[FeedbackItem]) -> String {
    let mut prompt = String::new();

    prompt.push_str("## Task\n\n");
    prompt.push_str(task);

    prompt.push_str("\n\n## Previous Attempt\n\n");
    prompt.push_str(previous_candidate);

    prompt.push_str("\n\n## Required Fixes\n\n");
    if feedback.is_empty() {
        prompt.push_str(
            "Validation did not pass. Revise the attempt to better satisfy the task.\n",
        );
    } else {
        for item in feedback {
            match &item.recommendation {
                Some(rec) => prompt.push_str(&format!(
                    "- [{}] {}: {} (fix: {})\n",
                    item.severity, item.category, item.issue, rec
                )),
                None => prompt.push_str(&format!(
                    "- [{}] {}: {}\n",
                    item.severity, item.category, item.issue
                )),
            }
        }
    }

    prompt.push_str(
        "\nProduce a revised version that resolves every fix listed above while \
         preserving what the previous attempt already did well.",
    );

    prompt
}

/// Prompt asking a model to distill a report's findings into
/// actionable feedback items.
pub fn feedback_extraction_prompt(findings: &[crucible_core::ValidationFinding]) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "Distill the validation findings below into a short, prioritized list of \
         actionable fixes. Keep only issues that materially block acceptance; merge \
         duplicates; make each fix concrete enough to act on.\n\n## Findings\n\n",
    );
    for finding in findings {
        prompt.push_str(&format!(
            "- [{}] {}: {}\n",
            finding.severity, finding.category, finding.issue
        ));
    }

    prompt
}

/// Wrap a validator's instructions around a candidate artifact.
pub fn validator_prompt(instructions: &str, candidate: &str) -> String {
    format!(
        "{instructions}\n\n## Candidate\n\n{candidate}\n\n\
         Evaluate the candidate against your instructions and report your verdict."
    )
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let prefix: String = s.chars().take(max_chars).collect();
        format!("{prefix}…")
    }
}
