//! JSON Schema compilation and validation for contract outputs.
//!
//! Schemas compile once at registry load; a contract with a schema that
//! does not compile fails the load, not the call that uses it.

use super::ContractError;

/// A schema compiled for repeated validation.
pub struct CompiledSchema {
    validator: jsonschema::Validator,
}

impl CompiledSchema {
    /// Compile a JSON Schema.
    pub fn compile(contract: &str, schema: &serde_json::Value) -> Result<Self, ContractError> {
        let validator =
            jsonschema::options()
                .build(schema)
                .map_err(|e| ContractError::InvalidSchema {
                    contract: contract.to_string(),
                    message: e.to_string(),
                })?;
        Ok(Self { validator })
    }

    /// Validate a value, collecting every violation.
    ///
    /// Violation messages carry the instance path so correction hints
    /// can name the exact offending field.
    pub fn validate(&self, value: &serde_json::Value) -> Result<(), Vec<String>> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(value)
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Fast validity check without error details.
    pub fn is_valid(&self, value: &serde_json::Value) -> bool {
        self.validator.is_valid(value)
    }
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema").finish_non_exhaustive()
    }
}
