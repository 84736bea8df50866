//! Contract registry: load once, look up by name.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::schema::CompiledSchema;
use super::{ContractError, OutputContract, OutputFormat};

/// A contract with its schema compiled and ready for validation.
pub struct RegisteredContract {
    /// The contract specification as loaded
    pub spec: OutputContract,

    schema: Option<CompiledSchema>,
}

impl RegisteredContract {
    fn new(spec: OutputContract) -> Result<Self, ContractError> {
        spec.validate()?;

        let schema = match (&spec.format, &spec.schema) {
            (OutputFormat::Json, Some(value)) => Some(CompiledSchema::compile(&spec.name, value)?),
            _ => None,
        };

        Ok(Self { spec, schema })
    }

    /// Validate a parsed output value against the contract schema.
    ///
    /// Text contracts accept anything.
    pub fn validate_output(&self, value: &serde_json::Value) -> Result<(), Vec<String>> {
        match &self.schema {
            Some(compiled) => compiled.validate(value),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for RegisteredContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredContract")
            .field("name", &self.spec.name)
            .field("version", &self.spec.version)
            .field("format", &self.spec.format)
            .finish()
    }
}

/// Registry of output contracts.
///
/// Loaded at process start and treated as read-only for the lifetime of
/// the process. A missing name is a configuration error at call time,
/// never retried.
#[derive(Default)]
pub struct ContractRegistry {
    contracts: BTreeMap<String, Arc<RegisteredContract>>,
}

impl ContractRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single contract.
    pub fn register(&mut self, contract: OutputContract) -> Result<(), ContractError> {
        if self.contracts.contains_key(&contract.name) {
            return Err(ContractError::Duplicate(contract.name));
        }
        let registered = RegisteredContract::new(contract)?;
        self.contracts
            .insert(registered.spec.name.clone(), Arc::new(registered));
        Ok(())
    }

    /// Load a registry from a YAML document containing a list of
    /// contracts.
    pub fn from_yaml(yaml: &str) -> Result<Self, ContractError> {
        let contracts: Vec<OutputContract> = serde_yaml::from_str(yaml)?;
        let mut registry = Self::new();
        for contract in contracts {
            registry.register(contract)?;
        }
        tracing::debug!(contracts = registry.len(), "Contract registry loaded");
        Ok(registry)
    }

    /// Load a registry from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ContractError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Look up a contract by name.
    pub fn get(&self, name: &str) -> Result<Arc<RegisteredContract>, ContractError> {
        self.contracts
            .get(name)
            .cloned()
            .ok_or_else(|| ContractError::NotFound(name.to_string()))
    }

    /// Registered contract names, in deterministic order.
    pub fn names(&self) -> Vec<&str> {
        self.contracts.keys().map(|s| s.as_str()).collect()
    }

    /// Number of registered contracts.
    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

impl std::fmt::Debug for ContractRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractRegistry")
            .field("contracts", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY_YAML: &str = r#"
- name: "design-doc"
  version: "1.0"
  format: json
  capability: "deep-reasoning"
  max_retry_attempts: 3
  schema:
    type: object
    required: ["title", "sections"]
    properties:
      title: { type: string }
      sections:
        type: array
        items: { type: string }

- name: "summary"
  version: "1.0"
  format: text
  mode: advisory
"#;

    #[test]
    fn loads_registry_from_yaml() {
        let registry = ContractRegistry::from_yaml(REGISTRY_YAML).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["design-doc", "summary"]);
    }

    #[test]
    fn lookup_missing_name_fails() {
        let registry = ContractRegistry::from_yaml(REGISTRY_YAML).unwrap();
        let result = registry.get("nonexistent");
        assert!(matches!(result, Err(ContractError::NotFound(_))));
    }

    #[test]
    fn registered_contract_validates_output() {
        let registry = ContractRegistry::from_yaml(REGISTRY_YAML).unwrap();
        let contract = registry.get("design-doc").unwrap();

        let good = serde_json::json!({ "title": "T", "sections": ["a"] });
        assert!(contract.validate_output(&good).is_ok());

        let bad = serde_json::json!({ "title": "T" });
        let errors = contract.validate_output(&bad).unwrap_err();
        assert!(errors[0].contains("sections"));
    }

    #[test]
    fn text_contract_accepts_anything() {
        let registry = ContractRegistry::from_yaml(REGISTRY_YAML).unwrap();
        let contract = registry.get("summary").unwrap();
        assert!(contract
            .validate_output(&serde_json::json!("free text"))
            .is_ok());
    }

    #[test]
    fn duplicate_name_rejected() {
        let yaml = r#"
- name: "dup"
  version: "1.0"
  format: text
- name: "dup"
  version: "1.1"
  format: text
"#;
        let result = ContractRegistry::from_yaml(yaml);
        assert!(matches!(result, Err(ContractError::Duplicate(_))));
    }

    #[test]
    fn bad_schema_fails_load() {
        let yaml = r#"
- name: "broken"
  version: "1.0"
  format: json
  schema:
    type: "definitely-not-a-type"
"#;
        let result = ContractRegistry::from_yaml(yaml);
        assert!(matches!(result, Err(ContractError::InvalidSchema { .. })));
    }
}
