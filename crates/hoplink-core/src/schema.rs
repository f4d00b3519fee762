//! JSON-schema check of the routing metadata carried by transfers.

use serde_json::{json, Value};

use crate::error::CoreError;

/// Schema every forwardable transfer's meta must satisfy.
pub fn router_meta_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["routingId", "path"],
        "properties": {
            "routingId": {
                "type": "string",
                "pattern": "^0x[a-fA-F0-9]{64}$"
            },
            "requireOnline": { "type": "boolean" },
            "path": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "recipient": { "type": "string" },
                        "recipientChainId": { "type": "integer", "minimum": 1 },
                        "recipientAssetId": { "type": "string" }
                    }
                }
            }
        }
    })
}

/// Outcome of validating one meta object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Compiled routing-meta validator. Compile once, share freely.
pub struct RouterMetaValidator {
    validator: jsonschema::Validator,
}

impl RouterMetaValidator {
    pub fn new() -> Result<Self, CoreError> {
        let validator = jsonschema::validator_for(&router_meta_schema())
            .map_err(|e| CoreError::Schema(e.to_string()))?;
        Ok(Self { validator })
    }

    pub fn validate_routing_meta(&self, meta: &Value) -> MetaValidation {
        let errors: Vec<String> = self
            .validator
            .iter_errors(meta)
            .map(|err| format!("{}: {}", err.instance_path, err))
            .collect();
        MetaValidation {
            valid: errors.is_empty(),
            errors,
        }
    }
}

impl std::fmt::Debug for RouterMetaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterMetaValidator").finish_non_exhaustive()
    }
}
