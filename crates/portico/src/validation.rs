//! Query parameter parsing and schema validation.

use std::sync::Arc;

use dashmap::DashMap;
use jsonschema::JSONSchema;
use portico_protocol::ValidationIssue;
use serde_json::{Map, Value};

/// Outcome of a failed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    /// Human-readable summary of every violation.
    pub message: String,
    pub errors: Vec<ValidationIssue>,
}

/// Checks a decoded value against a declared schema.
pub trait QueryValidator: Send + Sync {
    fn validate(&self, data: &Value, schema: &Value) -> Result<(), ValidationFailure>;
}

type CompiledSchema = Result<Arc<JSONSchema>, ValidationFailure>;

/// JSON Schema validator backed by the `jsonschema` crate.
///
/// Each distinct schema is compiled once and reused, including a schema
/// that fails to compile.
#[derive(Default)]
pub struct JsonSchemaValidator {
    compiled: DashMap<String, CompiledSchema>,
}

impl JsonSchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    fn compiled(&self, schema: &Value) -> CompiledSchema {
        let key = schema.to_string();
        if let Some(cached) = self.compiled.get(&key) {
            return cached.value().clone();
        }

        let compiled = JSONSchema::compile(schema)
            .map(Arc::new)
            .map_err(|e| ValidationFailure {
                message: format!("invalid query schema: {e}"),
                errors: vec![ValidationIssue {
                    path: e.schema_path.to_string(),
                    message: e.to_string(),
                }],
            });
        self.compiled.insert(key, compiled.clone());
        compiled
    }
}

impl QueryValidator for JsonSchemaValidator {
    fn validate(&self, data: &Value, schema: &Value) -> Result<(), ValidationFailure> {
        let compiled = self.compiled(schema)?;

        let errors: Vec<ValidationIssue> = match compiled.validate(data) {
            Ok(()) => return Ok(()),
            Err(errors) => errors
                .map(|e| ValidationIssue {
                    path: e.instance_path.to_string(),
                    message: e.to_string(),
                })
                .collect(),
        };

        Err(ValidationFailure {
            message: human_readable(&errors),
            errors,
        })
    }
}

fn human_readable(errors: &[ValidationIssue]) -> String {
    let details: Vec<String> = errors
        .iter()
        .map(|issue| {
            if issue.path.is_empty() {
                issue.message.clone()
            } else {
                format!("{}: {}", issue.path, issue.message)
            }
        })
        .collect();
    format!("query validation failed: {}", details.join("; "))
}

/// Decode a raw query string into a JSON object.
///
/// Every value is a string; a key given more than once becomes an array of
/// its values in order of appearance.
pub fn parse_query(query: Option<&str>) -> Value {
    let mut params = Map::new();
    let Some(query) = query else {
        return Value::Object(params);
    };

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let value = Value::String(value.into_owned());
        match params.get_mut(key.as_ref()) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                params.insert(key.into_owned(), value);
            }
        }
    }

    Value::Object(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn orders_schema() -> Value {
        json!({
            "type": "object",
            "required": ["id"],
            "properties": {"id": {"type": "string"}}
        })
    }

    #[test]
    fn parse_empty_query() {
        assert_eq!(parse_query(None), json!({}));
        assert_eq!(parse_query(Some("")), json!({}));
    }

    #[test]
    fn parse_decodes_values() {
        assert_eq!(
            parse_query(Some("id=42&note=hello%20world&plus=a+b")),
            json!({"id": "42", "note": "hello world", "plus": "a b"})
        );
    }

    #[test]
    fn parse_repeated_keys_become_arrays() {
        assert_eq!(
            parse_query(Some("tag=a&tag=b&tag=c")),
            json!({"tag": ["a", "b", "c"]})
        );
    }

    #[test]
    fn valid_query_passes() {
        let validator = JsonSchemaValidator::new();
        assert!(validator
            .validate(&json!({"id": "42"}), &orders_schema())
            .is_ok());
    }

    #[test]
    fn missing_required_field_is_reported() {
        let validator = JsonSchemaValidator::new();
        let failure = validator
            .validate(&json!({}), &orders_schema())
            .unwrap_err();
        assert_eq!(failure.errors.len(), 1);
        assert!(failure.errors[0].message.contains("id"));
        assert!(failure.message.starts_with("query validation failed"));
    }

    #[test]
    fn wrong_type_reports_instance_path() {
        let validator = JsonSchemaValidator::new();
        let failure = validator
            .validate(&json!({"id": 42}), &orders_schema())
            .unwrap_err();
        assert_eq!(failure.errors[0].path, "/id");
        assert!(failure.message.contains("/id"));
    }

    #[test]
    fn invalid_schema_is_a_failure() {
        let validator = JsonSchemaValidator::new();
        let failure = validator
            .validate(&json!({}), &json!({"type": 12}))
            .unwrap_err();
        assert!(failure.message.starts_with("invalid query schema"));
    }

    #[test]
    fn schemas_are_compiled_once() {
        let validator = JsonSchemaValidator::new();
        for id in ["1", "2", "3"] {
            assert!(validator.validate(&json!({"id": id}), &orders_schema()).is_ok());
        }
        assert!(validator.validate(&json!({}), &orders_schema()).is_err());
        assert_eq!(validator.compiled.len(), 1);

        let broken = json!({"type": 12});
        let first = validator.validate(&json!({}), &broken).unwrap_err();
        let second = validator.validate(&json!({}), &broken).unwrap_err();
        assert_eq!(first, second);
        assert_eq!(validator.compiled.len(), 2);
    }
}
