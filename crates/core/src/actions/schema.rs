use serde_json::Value;

use crate::errors::ValidationError;

/// Field-presence contract for an action payload.
///
/// A field counts as present when it is not null, and, for strings and
/// arrays, not empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionSchema {
    required: Vec<&'static str>,
    any_of: Vec<Vec<&'static str>>,
}

impl ActionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, field: &'static str) -> Self {
        self.required.push(field);
        self
    }

    /// At least one of `fields` must be present.
    pub fn require_any(mut self, fields: &[&'static str]) -> Self {
        self.any_of.push(fields.to_vec());
        self
    }

    pub fn validate(&self, action_type: &str, payload: &Value) -> Result<(), ValidationError> {
        if !payload.is_object() {
            return Err(ValidationError::InvalidField {
                field: "payload".to_string(),
                reason: "must be a JSON object".to_string(),
            });
        }

        if let Some(field) = self.required.iter().find(|field| !is_present(payload, field)) {
            return Err(ValidationError::MissingField {
                action_type: action_type.to_string(),
                field: (*field).to_string(),
            });
        }

        for group in &self.any_of {
            if !group.iter().any(|field| is_present(payload, field)) {
                return Err(ValidationError::MissingField {
                    action_type: action_type.to_string(),
                    field: group.join("|"),
                });
            }
        }

        Ok(())
    }
}

fn is_present(payload: &Value, field: &str) -> bool {
    match payload.get(field) {
        None | Some(Value::Null) => false,
        Some(Value::String(value)) => !value.trim().is_empty(),
        Some(Value::Array(values)) => !values.is_empty(),
        Some(_) => true,
    }
}

/// First non-empty string among `names`.
pub fn string_field<'a>(payload: &'a Value, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .filter_map(|name| payload.get(*name).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
}

pub fn bool_field(payload: &Value, name: &str) -> bool {
    payload.get(name).and_then(Value::as_bool).unwrap_or(false)
}
