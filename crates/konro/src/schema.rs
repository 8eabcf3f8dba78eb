//! # Structural Contracts
//!
//! Operators declare what they accept and what they produce as a [`Schema`]:
//! a flat set of named, typed fields validated against a JSON object. There
//! is no inheritance involved; an operator is polymorphic only over its
//! ability to run, and its contracts are plain data.
//!
//! A batched invocation carries a `Value::Array` of per-item objects, so
//! validation of a batch checks every element against the same schema.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

/// The type a [`Schema`] field must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Float,
    Bool,
    String,
    Array,
    Object,
    /// Present with any type.
    Any,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Float => value.is_f64() || value.is_i64() || value.is_u64(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::String => value.is_string(),
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
            FieldKind::Any => true,
        }
    }
}

/// A contract violation, naming the offending field.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("expected an object, got {0}")]
    NotAnObject(String),

    #[error("missing field `{0}`")]
    MissingField(String),

    #[error("field `{field}` is not {expected:?}")]
    WrongType { field: String, expected: FieldKind },

    #[error("batch element {index} failed: {source}")]
    BatchElement {
        index: usize,
        #[source]
        source: Box<SchemaError>,
    },
}

/// A structural validator: a set of named, typed fields.
///
/// Field order is irrelevant; extra fields on the value are permitted so an
/// operator may pass through data it does not inspect.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: BTreeMap<String, FieldKind>,
}

impl Schema {
    /// An empty schema, accepting any object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a required field.
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.insert(name.into(), kind);
        self
    }

    /// Validates one value against this schema.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        let object = value
            .as_object()
            .ok_or_else(|| SchemaError::NotAnObject(kind_name(value).to_string()))?;

        for (name, kind) in &self.fields {
            match object.get(name) {
                None => return Err(SchemaError::MissingField(name.clone())),
                Some(field) if !kind.matches(field) => {
                    return Err(SchemaError::WrongType {
                        field: name.clone(),
                        expected: *kind,
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Validates every element of a batched value against this schema.
    pub fn validate_batch(&self, batch: &[Value]) -> Result<(), SchemaError> {
        for (index, element) in batch.iter().enumerate() {
            self.validate(element).map_err(|source| SchemaError::BatchElement {
                index,
                source: Box::new(source),
            })?;
        }
        Ok(())
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn int_schema() -> Schema {
        Schema::new().field("value", FieldKind::Integer)
    }

    #[test]
    fn accepts_matching_object() {
        assert!(int_schema().validate(&json!({"value": 5})).is_ok());
    }

    #[test]
    fn extra_fields_are_permitted() {
        assert!(int_schema()
            .validate(&json!({"value": 5, "note": "kept"}))
            .is_ok());
    }

    #[test]
    fn rejects_missing_field() {
        let err = int_schema().validate(&json!({"other": 5})).unwrap_err();
        assert_eq!(err, SchemaError::MissingField("value".into()));
    }

    #[test]
    fn rejects_wrong_type() {
        let err = int_schema().validate(&json!({"value": "five"})).unwrap_err();
        assert!(matches!(err, SchemaError::WrongType { .. }));
    }

    #[test]
    fn rejects_non_object() {
        let err = int_schema().validate(&json!(5)).unwrap_err();
        assert!(matches!(err, SchemaError::NotAnObject(_)));
    }

    #[test]
    fn batch_error_names_the_element() {
        let batch = vec![json!({"value": 1}), json!({"value": "two"})];
        let err = int_schema().validate_batch(&batch).unwrap_err();
        match err {
            SchemaError::BatchElement { index, .. } => assert_eq!(index, 1),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn float_accepts_integers() {
        let schema = Schema::new().field("score", FieldKind::Float);
        assert!(schema.validate(&json!({"score": 3})).is_ok());
        assert!(schema.validate(&json!({"score": 3.5})).is_ok());
    }
}
