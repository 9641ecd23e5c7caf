//! Type rules checked after every local update.

use serde::{Deserialize, Serialize};

use crate::crdt::CrdtRoot;
use crate::error::DocError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Integer,
    Long,
    Double,
    Boolean,
    Null,
    Bytes,
    Date,
    Object,
    Array,
    Text,
    Tree,
    Counter,
}

impl ValueType {
    /// Name as reported by [`CrdtElement::type_name`](crate::crdt::CrdtElement::type_name).
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Integer => "integer",
            ValueType::Long => "long",
            ValueType::Double => "double",
            ValueType::Boolean => "boolean",
            ValueType::Null => "null",
            ValueType::Bytes => "bytes",
            ValueType::Date => "date",
            ValueType::Object => "object",
            ValueType::Array => "array",
            ValueType::Text => "text",
            ValueType::Tree => "tree",
            ValueType::Counter => "counter",
        }
    }
}

/// The value at `path`, when present, must have type `value_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRule {
    pub path: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub rules: Vec<SchemaRule>,
}

impl Schema {
    pub fn new(rules: Vec<SchemaRule>) -> Self {
        Self { rules }
    }

    pub fn rule(mut self, path: impl Into<String>, value_type: ValueType) -> Self {
        self.rules.push(SchemaRule {
            path: path.into(),
            value_type,
        });
        self
    }

    /// Collects every violated rule into one `SchemaValidation` error.
    pub fn validate(&self, root: &CrdtRoot) -> Result<(), DocError> {
        let mut errors = Vec::new();
        for rule in &self.rules {
            match root.find_by_path(&rule.path) {
                Ok(Some(element)) if element.type_name() != rule.value_type.as_str() => {
                    errors.push(format!(
                        "{}: expected {}, found {}",
                        rule.path,
                        rule.value_type.as_str(),
                        element.type_name()
                    ));
                }
                Ok(_) => {}
                Err(e) => errors.push(format!("{}: {e}", rule.path)),
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DocError::SchemaValidation(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ActorId, TimeTicket};
    use crate::crdt::{CrdtElement, PrimitiveValue};
    use crate::operation::{OpSource, Operation, SetOperation};

    fn root_with(key: &str, value: PrimitiveValue) -> CrdtRoot {
        let mut root = CrdtRoot::new();
        let at = TimeTicket::new(1, 1, ActorId::INITIAL);
        Operation::Set(SetOperation {
            parent_created_at: TimeTicket::INITIAL,
            key: key.into(),
            value: CrdtElement::primitive(value, at),
            executed_at: at,
        })
        .execute(&mut root, OpSource::Local)
        .unwrap();
        root
    }

    #[test]
    fn rules_apply_only_to_present_values() {
        let schema = Schema::default()
            .rule("$.title", ValueType::String)
            .rule("$.missing", ValueType::Counter);
        assert!(schema.validate(&root_with("title", "x".into())).is_ok());
    }

    #[test]
    fn mismatches_are_collected() {
        let schema = Schema::default()
            .rule("$.title", ValueType::String)
            .rule("title", ValueType::String);
        let err = schema.validate(&root_with("title", 3i32.into())).unwrap_err();
        let DocError::SchemaValidation(errors) = err else {
            panic!("expected a schema error");
        };
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0], "$.title: expected string, found integer");
    }
}
