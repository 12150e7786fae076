//! Provider-neutral response schemas
//!
//! Each capability declares the JSON shape it expects once, at startup.
//! Adapters translate a `ResponseSchema` into their own wire format and
//! responses are checked against it before deserialization.

use serde_json::{json, Map, Value};
use std::sync::OnceLock;

use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    String,
    Number,
    Integer,
    Boolean,
    StringArray,
}

impl SchemaKind {
    fn json_schema(&self) -> Value {
        match self {
            SchemaKind::String => json!({ "type": "string" }),
            SchemaKind::Number => json!({ "type": "number" }),
            SchemaKind::Integer => json!({ "type": "integer" }),
            SchemaKind::Boolean => json!({ "type": "boolean" }),
            SchemaKind::StringArray => json!({ "type": "array", "items": { "type": "string" } }),
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            SchemaKind::String => value.is_string(),
            SchemaKind::Number => value.is_number(),
            SchemaKind::Integer => value.is_i64() || value.is_u64(),
            SchemaKind::Boolean => value.is_boolean(),
            SchemaKind::StringArray => value
                .as_array()
                .map(|items| items.iter().all(Value::is_string))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaProperty {
    pub name: &'static str,
    pub kind: SchemaKind,
    pub required: bool,
    pub description: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub properties: Vec<SchemaProperty>,
}

impl ResponseSchema {
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            properties: Vec::new(),
        }
    }

    pub fn required(mut self, name: &'static str, kind: SchemaKind, description: &'static str) -> Self {
        self.properties.push(SchemaProperty {
            name,
            kind,
            required: true,
            description,
        });
        self
    }

    pub fn optional(mut self, name: &'static str, kind: SchemaKind, description: &'static str) -> Self {
        self.properties.push(SchemaProperty {
            name,
            kind,
            required: false,
            description,
        });
        self
    }

    /// JSON Schema (draft 2020-12 subset) for the object described
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.properties {
            let mut schema = p.kind.json_schema();
            if let Some(obj) = schema.as_object_mut() {
                obj.insert("description".into(), Value::String(p.description.into()));
            }
            properties.insert(p.name.to_string(), schema);
        }
        let required: Vec<&str> = self
            .properties
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect();

        json!({
            "type": "object",
            "description": self.description,
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// Reject responses missing required fields or carrying mistyped ones
    pub fn check(&self, value: &Value) -> Result<()> {
        let obj = value.as_object().ok_or_else(|| AppError::InvalidFormat {
            message: format!("{}: response is not a JSON object", self.name),
        })?;
        for p in &self.properties {
            match obj.get(p.name) {
                Some(Value::Null) | None if p.required => {
                    return Err(AppError::InvalidFormat {
                        message: format!("{}: missing required field '{}'", self.name, p.name),
                    });
                }
                Some(Value::Null) | None => {}
                Some(v) if !p.kind.matches(v) => {
                    return Err(AppError::InvalidFormat {
                        message: format!("{}: field '{}' has the wrong type", self.name, p.name),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Schemas for every generative capability the pipeline uses
#[derive(Debug)]
pub struct CapabilitySchemas {
    pub hyde: ResponseSchema,
    pub multi_query: ResponseSchema,
    pub rerank_score: ResponseSchema,
    pub intent: ResponseSchema,
}

impl CapabilitySchemas {
    fn build() -> Self {
        Self {
            hyde: ResponseSchema::new("hyde", "A hypothetical note passage answering the query")
                .required("document", SchemaKind::String, "Passage written as if taken from the user's notes")
                .required("keyConcepts", SchemaKind::StringArray, "Key concepts covered by the passage"),
            multi_query: ResponseSchema::new("multi_query", "Alternative phrasings of a search query")
                .required("queries", SchemaKind::StringArray, "Alternative phrasings, most useful first")
                .optional("explanation", SchemaKind::String, "Why these phrasings widen recall"),
            rerank_score: ResponseSchema::new("rerank_score", "Relevance of one passage to a query")
                .required("score", SchemaKind::Number, "Relevance from 0 (unrelated) to 10 (direct answer)")
                .optional("reasoning", SchemaKind::String, "One short sentence justifying the score"),
            intent: ResponseSchema::new("intent", "Whether answering needs the user's notes")
                .required("needsRetrieval", SchemaKind::Boolean, "True if the user's notes should be searched")
                .optional("reason", SchemaKind::String, "Short justification"),
        }
    }
}

/// Built on first use, shared afterwards
pub fn schemas() -> &'static CapabilitySchemas {
    static SCHEMAS: OnceLock<CapabilitySchemas> = OnceLock::new();
    SCHEMAS.get_or_init(CapabilitySchemas::build)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_schema_lists_required_fields() {
        let schema = schemas().multi_query.to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["queries"]));
        assert_eq!(schema["properties"]["queries"]["type"], "array");
    }

    #[test]
    fn test_check_accepts_conforming_response() {
        let value = json!({ "document": "Some passage", "keyConcepts": ["a", "b"] });
        assert!(schemas().hyde.check(&value).is_ok());
    }

    #[test]
    fn test_check_rejects_missing_and_mistyped() {
        let missing = json!({ "keyConcepts": [] });
        assert!(schemas().hyde.check(&missing).is_err());

        let mistyped = json!({ "score": "high" });
        assert!(schemas().rerank_score.check(&mistyped).is_err());

        assert!(schemas().intent.check(&json!("yes")).is_err());
    }
}
