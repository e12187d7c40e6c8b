//! Tool schema registry.
//!
//! Schemas are data, not code: they are validated once at registration,
//! stored as plain structures, and pattern-matched at call time to inject
//! defaults for missing arguments.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;
use tracing::debug;

use prism_core::ErrorKind;
use prism_provider::{ToolCall, ToolDefinition};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid tool schema for '{name}': {reason}")]
    InvalidSchema { name: String, reason: String },

    #[error("Tool already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Missing required argument '{argument}' for tool '{name}'")]
    MissingArgument { name: String, argument: String },
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidRequest
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolDefinition>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a schema. Registration is one-shot per name;
    /// schemas are immutable afterwards.
    pub fn register(&self, definition: ToolDefinition) -> Result<(), ToolError> {
        validate_schema(&definition)?;

        let mut tools = self.tools.write().unwrap();
        if tools.contains_key(&definition.name) {
            return Err(ToolError::AlreadyRegistered(definition.name));
        }
        debug!(tool = %definition.name, "tool registered");
        tools.insert(definition.name.clone(), definition);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.read().unwrap().get(name).cloned()
    }

    /// All registered definitions, sorted by name for stable request bodies.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut out: Vec<ToolDefinition> =
            self.tools.read().unwrap().values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill missing arguments from schema defaults, then check the required
    /// list. Returns the enriched call.
    pub fn enrich_arguments(&self, call: &ToolCall) -> Result<ToolCall, ToolError> {
        let definition = self
            .get(&call.name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;

        let mut input = match &call.input {
            serde_json::Value::Object(map) => map.clone(),
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                return Err(ToolError::InvalidSchema {
                    name: call.name.clone(),
                    reason: format!("arguments must be an object, got {other}"),
                })
            }
        };

        if let Some(properties) = definition
            .input_schema
            .get("properties")
            .and_then(|p| p.as_object())
        {
            for (key, spec) in properties {
                if !input.contains_key(key) {
                    if let Some(default) = spec.get("default") {
                        debug!(tool = %call.name, argument = %key, "injected default argument");
                        input.insert(key.clone(), default.clone());
                    }
                }
            }
        }

        if let Some(required) = definition
            .input_schema
            .get("required")
            .and_then(|r| r.as_array())
        {
            for key in required.iter().filter_map(|k| k.as_str()) {
                if !input.contains_key(key) {
                    return Err(ToolError::MissingArgument {
                        name: call.name.clone(),
                        argument: key.to_string(),
                    });
                }
            }
        }

        Ok(ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            input: serde_json::Value::Object(input),
        })
    }
}

/// Registration-time schema validation: a named tool whose input spec is a
/// JSON-schema object with typed properties.
fn validate_schema(definition: &ToolDefinition) -> Result<(), ToolError> {
    let name = &definition.name;
    if name.is_empty() {
        return Err(ToolError::InvalidSchema {
            name: name.clone(),
            reason: "name is empty".into(),
        });
    }

    let schema = &definition.input_schema;
    if !schema.is_object() {
        return Err(ToolError::InvalidSchema {
            name: name.clone(),
            reason: "input schema must be an object".into(),
        });
    }
    if let Some(ty) = schema.get("type") {
        if ty != "object" {
            return Err(ToolError::InvalidSchema {
                name: name.clone(),
                reason: format!("input schema type must be \"object\", got {ty}"),
            });
        }
    }
    if let Some(properties) = schema.get("properties") {
        let Some(map) = properties.as_object() else {
            return Err(ToolError::InvalidSchema {
                name: name.clone(),
                reason: "properties must be an object".into(),
            });
        };
        for (key, spec) in map {
            let typed = spec.get("type").map(|t| t.is_string()).unwrap_or(false);
            if !typed {
                return Err(ToolError::InvalidSchema {
                    name: name.clone(),
                    reason: format!("property '{key}' has no type"),
                });
            }
        }
    }

    Ok(())
}
