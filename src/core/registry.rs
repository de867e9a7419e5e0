//! Tool metadata registry.
//!
//! Built once at startup: each capability registers its own metadata while the
//! router is being assembled. Afterwards the registry is only read, and indexing
//! works from [`ToolRegistry::snapshot`], an owned copy.

use crate::core::error::TaskmeshError;
use crate::core::time;
use crate::core::validate;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: JsonValue,
    pub registered_at: i64,
}

impl ToolDefinition {
    /// Top-level property names of the input schema, sorted.
    pub fn schema_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self
            .input_schema
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default();
        fields.sort();
        fields
    }
}

#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: FxHashMap<String, ToolDefinition>,
    last_registered_at: i64,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a tool. `registeredAt` is strictly increasing across
    /// calls, so re-registration always counts as the most recent.
    pub fn register(
        &mut self,
        name: &str,
        description: &str,
        input_schema: JsonValue,
    ) -> Result<(), TaskmeshError> {
        let name = validate::tool_name(name)?;
        let description = validate::required("description", description)?.to_string();
        if !input_schema.is_object() {
            return Err(TaskmeshError::ValidationError(format!(
                "input schema for '{}' must be a JSON object",
                name
            )));
        }
        let registered_at = time::now_millis().max(self.last_registered_at + 1);
        self.last_registered_at = registered_at;
        self.tools.insert(
            name.clone(),
            ToolDefinition {
                name,
                description,
                input_schema,
                registered_at,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    /// Owned copy of every definition in registration order.
    pub fn snapshot(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().cloned().collect();
        defs.sort_by_key(|d| d.registered_at);
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
