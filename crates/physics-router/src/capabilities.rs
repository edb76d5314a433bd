//! Startup-time availability of each catalog tool.

use std::collections::BTreeSet;

use serde_json::{json, Value};

use crate::catalog::{ToolShape, ToolSpec, TOOL_CATALOG};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Disabled { reason: String },
}

#[derive(Debug, Clone)]
pub struct CapabilityEntry {
    pub tool: &'static ToolSpec,
    pub availability: Availability,
}

/// Availability of every catalog tool, decided once when the server starts.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    entries: Vec<CapabilityEntry>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::from_disabled(std::iter::empty::<String>())
    }
}

impl CapabilityRegistry {
    /// Builds the registry, disabling the named tools. Unknown names are logged.
    pub fn from_disabled<I, S>(disabled: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let disabled = disabled
            .into_iter()
            .map(|name| name.as_ref().trim().to_ascii_lowercase())
            .filter(|name| !name.is_empty())
            .collect::<BTreeSet<_>>();
        for name in &disabled {
            if !TOOL_CATALOG.iter().any(|tool| tool.name == name.as_str()) {
                tracing::warn!(tool = %name, "ignoring unknown tool in disabled list");
            }
        }

        let entries = TOOL_CATALOG
            .iter()
            .map(|tool| {
                let availability = if disabled.contains(tool.name) {
                    tracing::warn!(tool = tool.name, "tool disabled by configuration");
                    Availability::Disabled {
                        reason: "disabled by configuration".to_string(),
                    }
                } else {
                    tracing::debug!(tool = tool.name, "tool available");
                    Availability::Available
                };
                CapabilityEntry { tool, availability }
            })
            .collect::<Vec<_>>();
        Self { entries }
    }

    pub fn entries(&self) -> &[CapabilityEntry] {
        &self.entries
    }

    pub fn availability(&self, tool_name: &str) -> Option<&Availability> {
        self.entries
            .iter()
            .find(|entry| entry.tool.name == tool_name)
            .map(|entry| &entry.availability)
    }

    pub fn available_tools(&self) -> impl Iterator<Item = &'static ToolSpec> + '_ {
        self.entries
            .iter()
            .filter(|entry| entry.availability == Availability::Available)
            .map(|entry| entry.tool)
    }

    /// `tools/list` descriptors for the available tools.
    pub fn tool_descriptors(&self) -> Vec<Value> {
        self.available_tools().map(tool_descriptor).collect()
    }
}

fn tool_descriptor(tool: &ToolSpec) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    if let ToolShape::Consolidated { field, methods } = tool.shape {
        properties.insert(
            field.to_string(),
            json!({
                "type": "string",
                "enum": methods,
                "description": format!("Operation to run on the {} tool.", tool.name),
            }),
        );
        required.push(Value::String(field.to_string()));
    }
    properties.insert(
        "session_id".to_string(),
        json!({
            "type": "string",
            "description": "Session that records this call; defaults to the server session.",
        }),
    );
    json!({
        "name": tool.name,
        "description": tool.description,
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": true,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_default_registry_lists_every_tool() {
        let registry = CapabilityRegistry::default();
        assert_eq!(registry.tool_descriptors().len(), TOOL_CATALOG.len());
        assert_eq!(registry.availability("cas"), Some(&Availability::Available));
        assert_eq!(registry.availability("frobnicate"), None);
    }

    #[test]
    fn functional_disabled_tools_are_omitted_from_descriptors() {
        let registry = CapabilityRegistry::from_disabled([" API ", "export", "unknown"]);
        let names = registry
            .tool_descriptors()
            .iter()
            .map(|descriptor| descriptor["name"].as_str().expect("name").to_string())
            .collect::<Vec<_>>();
        assert!(!names.iter().any(|name| name == "api" || name == "export"));
        assert!(names.iter().any(|name| name == "cas"));
        assert!(matches!(
            registry.availability("api"),
            Some(Availability::Disabled { .. })
        ));
    }

    #[test]
    fn unit_consolidated_descriptor_requires_discriminator_enum() {
        let registry = CapabilityRegistry::default();
        let plot = registry
            .tool_descriptors()
            .into_iter()
            .find(|descriptor| descriptor["name"] == "plot")
            .expect("plot descriptor");
        assert_eq!(plot["inputSchema"]["required"], json!(["plot_type"]));
        assert_eq!(
            plot["inputSchema"]["properties"]["plot_type"]["enum"][0],
            "function_2d"
        );

        let units = registry
            .tool_descriptors()
            .into_iter()
            .find(|descriptor| descriptor["name"] == "units_convert")
            .expect("units descriptor");
        assert_eq!(units["inputSchema"]["required"], json!([]));
    }
}
