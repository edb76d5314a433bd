//! Normalizes inbound tool calls onto exactly one canonical method.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::capabilities::{Availability, CapabilityRegistry};
use crate::catalog::{find_tool, resolve_legacy_name, Execution, ToolSpec};

/// Argument reserved for session selection; never forwarded to the worker.
pub const SESSION_ID_ARGUMENT: &str = "session_id";

const FALLBACK_DISCRIMINATOR_FIELDS: &[&str] = &["method", "action"];
const PLACEHOLDER_VALUES: &[&str] = &["undefined", "null", "none", "[object object]"];
const PREFIX_SEPARATORS: &[char] = &['_', '.', '/'];

/// Why a tool call was rejected before reaching the worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("tool '{tool}' is disabled: {reason}")]
    ToolDisabled { tool: String, reason: String },
    #[error("tool '{tool}' arguments must be an object")]
    InvalidArguments { tool: String },
    #[error("tool '{tool}' requires a '{field}' argument (one of: {supported})")]
    MissingDiscriminator {
        tool: String,
        field: String,
        supported: String,
    },
    #[error("tool '{tool}' argument '{field}' must be a string")]
    NonStringDiscriminator { tool: String, field: String },
    #[error("tool '{tool}' argument '{field}' is empty")]
    EmptyDiscriminator { tool: String, field: String },
    #[error("tool '{tool}' argument '{field}' has placeholder value '{value}'")]
    PlaceholderDiscriminator {
        tool: String,
        field: String,
        value: String,
    },
    #[error("tool '{tool}' does not support '{method}' (supported: {supported})")]
    UnsupportedMethod {
        tool: String,
        method: String,
        supported: String,
    },
}

/// A tool call that passed routing.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedCall {
    pub tool: &'static ToolSpec,
    /// Canonical method; `None` for single-method tools.
    pub method: Option<&'static str>,
    pub worker_method: String,
    /// Arguments as received, with the canonical discriminator attached.
    pub arguments: Map<String, Value>,
    /// Parameters forwarded to the executor.
    pub params: Map<String, Value>,
    pub session_id: Option<String>,
}

impl RoutedCall {
    pub fn execution(&self) -> Execution {
        self.tool.execution
    }
}

/// Maps tool names and discriminators onto the catalog.
#[derive(Debug, Clone, Default)]
pub struct ToolRouter {
    capabilities: CapabilityRegistry,
}

impl ToolRouter {
    pub fn new(capabilities: CapabilityRegistry) -> Self {
        Self { capabilities }
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    pub fn route(&self, name: &str, arguments: &Value) -> Result<RoutedCall, RouteError> {
        let name = name.trim();
        let (tool, legacy_method) = match find_tool(name) {
            Some(tool) => (tool, None),
            None => match resolve_legacy_name(name) {
                Some((tool, method)) => (tool, Some(method)),
                None => return Err(RouteError::UnknownTool(name.to_string())),
            },
        };

        if let Some(Availability::Disabled { reason }) = self.capabilities.availability(tool.name)
        {
            return Err(RouteError::ToolDisabled {
                tool: tool.name.to_string(),
                reason: reason.clone(),
            });
        }

        let mut arguments = match arguments {
            Value::Object(object) => object.clone(),
            Value::Null => Map::new(),
            _ => {
                return Err(RouteError::InvalidArguments {
                    tool: tool.name.to_string(),
                })
            }
        };

        let mut consumed_fallback = None;
        let method = match (tool.discriminator_field(), legacy_method) {
            (None, _) => None,
            (Some(field), Some(method)) => {
                tracing::debug!(alias = name, tool = tool.name, method, "resolved legacy tool name");
                arguments.insert(field.to_string(), Value::String(method.to_string()));
                Some(method)
            }
            (Some(field), None) => {
                let (source_field, method) = normalize_discriminator(tool, field, &arguments)?;
                if source_field != field {
                    consumed_fallback = Some(source_field);
                }
                arguments.insert(field.to_string(), Value::String(method.to_string()));
                Some(method)
            }
        };

        let session_id = match arguments.get(SESSION_ID_ARGUMENT) {
            Some(Value::String(id)) if !id.trim().is_empty() => Some(id.trim().to_string()),
            _ => None,
        };

        let mut params = arguments.clone();
        params.remove(SESSION_ID_ARGUMENT);
        if let Some(field) = consumed_fallback {
            params.remove(field);
        }

        Ok(RoutedCall {
            tool,
            method,
            worker_method: tool.worker_method(method),
            arguments,
            params,
            session_id,
        })
    }
}

/// Reads, cleans and validates the discriminator of a consolidated tool.
/// Returns the field it was read from and the canonical method.
fn normalize_discriminator(
    tool: &'static ToolSpec,
    field: &'static str,
    arguments: &Map<String, Value>,
) -> Result<(&'static str, &'static str), RouteError> {
    let candidates = std::iter::once(field).chain(
        FALLBACK_DISCRIMINATOR_FIELDS
            .iter()
            .copied()
            .filter(|fallback| *fallback != field),
    );
    let mut found = None;
    for candidate in candidates {
        match arguments.get(candidate) {
            None | Some(Value::Null) => continue,
            Some(value) => {
                found = Some((candidate, value));
                break;
            }
        }
    }
    let Some((source_field, value)) = found else {
        return Err(RouteError::MissingDiscriminator {
            tool: tool.name.to_string(),
            field: field.to_string(),
            supported: tool.methods().join(", "),
        });
    };

    let Value::String(raw) = value else {
        return Err(RouteError::NonStringDiscriminator {
            tool: tool.name.to_string(),
            field: source_field.to_string(),
        });
    };
    let cleaned = raw.trim().to_ascii_lowercase();
    if cleaned.is_empty() {
        return Err(RouteError::EmptyDiscriminator {
            tool: tool.name.to_string(),
            field: source_field.to_string(),
        });
    }
    if PLACEHOLDER_VALUES.contains(&cleaned.as_str()) {
        return Err(RouteError::PlaceholderDiscriminator {
            tool: tool.name.to_string(),
            field: source_field.to_string(),
            value: raw.clone(),
        });
    }

    let stripped = strip_tool_prefix(tool.name, &cleaned);
    tool.methods()
        .iter()
        .copied()
        .find(|method| *method == stripped)
        .map(|method| (source_field, method))
        .ok_or_else(|| RouteError::UnsupportedMethod {
            tool: tool.name.to_string(),
            method: raw.clone(),
            supported: tool.methods().join(", "),
        })
}

fn strip_tool_prefix<'a>(tool_name: &str, value: &'a str) -> &'a str {
    value
        .strip_prefix(tool_name)
        .and_then(|rest| rest.strip_prefix(PREFIX_SEPARATORS))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(value)
}
