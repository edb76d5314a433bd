//! Tool catalog, routing, and dispatch for the physics MCP server.
//!
//! Inbound calls are normalized by [`ToolRouter`] onto one canonical method,
//! then [`ToolDispatcher`] executes them on the worker (or locally), persists
//! any embedded payloads, and records the call in the session store.

pub mod capabilities;
pub mod catalog;
pub mod dispatch;
pub mod report;
pub mod route;

pub use capabilities::{Availability, CapabilityEntry, CapabilityRegistry};
pub use catalog::{
    find_tool, legacy_names, resolve_legacy_name, Execution, LegacyAlias, ToolShape, ToolSpec,
    LEGACY_ALIASES, TOOL_CATALOG,
};
pub use dispatch::{
    DispatcherConfig, ExecutionError, ToolCall, ToolContent, ToolDispatcher, ToolResultEnvelope,
};
pub use report::{generate_session_report, ReportSummary, REPORT_ARTIFACT_KIND};
pub use route::{RouteError, RoutedCall, ToolRouter, SESSION_ID_ARGUMENT};
