//! Local `report.generate` handler.

use std::fmt::Write as _;
use std::path::PathBuf;

use physics_core::write_text_atomic;
use physics_session::{ArtifactRecord, EventRecord, SessionStore};
use serde_json::{json, Value};

use crate::dispatch::ExecutionError;

pub const REPORT_ARTIFACT_KIND: &str = "report";

#[derive(Debug, Clone, PartialEq)]
pub struct ReportSummary {
    pub path: PathBuf,
    pub event_count: usize,
    pub artifact_count: usize,
}

impl ReportSummary {
    pub fn to_value(&self) -> Value {
        json!({
            "path": self.path.display().to_string(),
            "event_count": self.event_count,
            "artifact_count": self.artifact_count,
        })
    }
}

/// Writes a Markdown summary of the session into its artifact directory and
/// registers it as a `report` artifact.
pub fn generate_session_report(
    store: &SessionStore,
    session_id: &str,
) -> Result<ReportSummary, ExecutionError> {
    let events = store.get_session_events(session_id)?;
    let artifacts = store.get_session_artifacts(session_id)?;
    let created_at = store
        .get_session(session_id)?
        .map(|session| session.created_at.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());

    let markdown = render_report(session_id, &created_at, &events, &artifacts);
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let path = store
        .session_dir(session_id)?
        .join(format!("report-{}.md", &suffix[..12]));
    write_text_atomic(&path, &markdown)
        .map_err(|error| ExecutionError::Report(format!("{error:#}")))?;

    let metadata = json!({
        "event_count": events.len(),
        "artifact_count": artifacts.len(),
        "bytes": markdown.len(),
    });
    store.record_artifact(session_id, REPORT_ARTIFACT_KIND, &path, &metadata)?;
    tracing::info!(session_id, path = %path.display(), "generated session report");

    Ok(ReportSummary {
        path,
        event_count: events.len(),
        artifact_count: artifacts.len(),
    })
}

fn render_report(
    session_id: &str,
    created_at: &str,
    events: &[EventRecord],
    artifacts: &[ArtifactRecord],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Session report `{session_id}`");
    let _ = writeln!(out);
    let _ = writeln!(out, "- Created: {created_at}");
    let _ = writeln!(out, "- Events: {}", events.len());
    let _ = writeln!(out, "- Artifacts: {}", artifacts.len());
    let _ = writeln!(out);

    let _ = writeln!(out, "## Events");
    let _ = writeln!(out);
    if events.is_empty() {
        let _ = writeln!(out, "_No tool calls recorded._");
        let _ = writeln!(out);
    }
    for (index, event) in events.iter().enumerate() {
        let status = if event.output.get("error").is_some() {
            "failed"
        } else {
            "ok"
        };
        let _ = writeln!(
            out,
            "### {}. `{}` ({status}) at {}",
            index + 1,
            event.tool_name,
            event.timestamp.to_rfc3339()
        );
        let _ = writeln!(out);
        write_json_block(&mut out, "Input", &event.input);
        write_json_block(&mut out, "Output", &event.output);
    }

    let _ = writeln!(out, "## Artifacts");
    let _ = writeln!(out);
    if artifacts.is_empty() {
        let _ = writeln!(out, "_No artifacts recorded._");
    }
    for artifact in artifacts {
        let _ = writeln!(
            out,
            "- **{}** `{}` ({})",
            artifact.kind,
            artifact.path.display(),
            artifact.timestamp.to_rfc3339()
        );
    }
    out
}

fn write_json_block(out: &mut String, label: &str, value: &Value) {
    let rendered = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    let _ = writeln!(out, "{label}:");
    let _ = writeln!(out);
    let _ = writeln!(out, "```json");
    let _ = writeln!(out, "{}", truncate_for_report(&rendered, 4_000));
    let _ = writeln!(out, "```");
    let _ = writeln!(out);
}

fn truncate_for_report(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n... ({} bytes omitted)", &text[..cut], text.len() - cut)
}
