use std::path::PathBuf;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use physics_worker::WorkerClientConfig;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "physics-mcp",
    about = "MCP server bridging physics tools to a compute worker process",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "PHYSICS_MCP_PYTHON",
        help = "Interpreter used to run the worker script; probed before well-known locations"
    )]
    pub python: Option<String>,

    #[arg(
        long = "worker-script",
        env = "PHYSICS_MCP_WORKER_SCRIPT",
        default_value = "packages/python-worker/worker.py",
        help = "Worker entry point executed by the interpreter"
    )]
    pub worker_script: PathBuf,

    #[arg(
        long = "state-dir",
        env = "PHYSICS_MCP_STATE_DIR",
        default_value = ".physics-mcp",
        help = "Directory holding the session database and artifact files"
    )]
    pub state_dir: PathBuf,

    #[arg(
        long = "session-id",
        env = "PHYSICS_MCP_SESSION_ID",
        help = "Session recorded for calls without a session_id argument; generated when unset"
    )]
    pub session_id: Option<String>,

    #[arg(
        long = "call-timeout-ms",
        env = "PHYSICS_MCP_CALL_TIMEOUT_MS",
        default_value_t = 120_000,
        help = "Per-call worker deadline in milliseconds; 0 waits indefinitely"
    )]
    pub call_timeout_ms: u64,

    #[arg(
        long = "disabled-tools",
        env = "PHYSICS_MCP_DISABLED_TOOLS",
        value_delimiter = ',',
        help = "Comma-separated tool names hidden from tools/list and rejected on call"
    )]
    pub disabled_tools: Vec<String>,

    #[arg(
        long = "strip-inline-payloads",
        env = "PHYSICS_MCP_STRIP_INLINE_PAYLOADS",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
        help = "Replace persisted image/csv/svg payloads in results with a file reference"
    )]
    pub strip_inline_payloads: bool,

    #[arg(
        long,
        env = "PHYSICS_MCP_DEBUG",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
        help = "Verbose diagnostics on stderr, including unredacted worker payloads"
    )]
    pub debug: bool,
}

impl Cli {
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_ms > 0).then(|| Duration::from_millis(self.call_timeout_ms))
    }

    pub fn worker_client_config(&self) -> WorkerClientConfig {
        WorkerClientConfig {
            call_timeout: self.call_timeout(),
            log_payloads: self.debug,
            ..WorkerClientConfig::default()
        }
    }

    pub fn disabled_tools(&self) -> Vec<String> {
        self.disabled_tools
            .iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }
}
