//! Owns one worker child process and the line framing of its stdio.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::{TerminationCause, WorkerError, WorkerResult};
use crate::executable::WorkerLauncher;
use crate::protocol::decode_worker_line;

/// Receives decoded stdout messages and the single termination notice per process.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn on_line(&self, message: Value);
    fn on_terminated(&self, generation: u64, cause: TerminationCause);
}

/// Observable lifecycle of the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Running { generation: u64, pid: Option<u32> },
    Terminated(TerminationCause),
}

enum ConnectionState {
    Idle,
    Running(RunningWorker),
    Terminated(TerminationCause),
}

struct RunningWorker {
    generation: u64,
    pid: Option<u32>,
    /// Lines queued for the stdin writer task.
    outbound: mpsc::UnboundedSender<String>,
    kill_tx: Option<oneshot::Sender<()>>,
}

/// Single worker process plus its reader, writer, and supervisor tasks.
///
/// The state lock is only held for short bookkeeping; resolving the launch
/// command and writing to stdin both happen outside it, so `status` and `kill`
/// stay responsive while a start is probing or the worker stops reading.
pub struct WorkerConnection {
    launcher: Arc<dyn WorkerLauncher>,
    handler: Arc<dyn ConnectionHandler>,
    state: Arc<Mutex<ConnectionState>>,
    /// Serializes starts so concurrent callers never spawn twice.
    start_lock: Mutex<()>,
    next_generation: AtomicU64,
}

impl WorkerConnection {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, handler: Arc<dyn ConnectionHandler>) -> Self {
        Self {
            launcher,
            handler,
            state: Arc::new(Mutex::new(ConnectionState::Idle)),
            start_lock: Mutex::new(()),
            next_generation: AtomicU64::new(0),
        }
    }

    pub async fn status(&self) -> ConnectionStatus {
        match &*self.state.lock().await {
            ConnectionState::Idle => ConnectionStatus::Idle,
            ConnectionState::Running(worker) => ConnectionStatus::Running {
                generation: worker.generation,
                pid: worker.pid,
            },
            ConnectionState::Terminated(cause) => ConnectionStatus::Terminated(cause.clone()),
        }
    }

    /// Spawns the worker unless one is already running. Returns the live generation.
    pub async fn start(&self) -> WorkerResult<u64> {
        let _starting = self.start_lock.lock().await;
        if let ConnectionState::Running(worker) = &*self.state.lock().await {
            return Ok(worker.generation);
        }

        // Launchers may probe interpreters with blocking process calls.
        let launcher = self.launcher.clone();
        let launch = tokio::task::spawn_blocking(move || launcher.command())
            .await
            .map_err(|error| WorkerError::Spawn {
                program: "worker launcher".to_string(),
                message: error.to_string(),
            })??;

        // Held until the new worker is recorded so its supervisor cannot
        // observe a stale state.
        let mut state = self.state.lock().await;
        let mut command = Command::new(&launch.program);
        command
            .args(&launch.args)
            .envs(&launch.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(cwd) = &launch.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|error| WorkerError::Spawn {
            program: launch.program.clone(),
            message: error.to_string(),
        })?;
        let stdin = child.stdin.take().ok_or_else(|| WorkerError::Spawn {
            program: launch.program.clone(),
            message: "stdin pipe unavailable".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| WorkerError::Spawn {
            program: launch.program.clone(),
            message: "stdout pipe unavailable".to_string(),
        })?;

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_worker_lines(stdin, outbound_rx, generation));
        let reader = tokio::spawn(read_worker_lines(stdout, self.handler.clone(), generation));
        tokio::spawn(supervise_worker(
            child,
            kill_rx,
            reader,
            self.state.clone(),
            self.handler.clone(),
            generation,
        ));

        tracing::info!(
            program = %launch.program,
            pid = pid.unwrap_or_default(),
            generation,
            "started worker process"
        );
        *state = ConnectionState::Running(RunningWorker {
            generation,
            pid,
            outbound,
            kill_tx: Some(kill_tx),
        });
        Ok(generation)
    }

    /// Queues one JSON object plus `\n` for the worker of `generation`.
    ///
    /// Returns once the line is handed to the writer task; it never waits on a
    /// worker that has stopped draining stdin.
    pub async fn send<T: Serialize>(&self, generation: u64, message: &T) -> WorkerResult<()> {
        let mut line =
            serde_json::to_string(message).map_err(|error| WorkerError::Encode(error.to_string()))?;
        line.push('\n');

        let state = self.state.lock().await;
        match &*state {
            ConnectionState::Running(worker) if worker.generation == generation => worker
                .outbound
                .send(line)
                .map_err(|_| WorkerError::Write("worker stdin writer has stopped".to_string())),
            ConnectionState::Terminated(cause) => Err(WorkerError::Terminated(cause.clone())),
            _ => Err(WorkerError::NotRunning),
        }
    }

    /// Kills the running worker, if any. Returns whether a process was signalled.
    pub async fn kill(&self) -> bool {
        let mut state = self.state.lock().await;
        let previous = std::mem::replace(
            &mut *state,
            ConnectionState::Terminated(TerminationCause::Killed),
        );
        match previous {
            ConnectionState::Running(mut worker) => {
                if let Some(kill_tx) = worker.kill_tx.take() {
                    let _ = kill_tx.send(());
                }
                tracing::info!(generation = worker.generation, "killing worker process");
                true
            }
            other => {
                *state = other;
                false
            }
        }
    }
}

impl Drop for WorkerConnection {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_lock() {
            if let ConnectionState::Running(worker) = &mut *state {
                if let Some(kill_tx) = worker.kill_tx.take() {
                    let _ = kill_tx.send(());
                }
            }
        }
    }
}

async fn write_worker_lines(
    mut stdin: ChildStdin,
    mut lines: mpsc::UnboundedReceiver<String>,
    generation: u64,
) {
    while let Some(line) = lines.recv().await {
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(error) = written {
            tracing::error!(generation, %error, "failed to write worker request");
            break;
        }
    }
    tracing::debug!(generation, "worker stdin closed");
}

async fn read_worker_lines(
    stdout: ChildStdout,
    handler: Arc<dyn ConnectionHandler>,
    generation: u64,
) {
    let mut reader = BufReader::new(stdout);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buffer);
                match decode_worker_line(&line) {
                    None => {}
                    Some(Ok(message)) => handler.on_line(message),
                    Some(Err(error)) => {
                        tracing::warn!(
                            generation,
                            %error,
                            bytes = buffer.len(),
                            "dropping malformed worker output line"
                        );
                    }
                }
            }
            Err(error) => {
                tracing::error!(generation, %error, "failed to read worker stdout");
                break;
            }
        }
    }
    tracing::debug!(generation, "worker stdout closed");
}

async fn supervise_worker(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    reader: JoinHandle<()>,
    state: Arc<Mutex<ConnectionState>>,
    handler: Arc<dyn ConnectionHandler>,
    generation: u64,
) {
    let exit = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill_rx => None,
    };
    let cause = match exit {
        Some(Ok(status)) => TerminationCause::Exited {
            code: status.code(),
        },
        Some(Err(error)) => TerminationCause::WaitFailed(error.to_string()),
        None => {
            if let Err(error) = child.kill().await {
                tracing::warn!(generation, %error, "failed to kill worker process");
            }
            TerminationCause::Killed
        }
    };

    // Drain stdout first so replies written just before exit still resolve.
    if let Err(error) = reader.await {
        tracing::warn!(generation, %error, "worker stdout reader task failed");
    }

    {
        let mut state = state.lock().await;
        if matches!(&*state, ConnectionState::Running(worker) if worker.generation == generation) {
            *state = ConnectionState::Terminated(cause.clone());
        }
    }
    tracing::warn!(generation, %cause, "worker process terminated");
    handler.on_terminated(generation, cause);
}
