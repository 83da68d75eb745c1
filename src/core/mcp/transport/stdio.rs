//! Local-process transport: newline-delimited JSON over a child's stdio

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::{Channel, TransportError};
use crate::core::mcp::config::{TransportConfig, TransportKind};
use crate::core::mcp::protocol::{IncomingMessage, OutgoingMessage};

/// Time a server gets to exit after stdin closes before it is killed
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Channel to a spawned server process
pub struct StdioChannel {
    server: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    queue: VecDeque<IncomingMessage>,
    stderr_task: Option<JoinHandle<()>>,
}

impl StdioChannel {
    /// Spawn the server process described by `config`.
    pub fn spawn(server: &str, config: &TransportConfig) -> Result<Self, TransportError> {
        let error = |message: String| TransportError::new(TransportKind::LocalProcess, server, message);

        let TransportConfig::LocalProcess {
            command,
            args,
            env,
            cwd,
        } = config
        else {
            return Err(error(format!("expected local-process transport, got {}", config.kind())));
        };

        tracing::info!(server = %server, cmd = %command, "starting MCP server");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| error(format!("failed to spawn '{command}'")).with_source(e))?;

        let stdin = child.stdin.take().ok_or_else(|| error("stdin not captured".to_string()))?;
        let stdout = child.stdout.take().ok_or_else(|| error("stdout not captured".to_string()))?;

        let stderr_task = child.stderr.take().map(|stderr| {
            let name = server.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %name, "stderr: {line}");
                }
            })
        });

        Ok(Self {
            server: server.to_string(),
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
            queue: VecDeque::new(),
            stderr_task,
        })
    }

    fn error(&self, message: impl Into<String>) -> TransportError {
        TransportError::new(TransportKind::LocalProcess, &self.server, message)
    }

    fn exit_description(&mut self) -> String {
        match self.child.try_wait() {
            Ok(Some(status)) => format!("server process exited ({status})"),
            _ => "server closed stdout".to_string(),
        }
    }
}

#[async_trait]
impl Channel for StdioChannel {
    fn kind(&self) -> TransportKind {
        TransportKind::LocalProcess
    }

    async fn send(&mut self, message: &OutgoingMessage) -> Result<(), TransportError> {
        let mut line = serde_json::to_string(message)
            .map_err(|e| self.error("failed to encode message").with_source(e))?;
        line.push('\n');

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(self.error("channel is closed"));
        };

        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;

        written.map_err(|e| self.error("failed to write to server").with_source(e))
    }

    async fn receive(&mut self) -> Result<IncomingMessage, TransportError> {
        loop {
            if let Some(message) = self.queue.pop_front() {
                return Ok(message);
            }

            let line = match self.stdout.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    let reason = self.exit_description();
                    return Err(self.error(reason));
                }
                Err(e) => return Err(self.error("failed to read from server").with_source(e)),
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let value: serde_json::Value = match serde_json::from_str(line) {
                Ok(value) => value,
                Err(e) => {
                    tracing::debug!(server = %self.server, error = %e, "skipping non-protocol output");
                    continue;
                }
            };
            match IncomingMessage::parse_all(value) {
                Ok(messages) => self.queue.extend(messages),
                Err(e) => {
                    tracing::warn!(server = %self.server, error = %e, "rejecting malformed JSON-RPC message");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // EOF on stdin asks the server to exit
        drop(self.stdin.take());

        match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.server, %status, "server process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(server = %self.server, error = %e, "failed to wait for server process");
            }
            Err(_) => {
                tracing::debug!(server = %self.server, "server did not exit, killing");
                self.child
                    .kill()
                    .await
                    .map_err(|e| self.error("failed to kill server process").with_source(e))?;
            }
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        Ok(())
    }
}
