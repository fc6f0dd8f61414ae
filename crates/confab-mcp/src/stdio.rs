//! Stdio transport: a tool server as a child process.
//!
//! Messages are newline-delimited JSON on the child's stdin/stdout, per the
//! MCP stdio convention. The child's stderr is inherited so server logs land
//! in the gateway's log stream. Closing the transport drops the pipes and
//! kills the child; `kill_on_drop` backstops abnormal exits.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, trace};

use crate::config::McpServerConfig;
use crate::error::{McpError, McpResult};
use crate::protocol::JsonRpcMessage;
use crate::transport::Transport;

pub struct StdioTransport {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl StdioTransport {
    /// Spawn the configured command and wire up its pipes.
    pub async fn spawn(config: &McpServerConfig, project_root: &Path) -> McpResult<Self> {
        let program = config
            .command
            .as_deref()
            .ok_or_else(|| McpError::config("stdio server requires a command"))?;

        let mut command = Command::new(program);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(cwd) = config.resolved_cwd(project_root)? {
            command.current_dir(cwd);
        }
        for (name, value) in &config.env {
            command.env(name, value);
        }

        let mut child = command
            .spawn()
            .map_err(|e| McpError::connection(format!("failed to spawn {program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::connection("child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::connection("child stdout unavailable"))?;

        debug!(program, "spawned stdio MCP server");
        Ok(Self {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
        })
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn send(&mut self, message: JsonRpcMessage) -> McpResult<()> {
        let line = serde_json::to_string(&message)?;
        trace!(bytes = line.len(), "stdio send");
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> McpResult<JsonRpcMessage> {
        loop {
            let mut line = String::new();
            let read = self.stdout.read_line(&mut line).await?;
            if read == 0 {
                return Err(McpError::ConnectionClosed);
            }
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                continue;
            }
            trace!(bytes = trimmed.len(), "stdio recv");
            return serde_json::from_str(trimmed)
                .map_err(|e| McpError::protocol(format!("malformed message from server: {e}")));
        }
    }

    async fn close(&mut self) -> McpResult<()> {
        // Dropping stdin signals EOF; give the child a moment, then kill.
        self.stdin.shutdown().await.ok();
        match self.child.try_wait() {
            Ok(Some(status)) => debug!(?status, "stdio server exited"),
            _ => {
                self.child.kill().await.ok();
            }
        }
        Ok(())
    }
}
