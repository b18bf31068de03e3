//! Transport layer
//!
//! Byte-stream abstraction for talking to MCP servers. Two implementations
//! exist: [`StdioTransport`] here (local subprocess over pipes) and
//! [`crate::http::HttpTransport`] (remote endpoint).
//!
//! The transport layer is responsible only for sending and receiving
//! messages. Protocol concerns (JSON-RPC formatting) live in the protocol
//! layer; handshake sequencing lives in the session layer.

use crate::protocol::{looks_like_response, McpNotification, McpRequest, McpResponse};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// Transport trait for MCP communication
///
/// All transports implement this trait, enabling the session layer to work
/// with different mechanisms (stdio, HTTP) behind one interface.
///
/// `close()` is idempotent and safe to call after a failed open; callers
/// rely on that during unconditional cleanup.
#[allow(async_fn_in_trait)]
pub trait Transport: Send {
    /// Send a request to the MCP server
    async fn send(&mut self, request: &McpRequest) -> Result<()>;

    /// Send a notification (no reply expected)
    async fn notify(&mut self, notification: &McpNotification) -> Result<()>;

    /// Receive the next response from the MCP server
    async fn recv(&mut self) -> Result<McpResponse>;

    /// Check if the transport is still connected
    fn is_connected(&self) -> bool;

    /// Tear the transport down. Idempotent, best-effort.
    async fn close(&mut self) -> Result<()>;
}

/// stdio transport for local MCP servers
///
/// Spawns the server as a child process and speaks line-framed JSON-RPC over
/// its stdin/stdout. The child's stderr is handed back to the caller at
/// spawn time so diagnostics capture can run on an independent task.
pub struct StdioTransport {
    /// Child process handle
    child: Option<Child>,

    /// stdin handle for sending requests
    stdin: ChildStdin,

    /// stdout handle for receiving responses
    stdout: BufReader<ChildStdout>,

    /// Spawned command line (for diagnostics)
    command: String,

    /// Whether the transport is still connected
    connected: bool,

    /// Reusable buffer for reading lines
    line_buffer: String,
}

impl StdioTransport {
    /// Spawn a server process with the given environment and working
    /// directory, returning the transport and the child's stderr stream.
    ///
    /// The environment map is applied on top of the inherited environment,
    /// so server-configured variables and the resolved `PATH` win without
    /// stripping basics like `HOME`.
    pub fn spawn(
        program: &Path,
        arguments: &[String],
        environment: &HashMap<String, String>,
        working_directory: Option<&Path>,
    ) -> Result<(Self, ChildStderr)> {
        tracing::debug!("Spawning MCP server: {}", program.display());

        let mut command = Command::new(program);
        command
            .args(arguments)
            .envs(environment)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = working_directory {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn MCP server {}", program.display()))?;

        let stdin = child.stdin.take().context("Failed to get child stdin")?;
        let stdout = child.stdout.take().context("Failed to get child stdout")?;
        let stderr = child.stderr.take().context("Failed to get child stderr")?;

        let transport = Self {
            child: Some(child),
            stdin,
            stdout: BufReader::new(stdout),
            command: format!("{} {}", program.display(), arguments.join(" ")),
            connected: true,
            line_buffer: String::with_capacity(4096),
        };

        Ok((transport, stderr))
    }

    /// Get the spawned command line (for diagnostics)
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Whether the child process is still running.
    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Kill the server process and wait for it to exit.
    ///
    /// Safe to call repeatedly; after the first call the child is gone and
    /// subsequent calls are no-ops.
    pub async fn terminate(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            tracing::debug!("Terminating MCP server: {}", self.command);
            child
                .kill()
                .await
                .context("Failed to kill MCP server process")?;
            self.connected = false;
        }
        Ok(())
    }

    /// Wait for the server process to exit naturally, returning its exit
    /// code.
    pub async fn wait(&mut self) -> Result<Option<i32>> {
        if let Some(mut child) = self.child.take() {
            let status = child
                .wait()
                .await
                .context("Failed to wait for MCP server process")?;
            self.connected = false;
            Ok(status.code())
        } else {
            Ok(None)
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // Can't await in Drop; just start the kill so nothing leaks.
        if let Some(mut child) = self.child.take() {
            tracing::debug!("Dropping StdioTransport, killing MCP server");
            let _ = child.start_kill();
        }
    }
}

impl StdioTransport {
    async fn write_line(&mut self, json: String) -> Result<()> {
        if !self.connected {
            return Err(anyhow::anyhow!("Transport is not connected"));
        }

        tracing::trace!("Sending to MCP server: {}", json);

        self.stdin
            .write_all(json.as_bytes())
            .await
            .context("Failed to write to MCP server stdin")?;
        self.stdin
            .write_all(b"\n")
            .await
            .context("Failed to write newline to MCP server stdin")?;
        self.stdin
            .flush()
            .await
            .context("Failed to flush MCP server stdin")?;

        Ok(())
    }
}

impl Transport for StdioTransport {
    async fn send(&mut self, request: &McpRequest) -> Result<()> {
        let json =
            serde_json::to_string(request).context("Failed to serialize MCP request to JSON")?;
        self.write_line(json).await
    }

    async fn notify(&mut self, notification: &McpNotification) -> Result<()> {
        let json = serde_json::to_string(notification)
            .context("Failed to serialize MCP notification to JSON")?;
        self.write_line(json).await
    }

    /// Receive the next JSON-RPC response from stdout.
    ///
    /// Reads line by line, skipping server-initiated notifications and
    /// undecodable output, until a response-shaped message arrives. A
    /// misbehaving server that never produces one runs into the session's
    /// request timeout, not an unbounded loop on a closed stream: EOF
    /// terminates with an error.
    async fn recv(&mut self) -> Result<McpResponse> {
        loop {
            if !self.connected {
                return Err(anyhow::anyhow!("Transport is not connected"));
            }

            self.line_buffer.clear();
            let bytes_read = self
                .stdout
                .read_line(&mut self.line_buffer)
                .await
                .context("Failed to read from MCP server stdout")?;

            if bytes_read == 0 {
                self.connected = false;
                return Err(anyhow::anyhow!("MCP server closed connection (EOF)"));
            }

            let line = self.line_buffer.trim();
            if line.is_empty() {
                continue;
            }

            tracing::trace!("Received from MCP server: {}", line);

            match serde_json::from_str::<serde_json::Value>(line) {
                Ok(value) if looks_like_response(&value) => {
                    return serde_json::from_value(value)
                        .context("Failed to decode MCP response");
                }
                Ok(_) => {
                    tracing::trace!("Skipping non-response message from server");
                }
                Err(e) => {
                    tracing::trace!("Skipping undecodable server output: {}", e);
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected && self.child.is_some()
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!("Failed to kill MCP server during close: {}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[cfg(unix)]
    fn write_script(content: &str) -> tempfile::TempPath {
        use std::os::unix::fs::PermissionsExt;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let path = file.into_temp_path();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn base_env() -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert(
            "PATH".to_string(),
            std::env::var("PATH").unwrap_or_default(),
        );
        env
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_echo_round_trip() {
        let script = write_script(
            "#!/bin/sh\nwhile IFS= read -r line; do printf '%s\\n' \"$line\"; done\n",
        );

        let (mut transport, _stderr) =
            StdioTransport::spawn(script.as_ref(), &[], &base_env(), None).unwrap();

        let request = McpRequest::new(1, "ping", None);
        transport.send(&request).await.unwrap();

        // The echo server reflects the request, which is not response-shaped,
        // so recv should keep waiting; give it a real response next.
        transport
            .notify(&McpNotification::new("noise", None))
            .await
            .unwrap();

        let response_line = r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#;
        transport
            .write_line(response_line.to_string())
            .await
            .unwrap();

        let response = transport.recv().await.unwrap();
        assert_eq!(response.id, 1);
        assert!(response.is_success());

        transport.terminate().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_recv_eof_when_process_exits() {
        let script = write_script("#!/bin/sh\nexit 0\n");

        let (mut transport, _stderr) =
            StdioTransport::spawn(script.as_ref(), &[], &base_env(), None).unwrap();

        let err = transport.recv().await.unwrap_err();
        assert!(err.to_string().contains("EOF"));
        assert!(!transport.is_connected());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_environment_reaches_child() {
        let script = write_script("#!/bin/sh\nprintf '%s\\n' \"$CAPSTAN_TEST_VALUE\"\n");

        let mut env = base_env();
        env.insert("CAPSTAN_TEST_VALUE".to_string(), "marker".to_string());

        let (mut transport, _stderr) =
            StdioTransport::spawn(script.as_ref(), &[], &env, None).unwrap();

        // The child prints the variable and exits; the line is not a
        // response, so recv ends with EOF after skipping it.
        let err = transport.recv().await.unwrap_err();
        assert!(err.to_string().contains("EOF"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_idempotent() {
        let script = write_script("#!/bin/sh\nsleep 100\n");

        let (mut transport, _stderr) =
            StdioTransport::spawn(script.as_ref(), &[], &base_env(), None).unwrap();

        assert!(transport.is_alive());
        transport.terminate().await.unwrap();
        assert!(!transport.is_connected());
        assert!(!transport.is_alive());

        // Second terminate is a no-op
        transport.terminate().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_idempotent() {
        let script = write_script("#!/bin/sh\nsleep 100\n");

        let (mut transport, _stderr) =
            StdioTransport::spawn(script.as_ref(), &[], &base_env(), None).unwrap();

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_connected());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_returns_exit_code() {
        let script = write_script("#!/bin/sh\nexit 42\n");

        let (mut transport, _stderr) =
            StdioTransport::spawn(script.as_ref(), &[], &base_env(), None).unwrap();

        let code = transport.wait().await.unwrap();
        assert_eq!(code, Some(42));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_spawn_failure_for_missing_binary() {
        let result = StdioTransport::spawn(
            Path::new("/no/such/binary/anywhere"),
            &[],
            &base_env(),
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_transport_trait_bounds() {
        fn assert_send<T: Send>() {}
        assert_send::<StdioTransport>();
    }
}
