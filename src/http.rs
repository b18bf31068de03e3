//! HTTP transport for remote MCP servers
//!
//! JSON-RPC messages are carried as HTTP POST bodies. Two wire modes exist:
//!
//! 1. **Plain**: one-shot POST with an `application/json` response
//! 2. **SSE**: the streamable mode, where the server answers the POST with a
//!    `text/event-stream` body and the response arrives as an event frame
//!
//! The transport reports mode mismatches and authorization rejections as
//! typed errors so the provider can fall back to the streaming mode (for
//! `auto` descriptors) or classify the failure as an authorization problem.

use crate::protocol::{looks_like_response, McpNotification, McpRequest, McpResponse};
use anyhow::{Context, Result};
use bytes::BytesMut;
use futures::StreamExt;
use std::time::Duration;

/// HTTP header carrying the server-assigned session identifier.
const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Resolved HTTP wire mode for one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpWireMode {
    /// One-shot POST, JSON response
    Plain,

    /// POST answered with a server-sent event stream
    Sse,
}

impl HttpWireMode {
    /// Stable name used in log records
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "http",
            Self::Sse => "http+sse",
        }
    }
}

/// Typed HTTP transport failures the provider inspects.
#[derive(Debug, thiserror::Error)]
pub enum HttpTransportError {
    /// The server rejected our credentials.
    #[error("authorization rejected with HTTP status {status}")]
    Unauthorized {
        /// The HTTP status code (401 or 403)
        status: u16,
    },

    /// The plain-HTTP request was answered in a way that signals the
    /// streaming transport is required.
    #[error("server requires the streaming transport")]
    UpgradeRequired,
}

/// HTTP transport for remote MCP servers
///
/// Each request/response pair is a separate HTTP transaction; the response
/// is buffered during `send` and handed out by `recv`, mirroring the
/// request/reply discipline of the pipe transport.
pub struct HttpTransport {
    /// Reqwest HTTP client
    client: reqwest::Client,

    /// MCP server endpoint URL
    url: String,

    /// Resolved header values sent with every request
    headers: Vec<(String, String)>,

    /// Wire mode this transport speaks
    mode: HttpWireMode,

    /// Server-assigned session id, echoed once learned
    session_id: Option<String>,

    /// Response buffered by the last send
    buffered: Option<McpResponse>,

    /// Connection state
    connected: bool,
}

impl HttpTransport {
    /// Create a transport for the given endpoint.
    ///
    /// `headers` are fully resolved literal values; bearer substitution
    /// happens in the provider before the transport exists.
    pub fn connect(
        url: impl Into<String>,
        headers: Vec<(String, String)>,
        mode: HttpWireMode,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
            headers,
            mode,
            session_id: None,
            buffered: None,
            connected: true,
        })
    }

    /// The endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The wire mode this transport speaks
    pub fn mode(&self) -> HttpWireMode {
        self.mode
    }

    fn build_post(&self, body: String) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(body);

        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if let Some(id) = &self.session_id {
            request = request.header(SESSION_ID_HEADER, id);
        }
        request
    }

    /// Map rejection statuses to typed errors the provider understands.
    fn check_status(&self, status: reqwest::StatusCode) -> Result<()> {
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(HttpTransportError::Unauthorized {
                status: status.as_u16(),
            }
            .into());
        }

        if self.mode == HttpWireMode::Plain
            && (status == reqwest::StatusCode::METHOD_NOT_ALLOWED
                || status == reqwest::StatusCode::NOT_ACCEPTABLE)
        {
            return Err(HttpTransportError::UpgradeRequired.into());
        }

        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "HTTP request failed with status: {}",
                status
            ));
        }

        Ok(())
    }

    fn remember_session_id(&mut self, response: &reqwest::Response) {
        if self.session_id.is_none() {
            if let Some(id) = response
                .headers()
                .get(SESSION_ID_HEADER)
                .and_then(|v| v.to_str().ok())
            {
                tracing::debug!("Server assigned MCP session id");
                self.session_id = Some(id.to_string());
            }
        }
    }

    async fn read_response(&mut self, response: reqwest::Response) -> Result<McpResponse> {
        let event_stream = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map_or(false, |ct| ct.starts_with("text/event-stream"));

        if event_stream {
            if self.mode == HttpWireMode::Plain {
                // The plain probe got a stream back: the caller must retry
                // in streaming mode.
                return Err(HttpTransportError::UpgradeRequired.into());
            }
            read_sse_response(response).await
        } else {
            let text = response
                .text()
                .await
                .context("Failed to read HTTP response body")?;

            tracing::trace!("Received HTTP response: {}", text);

            serde_json::from_str(&text)
                .with_context(|| format!("Failed to decode MCP response from JSON: {}", text))
        }
    }
}

impl crate::transport::Transport for HttpTransport {
    /// Send a request and buffer the server's reply for `recv`.
    async fn send(&mut self, request: &McpRequest) -> Result<()> {
        if !self.connected {
            return Err(anyhow::anyhow!("Transport is not connected"));
        }

        let json =
            serde_json::to_string(request).context("Failed to serialize MCP request to JSON")?;

        tracing::trace!("Sending HTTP POST to {}: {}", self.url, json);

        let response = self
            .build_post(json)
            .send()
            .await
            .context("Failed to send HTTP request")?;

        self.check_status(response.status())?;
        self.remember_session_id(&response);

        let mcp_response = self.read_response(response).await?;
        self.buffered = Some(mcp_response);
        Ok(())
    }

    /// Fire-and-forget notification; the server acknowledges with a bare
    /// status (202 Accepted in the streamable protocol).
    async fn notify(&mut self, notification: &McpNotification) -> Result<()> {
        if !self.connected {
            return Err(anyhow::anyhow!("Transport is not connected"));
        }

        let json = serde_json::to_string(notification)
            .context("Failed to serialize MCP notification to JSON")?;

        let response = self
            .build_post(json)
            .send()
            .await
            .context("Failed to send HTTP notification")?;

        self.check_status(response.status())?;
        Ok(())
    }

    /// Return the response buffered by the last `send`.
    async fn recv(&mut self) -> Result<McpResponse> {
        if !self.connected {
            return Err(anyhow::anyhow!("Transport is not connected"));
        }

        self.buffered.take().ok_or_else(|| {
            anyhow::anyhow!("No buffered response available - send a request first")
        })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.buffered = None;
        Ok(())
    }
}

/// Read an event stream until the first response-shaped JSON-RPC message.
///
/// Servers may push their own notifications as earlier events; those are
/// skipped. The stream is dropped as soon as the response arrives.
async fn read_sse_response(response: reqwest::Response) -> Result<McpResponse> {
    let mut stream = response.bytes_stream();
    let mut decoder = SseFrameDecoder::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Failed to read event stream")?;
        for data in decoder.push(&chunk) {
            match serde_json::from_str::<serde_json::Value>(&data) {
                Ok(value) if looks_like_response(&value) => {
                    return serde_json::from_value(value)
                        .context("Failed to decode MCP response from event data");
                }
                Ok(_) => tracing::trace!("Skipping non-response event"),
                Err(e) => tracing::trace!("Skipping undecodable event data: {}", e),
            }
        }
    }

    Err(anyhow::anyhow!(
        "Event stream ended without a response message"
    ))
}

/// Incremental server-sent-event frame decoder.
///
/// Feeds on raw body chunks and yields the `data` payload of each completed
/// event. Comment lines and `event:`/`id:`/`retry:` fields are ignored;
/// multi-line data is joined with newlines per the SSE format.
struct SseFrameDecoder {
    pending: BytesMut,
    data: String,
}

impl SseFrameDecoder {
    fn new() -> Self {
        Self {
            pending: BytesMut::new(),
            data: String::new(),
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut completed = Vec::new();

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line_bytes = self.pending.split_to(pos + 1);
            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                // Blank line terminates the event.
                if !self.data.is_empty() {
                    completed.push(std::mem::take(&mut self.data));
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                if !self.data.is_empty() {
                    self.data.push('\n');
                }
                self.data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
            }
            // Other fields (event:, id:, retry:, comments) are ignored.
        }

        completed
    }
}
