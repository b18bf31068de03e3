//! Protocol session layer
//!
//! Layers the MCP request/response discipline on top of a [`Transport`]:
//! the initialize handshake, capability-gated listing calls, and a
//! best-effort shutdown. Request IDs increase monotonically; every round
//! trip runs under the session's request timeout.
//!
//! A server answering a listing call with the JSON-RPC "method not found"
//! error surfaces as [`SessionError::MethodNotSupported`], which the
//! provider recovers locally; every other failure is terminal for the
//! acquisition.

use crate::protocol::{
    AdvertisedCapabilities, InitializeOutcome, InitializeParams, McpNotification, McpRequest,
};
use crate::snapshot::{PromptDescriptor, ResourceDescriptor, ToolDescriptor};
use crate::transport::Transport;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::timeout;

/// Default per-round-trip deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on cursor-following for one listing call. A server that
/// hands out cursors forever is misbehaving, not large.
const MAX_LIST_PAGES: usize = 100;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created but not initialized
    Created,

    /// Initialize round trip in flight
    Initializing,

    /// Handshake complete, listing calls allowed
    Ready,

    /// Shut down; no further traffic
    Shutdown,
}

/// Failures produced by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The server answered with JSON-RPC "method not found"
    #[error("server does not support {0}")]
    MethodNotSupported(String),

    /// The round trip exceeded the request timeout
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The transport failed (I/O, HTTP, process death)
    #[error(transparent)]
    Transport(#[from] anyhow::Error),

    /// The server answered, but with an error or an undecodable payload
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    /// Whether this is the locally recoverable "unknown method" case.
    pub fn is_method_not_supported(&self) -> bool {
        matches!(self, Self::MethodNotSupported(_))
    }
}

/// A protocol session over one transport.
pub struct ProtocolSession<T: Transport> {
    transport: T,
    next_id: AtomicU64,
    request_timeout: Duration,
    state: SessionState,
    advertised: Option<AdvertisedCapabilities>,
}

impl<T: Transport> ProtocolSession<T> {
    /// Create a session over `transport` with the given per-request
    /// timeout.
    pub fn new(transport: T, request_timeout: Duration) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
            request_timeout,
            state: SessionState::Created,
            advertised: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Capability flags from the initialize response, once available
    pub fn advertised_capabilities(&self) -> Option<AdvertisedCapabilities> {
        self.advertised
    }

    /// Give the transport back for cleanup after the session is done.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// One request/response exchange under the request timeout.
    ///
    /// Responses for other request IDs (stale replies from a confused
    /// server) are skipped rather than mismatched.
    async fn round_trip(&mut self, method: &str, params: Option<Value>) -> Result<Value, SessionError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = McpRequest::new(id, method, params);
        let deadline = self.request_timeout;

        let transport = &mut self.transport;
        let exchange = async {
            transport.send(&request).await?;
            loop {
                let response = transport.recv().await?;
                if response.id == id {
                    return Ok::<_, anyhow::Error>(response);
                }
                tracing::trace!("Skipping response for unexpected request id {}", response.id);
            }
        };

        let response = timeout(deadline, exchange)
            .await
            .map_err(|_| SessionError::Timeout(deadline))??;

        match response.into_result() {
            Ok(value) => Ok(value),
            Err(e) if e.is_method_not_found() => {
                Err(SessionError::MethodNotSupported(method.to_string()))
            }
            Err(e) => Err(SessionError::Protocol(format!("{} failed: {}", method, e))),
        }
    }

    /// Perform the initialize handshake and decode the server's identity
    /// and advertised capabilities.
    pub async fn initialize(&mut self) -> Result<InitializeOutcome, SessionError> {
        if self.state != SessionState::Created {
            return Err(SessionError::Protocol(format!(
                "cannot initialize in state {:?}",
                self.state
            )));
        }
        if !self.transport.is_connected() {
            return Err(SessionError::Protocol(
                "cannot initialize: transport is disconnected".to_string(),
            ));
        }

        self.state = SessionState::Initializing;

        let params = serde_json::to_value(InitializeParams::current())
            .map_err(|e| SessionError::Protocol(format!("initialize params: {}", e)))?;
        let result = self.round_trip("initialize", Some(params)).await?;

        let outcome = InitializeOutcome::from_result(result)
            .map_err(|e| SessionError::Protocol(format!("undecodable initialize result: {}", e)))?;

        // Handshake completion; servers expect this before any listing.
        timeout(
            self.request_timeout,
            self.transport.notify(&McpNotification::initialized()),
        )
        .await
        .map_err(|_| SessionError::Timeout(self.request_timeout))??;

        self.advertised = Some(outcome.capabilities);
        self.state = SessionState::Ready;

        tracing::debug!(
            "MCP session ready: {} (protocol {})",
            outcome.server_name.as_deref().unwrap_or("unnamed server"),
            outcome.protocol_version.as_deref().unwrap_or("unknown"),
        );

        Ok(outcome)
    }

    /// List the server's tools, following pagination cursors.
    pub async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, SessionError> {
        #[derive(Deserialize)]
        struct Page {
            #[serde(default)]
            tools: Vec<ToolDescriptor>,
            #[serde(rename = "nextCursor", default)]
            next_cursor: Option<String>,
        }

        self.list_paged("tools/list", |page: Page| (page.tools, page.next_cursor))
            .await
    }

    /// List the server's resources, following pagination cursors.
    pub async fn list_resources(&mut self) -> Result<Vec<ResourceDescriptor>, SessionError> {
        #[derive(Deserialize)]
        struct Page {
            #[serde(default)]
            resources: Vec<ResourceDescriptor>,
            #[serde(rename = "nextCursor", default)]
            next_cursor: Option<String>,
        }

        self.list_paged("resources/list", |page: Page| {
            (page.resources, page.next_cursor)
        })
        .await
    }

    /// List the server's prompts, following pagination cursors.
    pub async fn list_prompts(&mut self) -> Result<Vec<PromptDescriptor>, SessionError> {
        #[derive(Deserialize)]
        struct Page {
            #[serde(default)]
            prompts: Vec<PromptDescriptor>,
            #[serde(rename = "nextCursor", default)]
            next_cursor: Option<String>,
        }

        self.list_paged("prompts/list", |page: Page| (page.prompts, page.next_cursor))
            .await
    }

    async fn list_paged<P, I>(
        &mut self,
        method: &str,
        decode: impl Fn(P) -> (Vec<I>, Option<String>),
    ) -> Result<Vec<I>, SessionError>
    where
        P: serde::de::DeserializeOwned,
    {
        self.ensure_ready()?;

        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.round_trip(method, params).await?;

            let page: P = serde_json::from_value(result)
                .map_err(|e| SessionError::Protocol(format!("undecodable {} result: {}", method, e)))?;

            let (mut page_items, next) = decode(page);
            items.append(&mut page_items);

            match next {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => return Ok(items),
            }
        }

        Err(SessionError::Protocol(format!(
            "{} exceeded {} pagination pages",
            method, MAX_LIST_PAGES
        )))
    }

    /// Wind the session down. Best-effort: never raises, safe on an
    /// already-broken or already-shut session. Transport teardown is the
    /// owner's job afterwards.
    pub async fn shutdown(&mut self) {
        if self.state != SessionState::Shutdown {
            tracing::debug!("Shutting down MCP session");
            self.state = SessionState::Shutdown;
        }
    }

    fn ensure_ready(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Ready => Ok(()),
            other => Err(SessionError::Protocol(format!(
                "session not ready for listing calls (state {:?})",
                other
            ))),
        }
    }
}
