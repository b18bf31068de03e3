//! Capability providers
//!
//! A provider drives one full acquisition for one server: open the
//! transport, run the handshake, enumerate whatever the server advertised,
//! and tear everything down again. Failures are labeled with the phase they
//! happened in; cleanup runs exactly once on every path, success or not,
//! and never raises past the acquisition boundary.
//!
//! Two variants exist: [`LocalProvider`] for subprocess servers and
//! [`RemoteProvider`] for HTTP endpoints. Both share the same drive core,
//! so the phase/cleanup discipline cannot drift between them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::auth::TokenSource;
use crate::descriptor::{HeaderValueSource, LocalDescriptor, RemoteDescriptor, TransportMode};
use crate::diagnostics::{self, DiagnosticsCapture};
use crate::error::{ClassifiedError, ErrorKind, Phase};
use crate::events::{EventLevel, EventSink};
use crate::http::{HttpTransport, HttpTransportError, HttpWireMode};
use crate::protocol::AdvertisedCapabilities;
use crate::session::{ProtocolSession, SessionError, DEFAULT_REQUEST_TIMEOUT};
use crate::snapshot::CapabilitySnapshot;
use crate::transport::{StdioTransport, Transport};

/// Log category for acquisition records.
const CATEGORY: &str = "mcp.acquire";

/// Ceiling on the diagnostic excerpt embedded in a failure record.
const EXCERPT_CHARS: usize = 1024;

/// Tunables shared by both provider variants.
#[derive(Debug, Clone)]
pub struct AcquireConfig {
    /// Per-round-trip deadline inside the session
    pub request_timeout: Duration,

    /// Byte ceiling for captured diagnostic output
    pub diagnostics_limit_bytes: usize,

    /// Emit a debug record per phase transition
    pub verbose_phases: bool,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            diagnostics_limit_bytes: diagnostics::DEFAULT_LIMIT_BYTES,
            verbose_phases: crate::events::verbose_phase_records(),
        }
    }
}

/// A failure from the drive stage, not yet classified.
#[derive(Debug)]
struct DriveError {
    phase: Phase,
    source: SessionError,
}

impl DriveError {
    fn new(phase: Phase, source: SessionError) -> Self {
        Self { phase, source }
    }
}

fn classify(err: DriveError) -> ClassifiedError {
    let DriveError { phase, source } = err;
    match source {
        SessionError::Timeout(d) => ClassifiedError::new(
            phase,
            ErrorKind::Timeout,
            format!("no response within {:?}", d),
        ),
        SessionError::Transport(e) => {
            if let Some(HttpTransportError::Unauthorized { status }) =
                e.downcast_ref::<HttpTransportError>()
            {
                ClassifiedError::new(
                    phase,
                    ErrorKind::AuthorizationFailed,
                    format!("server rejected credentials (HTTP {})", status),
                )
            } else {
                ClassifiedError::new(phase, ErrorKind::ExecutionFailed, format!("{:#}", e))
            }
        }
        SessionError::Protocol(message) => {
            ClassifiedError::new(phase, ErrorKind::ExecutionFailed, message)
        }
        SessionError::MethodNotSupported(method) => ClassifiedError::new(
            phase,
            ErrorKind::ExecutionFailed,
            format!("server does not support required method {}", method),
        ),
    }
}

fn is_upgrade_required(err: &DriveError) -> bool {
    match &err.source {
        SessionError::Transport(e) => matches!(
            e.downcast_ref::<HttpTransportError>(),
            Some(HttpTransportError::UpgradeRequired)
        ),
        _ => false,
    }
}

fn phase_record(sink: &dyn EventSink, verbose: bool, server: &str, phase: Phase) {
    if verbose {
        sink.record(
            EventLevel::Debug,
            CATEGORY,
            "entering phase",
            &[("server", server), ("phase", phase.as_str())],
        );
    }
}

/// Enumerate one capability category, degrading "method not supported" to
/// an empty listing instead of failing the acquisition.
macro_rules! list_or_degrade {
    ($sink:expr, $verbose:expr, $server:expr, $phase:expr, $call:expr) => {{
        phase_record($sink, $verbose, $server, $phase);
        match $call.await {
            Ok(items) => items,
            Err(e) if e.is_method_not_supported() => {
                tracing::debug!(
                    "Server '{}' advertised {} but does not serve it; degrading to empty",
                    $server,
                    $phase.as_str()
                );
                Vec::new()
            }
            Err(e) => return Err(DriveError::new($phase, e)),
        }
    }};
}

async fn enumerate<T: Transport>(
    session: &mut ProtocolSession<T>,
    server: &str,
    sink: &dyn EventSink,
    verbose: bool,
) -> Result<CapabilitySnapshot, DriveError> {
    phase_record(sink, verbose, server, Phase::Initialize);
    let init = session
        .initialize()
        .await
        .map_err(|e| DriveError::new(Phase::Initialize, e))?;

    let AdvertisedCapabilities {
        tools,
        resources,
        prompts,
    } = init.capabilities;

    let tools = if tools {
        list_or_degrade!(sink, verbose, server, Phase::ListTools, session.list_tools())
    } else {
        Vec::new()
    };

    let resources = if resources {
        Some(list_or_degrade!(
            sink,
            verbose,
            server,
            Phase::ListResources,
            session.list_resources()
        ))
    } else {
        None
    };

    let prompts = if prompts {
        Some(list_or_degrade!(
            sink,
            verbose,
            server,
            Phase::ListPrompts,
            session.list_prompts()
        ))
    } else {
        None
    };

    Ok(CapabilitySnapshot {
        server_name: init.server_name,
        server_description: init.server_description,
        tools,
        resources,
        prompts,
    })
}

/// Run the session over a transport and unconditionally tear both down.
///
/// This is the shared core of both providers: the session shutdown and the
/// transport close happen exactly once whether enumeration succeeded or
/// failed at any phase, and teardown errors are logged and swallowed. The
/// transport is handed back so variant-specific cleanup (process
/// termination, diagnostics) can follow.
async fn drive<T: Transport>(
    transport: T,
    server: &str,
    config: &AcquireConfig,
    sink: &dyn EventSink,
) -> (Result<CapabilitySnapshot, DriveError>, T) {
    let mut session = ProtocolSession::new(transport, config.request_timeout);
    let result = enumerate(&mut session, server, sink, config.verbose_phases).await;

    session.shutdown().await;
    let mut transport = session.into_transport();
    if let Err(e) = transport.close().await {
        tracing::debug!("Transport close failed during cleanup: {:#}", e);
    }

    (result, transport)
}

/// Emit the single classifying failure record.
fn record_failure(
    sink: &dyn EventSink,
    server: &str,
    classified: &ClassifiedError,
    stderr_excerpt: Option<&str>,
) {
    let mut metadata = vec![
        ("server", server),
        ("phase", classified.phase.as_str()),
        ("kind", classified.kind.as_str()),
        ("detail", classified.message.as_str()),
    ];
    if let Some(excerpt) = stderr_excerpt {
        metadata.push(("stderr", excerpt));
    }
    sink.record(
        EventLevel::Error,
        CATEGORY,
        "acquisition failed",
        &metadata,
    );
}

/// Capability provider for local subprocess servers.
pub struct LocalProvider {
    config: AcquireConfig,
    sink: Arc<dyn EventSink>,
}

impl LocalProvider {
    /// Create a provider with the given configuration and log sink.
    pub fn new(config: AcquireConfig, sink: Arc<dyn EventSink>) -> Self {
        Self { config, sink }
    }

    /// Acquire a capability snapshot from a local server.
    ///
    /// Validates, builds the execution environment, resolves the
    /// executable, spawns, captures stderr on an independent task, drives
    /// the handshake, and cleans up whatever the outcome.
    pub async fn acquire(
        &self,
        descriptor: &LocalDescriptor,
    ) -> Result<CapabilitySnapshot, ClassifiedError> {
        descriptor.validate()?;
        let server = descriptor.name.as_str();

        let environment = descriptor.build_environment().await;
        let search_path = environment.get("PATH").cloned().unwrap_or_default();
        let program = crate::descriptor::resolve_executable(
            server,
            &descriptor.executable,
            &search_path,
            descriptor.working_directory.as_deref(),
        )?;

        phase_record(self.sink.as_ref(), self.config.verbose_phases, server, Phase::Connect);

        let (transport, stderr) = StdioTransport::spawn(
            &program,
            &descriptor.arguments,
            &environment,
            descriptor.working_directory.as_deref(),
        )
        .map_err(|e| {
            ClassifiedError::new(Phase::Connect, ErrorKind::ExecutionFailed, format!("{:#}", e))
        })?;

        let capture =
            DiagnosticsCapture::capture(stderr, self.config.diagnostics_limit_bytes);

        let (result, mut transport) =
            drive(transport, server, &self.config, self.sink.as_ref()).await;

        // The child must be gone before stderr can reach EOF.
        if let Err(e) = transport.terminate().await {
            tracing::debug!("Failed to terminate MCP server during cleanup: {:#}", e);
        }
        drop(transport);

        let captured = capture.collect().await;
        let excerpt = diagnostics::excerpt(&captured, EXCERPT_CHARS);

        match result {
            Ok(snapshot) => {
                if !excerpt.is_empty() {
                    self.sink.record(
                        EventLevel::Debug,
                        CATEGORY,
                        "server diagnostics",
                        &[("server", server), ("stderr", excerpt.as_str())],
                    );
                }
                Ok(snapshot)
            }
            Err(e) => {
                let classified = classify(e);
                let stderr_excerpt = (!excerpt.is_empty()).then_some(excerpt.as_str());
                record_failure(self.sink.as_ref(), server, &classified, stderr_excerpt);
                Err(classified)
            }
        }
    }
}

/// Capability provider for remote HTTP servers.
pub struct RemoteProvider {
    config: AcquireConfig,
    sink: Arc<dyn EventSink>,
    tokens: Arc<dyn TokenSource>,

    /// Wire mode that last succeeded per server, so `auto` descriptors
    /// skip the probe on repeat acquisitions.
    resolved_modes: Mutex<HashMap<String, HttpWireMode>>,
}

impl RemoteProvider {
    /// Create a provider with the given configuration, log sink and token
    /// source.
    pub fn new(
        config: AcquireConfig,
        sink: Arc<dyn EventSink>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            config,
            sink,
            tokens,
            resolved_modes: Mutex::new(HashMap::new()),
        }
    }

    /// The wire mode recorded from the last successful acquisition, if any.
    pub fn resolved_mode(&self, server_identity: &str) -> Option<HttpWireMode> {
        self.resolved_modes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(server_identity)
            .copied()
    }

    /// Acquire a capability snapshot from a remote server.
    pub async fn acquire(
        &self,
        descriptor: &RemoteDescriptor,
    ) -> Result<CapabilitySnapshot, ClassifiedError> {
        descriptor.validate()?;
        let server = descriptor.name.as_str();

        let headers = self.resolve_headers(descriptor).await.map_err(|e| {
            record_failure(self.sink.as_ref(), server, &e, None);
            e
        })?;

        let (mode, probing) = self.select_mode(descriptor);

        let result = self.attempt(descriptor, &headers, mode).await;
        let result = match result {
            Err(e) if probing && is_upgrade_required(&e) => {
                self.sink.record(
                    EventLevel::Debug,
                    CATEGORY,
                    "plain HTTP rejected; retrying with streaming transport",
                    &[("server", server)],
                );
                self.attempt(descriptor, &headers, HttpWireMode::Sse)
                    .await
                    .map(|snapshot| (snapshot, HttpWireMode::Sse))
            }
            other => other.map(|snapshot| (snapshot, mode)),
        };

        match result {
            Ok((snapshot, succeeded_mode)) => {
                self.resolved_modes
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(server.to_string(), succeeded_mode);
                Ok(snapshot)
            }
            Err(e) => {
                let classified = classify(e);
                if classified.kind == ErrorKind::AuthorizationFailed {
                    self.tokens.record_authorization_error(server);
                }
                record_failure(self.sink.as_ref(), server, &classified, None);
                Err(classified)
            }
        }
    }

    /// Resolve configured headers to literal values, substituting a fresh
    /// bearer token per attempt. The token never lands in the descriptor.
    async fn resolve_headers(
        &self,
        descriptor: &RemoteDescriptor,
    ) -> Result<Vec<(String, String)>, ClassifiedError> {
        let server = descriptor.name.as_str();

        let bearer = if descriptor.requires_bearer_token() {
            use crate::health::AuthorizationStatus;
            if self.tokens.authorization_status(server) == AuthorizationStatus::Unauthorized {
                return Err(ClassifiedError::new(
                    Phase::Connect,
                    ErrorKind::AuthorizationFailed,
                    format!("server '{}' is not authorized; sign in first", server),
                ));
            }
            let token = self
                .tokens
                .current_bearer_token(server)
                .await
                .map_err(|e| {
                    ClassifiedError::new(
                        Phase::Connect,
                        ErrorKind::AuthorizationFailed,
                        format!("failed to obtain bearer token: {:#}", e),
                    )
                })?;
            Some(token)
        } else {
            None
        };

        Ok(descriptor
            .headers
            .iter()
            .map(|h| {
                let value = match &h.value {
                    HeaderValueSource::Literal(v) => v.clone(),
                    HeaderValueSource::OauthBearer => bearer
                        .as_deref()
                        .map(|t| format!("Bearer {}", t))
                        .unwrap_or_default(),
                };
                (h.name.clone(), value)
            })
            .collect())
    }

    fn select_mode(&self, descriptor: &RemoteDescriptor) -> (HttpWireMode, bool) {
        match descriptor.transport_mode {
            TransportMode::HttpOnly => (HttpWireMode::Plain, false),
            TransportMode::HttpWithSse => (HttpWireMode::Sse, false),
            TransportMode::Auto => match self.resolved_mode(&descriptor.name) {
                Some(mode) => (mode, false),
                None => (HttpWireMode::Plain, true),
            },
        }
    }

    async fn attempt(
        &self,
        descriptor: &RemoteDescriptor,
        headers: &[(String, String)],
        mode: HttpWireMode,
    ) -> Result<CapabilitySnapshot, DriveError> {
        let server = descriptor.name.as_str();
        phase_record(self.sink.as_ref(), self.config.verbose_phases, server, Phase::Connect);

        let transport = HttpTransport::connect(
            descriptor.base_url.clone(),
            headers.to_vec(),
            mode,
            self.config.request_timeout,
        )
        .map_err(|e| DriveError::new(Phase::Connect, SessionError::Transport(e)))?;

        let (result, _transport) =
            drive(transport, server, &self.config, self.sink.as_ref()).await;
        result
    }
}
