//! Classified acquisition failures
//!
//! Every terminal acquisition failure is labeled with the phase it happened
//! in and a coarse kind. Phases map to the handshake steps; kinds decide how
//! callers react (reconfigure, re-authorize, back off).
//!
//! A protocol-level "unknown method" during an optional capability listing is
//! not represented here: the provider recovers it locally by degrading that
//! category to empty, so it never reaches the caller.

use std::fmt;

/// A named step within an acquisition, used for error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Spawning the subprocess or establishing the network connection
    Connect,

    /// The `initialize` round trip
    Initialize,

    /// The `tools/list` round trip
    ListTools,

    /// The `resources/list` round trip
    ListResources,

    /// The `prompts/list` round trip
    ListPrompts,
}

impl Phase {
    /// Stable phase name used in log records
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "spawn|connect",
            Self::Initialize => "initialize",
            Self::ListTools => "tools/list",
            Self::ListResources => "resources/list",
            Self::ListPrompts => "prompts/list",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse failure category surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Descriptor failed validation before any I/O
    InvalidConfiguration,

    /// Spawn, connection, protocol or decode failure
    ExecutionFailed,

    /// The server rejected our credentials (HTTP 401/403 equivalent)
    AuthorizationFailed,

    /// A round trip exceeded its deadline
    Timeout,
}

impl ErrorKind {
    /// Stable kind name used in log records
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration => "invalid_configuration",
            Self::ExecutionFailed => "execution_failed",
            Self::AuthorizationFailed => "authorization_failed",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminal acquisition failure: which phase, what kind, and why.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at {phase}: {message}")]
pub struct ClassifiedError {
    /// The phase the failure happened in
    pub phase: Phase,

    /// Coarse failure category
    pub kind: ErrorKind,

    /// Human-readable detail
    pub message: String,
}

impl ClassifiedError {
    /// Create a new classified error
    pub fn new(phase: Phase, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            phase,
            kind,
            message: message.into(),
        }
    }

    /// A validation failure, detected before any I/O.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::new(Phase::Connect, ErrorKind::InvalidConfiguration, message)
    }
}
