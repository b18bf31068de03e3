//! Structured log records
//!
//! Acquisitions report through an injected [`EventSink`] rather than ambient
//! global state, so they stay independently testable with fake sinks. The
//! production sink forwards to `tracing`.
//!
//! Three record families exist: phase transitions (debug, gated behind the
//! `CAPSTAN_MCP_DEBUG` environment toggle), captured diagnostic output, and
//! exactly one error record per terminal failure.

/// Record severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    /// Diagnostic detail
    Debug,

    /// Notable but healthy
    Info,

    /// Terminal failure
    Error,
}

/// Structured log sink.
///
/// `metadata` is a flat list of key/value pairs; keys are stable short
/// names (`server`, `phase`, `kind`, `stderr`, ...).
pub trait EventSink: Send + Sync {
    /// Write one record.
    fn record(&self, level: EventLevel, category: &str, message: &str, metadata: &[(&str, &str)]);
}

/// Production sink forwarding to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, level: EventLevel, category: &str, message: &str, metadata: &[(&str, &str)]) {
        let metadata = metadata
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ");

        match level {
            EventLevel::Debug => tracing::debug!(target: "capstan", "[{}] {} {}", category, message, metadata),
            EventLevel::Info => tracing::info!(target: "capstan", "[{}] {} {}", category, message, metadata),
            EventLevel::Error => tracing::error!(target: "capstan", "[{}] {} {}", category, message, metadata),
        }
    }
}

/// Whether verbose per-phase records are enabled for this process.
///
/// Controlled by the `CAPSTAN_MCP_DEBUG` environment variable; any
/// non-empty value other than `0` enables them.
pub fn verbose_phase_records() -> bool {
    std::env::var("CAPSTAN_MCP_DEBUG")
        .map(|v| !v.is_empty() && v != "0")
        .unwrap_or(false)
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingSink;
    use super::*;

    #[test]
    fn test_recording_sink_captures_metadata() {
        let sink = RecordingSink::default();
        sink.record(
            EventLevel::Error,
            "mcp.acquire",
            "acquisition failed",
            &[("phase", "initialize"), ("kind", "timeout")],
        );

        let records = sink.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, EventLevel::Error);
        assert_eq!(records[0].category, "mcp.acquire");
        assert_eq!(
            records[0].metadata,
            vec![
                ("phase".to_string(), "initialize".to_string()),
                ("kind".to_string(), "timeout".to_string())
            ]
        );
    }

    #[test]
    fn test_tracing_sink_does_not_panic() {
        let sink = TracingSink;
        sink.record(EventLevel::Debug, "mcp.acquire", "phase", &[]);
        sink.record(EventLevel::Info, "mcp.acquire", "ok", &[("a", "b")]);
        sink.record(EventLevel::Error, "mcp.acquire", "failed", &[]);
    }
}
