//! Bounded diagnostics capture
//!
//! Accumulates a transport's side-channel output (a subprocess's stderr) up
//! to a fixed byte ceiling, on a task independent from protocol traffic. A
//! server that floods stderr can therefore never stall protocol reads or
//! writes, and back-pressure on the protocol never blocks stderr draining.
//!
//! Past the ceiling further input is discarded silently; the cap bounds
//! memory, it does not signal truncation.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

/// Default capture ceiling: 64 KiB of diagnostic output per acquisition.
pub const DEFAULT_LIMIT_BYTES: usize = 64 * 1024;

/// How long `collect` waits for the reader task after the source should
/// already be closed.
const JOIN_WAIT: Duration = Duration::from_secs(2);

/// Handle to an in-flight capture task.
pub struct DiagnosticsCapture {
    handle: JoinHandle<Vec<u8>>,
}

impl DiagnosticsCapture {
    /// Start capturing from `source` on a dedicated task.
    ///
    /// The task keeps draining the source after the limit is reached so the
    /// writing process never blocks on a full pipe.
    pub fn capture<R>(source: R, limit_bytes: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let handle = tokio::spawn(read_capped(source, limit_bytes));
        Self { handle }
    }

    /// Wait (bounded) for the capture task and return what it accumulated.
    ///
    /// Returns empty bytes if the task cannot be joined in time; the source
    /// is expected to be closed (process terminated) before calling this.
    pub async fn collect(mut self) -> Vec<u8> {
        match timeout(JOIN_WAIT, &mut self.handle).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                tracing::debug!("Diagnostics capture task failed to join: {}", e);
                Vec::new()
            }
            Err(_) => {
                tracing::debug!("Diagnostics capture task still running; abandoning it");
                self.handle.abort();
                Vec::new()
            }
        }
    }
}

async fn read_capped<R>(mut source: R, limit_bytes: usize) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut captured = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match source.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if captured.len() < limit_bytes {
                    let room = limit_bytes - captured.len();
                    captured.extend_from_slice(&chunk[..n.min(room)]);
                }
                // Anything past the cap is dropped; keep reading regardless.
            }
            Err(e) => {
                tracing::trace!("Diagnostics source read error: {}", e);
                break;
            }
        }
    }

    captured
}

/// Produce a bounded, lossy UTF-8 excerpt of captured diagnostics, suitable
/// for embedding in a log record.
pub fn excerpt(bytes: &[u8], max_chars: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}
