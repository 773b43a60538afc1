//! Failure taxonomy for the diagnostics bridge.
//!
//! Engine-side failures (`EngineUnavailable`, `Protocol`, `TimedOut`) are
//! recovered locally by falling back to the compiler checker; callers only
//! see an error when both paths are exhausted.

use std::path::PathBuf;
use std::time::Duration;

/// A malformed frame on the engine's byte stream.
///
/// Any of these terminates the offending session (treated the same as a
/// crash) rather than risking corrupt parses of subsequent frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("reading engine stream: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame headers ended without Content-Length")]
    MissingContentLength,
    #[error("invalid Content-Length value: {value:?}")]
    InvalidContentLength { value: String },
    #[error("frame of {len} bytes exceeds the {max} byte cap")]
    FrameTooLarge { len: usize, max: usize },
    #[error("stream ended mid-headers")]
    TruncatedHeaders,
    #[error("unparsable frame payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The engine binary is missing, failed to spawn, or its process died.
    /// Triggers the fallback path; not surfaced to callers on its own.
    #[error("analysis engine unavailable: {reason}")]
    EngineUnavailable { reason: String },

    /// The engine stream produced a malformed frame; the session was killed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// No diagnostics arrived within the deadline. Fails only this wait;
    /// the session stays up.
    #[error("no diagnostics within {waited:?}")]
    TimedOut { waited: Duration },

    /// No fallback compiler could be executed at all.
    #[error("no usable compiler found (tried: {})", tried.join(", "))]
    CompilerUnavailable { tried: Vec<String> },

    /// The file to analyze could not be read.
    #[error("cannot read {}: {source}", path.display())]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Both the engine and the compiler paths are exhausted; no static
    /// analysis could be performed.
    #[error("no static analysis could be performed: engine: {engine}; compiler: {compiler}")]
    AnalysisExhausted { engine: String, compiler: String },
}

impl BridgeError {
    pub(crate) fn engine_unavailable(reason: impl Into<String>) -> Self {
        Self::EngineUnavailable {
            reason: reason.into(),
        }
    }
}
