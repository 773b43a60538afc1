//! Diagnostics session bridge for C/C++ analysis.
//!
//! Manages one clangd process per workspace root, translates file checks
//! into the engine's JSON-RPC protocol, correlates asynchronous diagnostic
//! notifications back to the waiting caller, and degrades to a plain
//! compiler syntax check when the engine is unavailable or unresponsive.

pub mod codec;
pub mod normalize;

pub(crate) mod correlate;
pub(crate) mod protocol;
pub(crate) mod session;

mod check;
mod error;
mod fallback;
mod registry;

pub use check::{CheckOutcome, DiagnosticsBridge};
pub use error::{BridgeError, ProtocolError};
pub use fallback::CompilerCheck;
