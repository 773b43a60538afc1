//! Shared types for cpplens: the canonical diagnostic shape and settings.

pub mod diagnostic;
pub mod settings;

pub use diagnostic::{Diagnostic, DiagnosticOrigin, Severity, sort_diagnostics};
pub use settings::{EngineSettings, FallbackSettings, Settings, SettingsError};
