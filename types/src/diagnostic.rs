//! The canonical diagnostic record returned by every analysis path.
//!
//! Both the engine bridge and the compiler fallback produce this shape, so
//! callers cannot tell the paths apart except by the [`DiagnosticOrigin`]
//! tag. Coordinates are 1-based regardless of what the producer used.

use std::path::PathBuf;

use serde::Serialize;

/// Severity of a diagnostic, drawn from a fixed closed set.
///
/// Producers with richer or different severity vocabularies are mapped into
/// this set at the normalization boundary; nothing outside it ever reaches a
/// caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Note,
    Info,
}

impl Severity {
    /// Convert from the engine's numeric severity (1=Error, 2=Warning,
    /// 3=Information, 4=Hint).
    ///
    /// Returns `None` for values outside the defined range; the
    /// normalization boundary decides the fallback policy.
    #[must_use]
    pub fn from_engine(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Info),
            4 => Some(Self::Note),
            _ => None,
        }
    }

    /// Parse a compiler severity spelling (`error`, `warning`, `note`).
    ///
    /// `fatal error` folds into [`Severity::Error`]. Unknown spellings
    /// return `None`; the caller defaults them rather than failing the
    /// whole parse.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "error" | "fatal error" => Some(Self::Error),
            "warning" => Some(Self::Warning),
            "note" => Some(Self::Note),
            "info" | "remark" => Some(Self::Info),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Note => "note",
            Self::Info => "info",
        }
    }
}

/// Which analysis tier produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagnosticOrigin {
    #[serde(rename = "engine")]
    Engine,
    #[serde(rename = "compiler-fallback")]
    CompilerFallback,
}

/// A single normalized diagnostic.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub file: PathBuf,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
    pub severity: Severity,
    pub message: String,
    /// Producer-specific code (e.g. "unused-variable"), passed through verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(rename = "source")]
    pub origin: DiagnosticOrigin,
}

impl Diagnostic {
    /// Format as `path:line:column: severity: message`.
    #[must_use]
    pub fn display_line(&self) -> String {
        format!(
            "{}:{}:{}: {}: {}",
            self.file.display(),
            self.line,
            self.column,
            self.severity.label(),
            self.message,
        )
    }
}

/// Order diagnostics by (line, column) ascending, keeping insertion order
/// for ties.
pub fn sort_diagnostics(items: &mut [Diagnostic]) {
    items.sort_by_key(|d| (d.line, d.column));
}
