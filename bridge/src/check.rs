//! `check_file` orchestration across the two analysis tiers.
//!
//! Engine path first: acquire (or spawn) the session for the workspace
//! root, push the file, wait for correlated diagnostics. A session that
//! fails under us is retried exactly once (the registry respawns it under a
//! new generation) before the request falls back to the compiler checker.
//! Only when both tiers are exhausted does the caller see an error.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use cpplens_types::{Diagnostic, DiagnosticOrigin, Settings};
use serde::Serialize;

use crate::error::BridgeError;
use crate::fallback::CompilerCheck;
use crate::registry::SessionRegistry;

/// Result of one file check: the diagnostics plus which tier produced them.
#[derive(Debug, Serialize)]
pub struct CheckOutcome {
    pub backend: DiagnosticOrigin,
    pub diagnostics: Vec<Diagnostic>,
}

enum EngineFailure {
    /// No session could be had at all (binary missing, spawn or handshake
    /// failed). Retrying would re-probe the same PATH; go straight to
    /// fallback.
    NoEngine(String),
    /// A live session failed mid-request. Worth one respawn-and-retry.
    SessionFailed(String),
    TimedOut(Duration),
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoEngine(reason) | Self::SessionFailed(reason) => f.write_str(reason),
            Self::TimedOut(waited) => write!(f, "no diagnostics within {waited:?}"),
        }
    }
}

pub struct DiagnosticsBridge {
    registry: SessionRegistry,
    fallback: CompilerCheck,
    timeout: Duration,
}

impl DiagnosticsBridge {
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        Self {
            registry: SessionRegistry::new(settings.engine().clone()),
            fallback: CompilerCheck::new(settings.fallback().clone()),
            timeout: settings.engine().timeout(),
        }
    }

    /// Check one file, preferring the engine and degrading to the compiler.
    pub async fn check_file(
        &self,
        file: &Path,
        workspace_root: &Path,
        build_dir: Option<&Path>,
    ) -> Result<CheckOutcome, BridgeError> {
        let text = tokio::fs::read_to_string(file).await.map_err(|e| {
            BridgeError::FileUnreadable {
                path: file.to_path_buf(),
                source: e,
            }
        })?;

        let engine_failure = match self
            .try_engine(file, workspace_root, build_dir, &text)
            .await
        {
            Ok(diagnostics) => {
                return Ok(CheckOutcome {
                    backend: DiagnosticOrigin::Engine,
                    diagnostics,
                });
            }
            Err(EngineFailure::SessionFailed(reason)) => {
                tracing::info!(
                    file = %file.display(),
                    "engine session failed ({reason}); retrying once"
                );
                match self
                    .try_engine(file, workspace_root, build_dir, &text)
                    .await
                {
                    Ok(diagnostics) => {
                        return Ok(CheckOutcome {
                            backend: DiagnosticOrigin::Engine,
                            diagnostics,
                        });
                    }
                    Err(failure) => failure.to_string(),
                }
            }
            Err(failure) => failure.to_string(),
        };

        tracing::info!(
            file = %file.display(),
            "engine path unavailable ({engine_failure}); using compiler fallback"
        );

        match self.fallback.check_syntax_only(file, &[]).await {
            Ok(diagnostics) => Ok(CheckOutcome {
                backend: DiagnosticOrigin::CompilerFallback,
                diagnostics,
            }),
            Err(BridgeError::CompilerUnavailable { tried }) => {
                Err(BridgeError::AnalysisExhausted {
                    engine: engine_failure,
                    compiler: format!("no usable compiler (tried: {})", tried.join(", ")),
                })
            }
            Err(other) => Err(other),
        }
    }

    async fn try_engine(
        &self,
        file: &Path,
        workspace_root: &Path,
        build_dir: Option<&Path>,
        text: &str,
    ) -> Result<Vec<Diagnostic>, EngineFailure> {
        let session = self
            .registry
            .acquire(workspace_root, build_dir)
            .await
            .map_err(|e| EngineFailure::NoEngine(e.to_string()))?;

        tracing::debug!(
            file = %file.display(),
            generation = session.generation(),
            "checking through engine session"
        );

        match session.diagnostics_for(file, text, self.timeout).await {
            Ok(diagnostics) => Ok(diagnostics),
            Err(BridgeError::TimedOut { waited }) => Err(EngineFailure::TimedOut(waited)),
            Err(e) => Err(EngineFailure::SessionFailed(e.to_string())),
        }
    }

    /// Gracefully shut down every engine session.
    pub async fn shutdown(&self) {
        self.registry.shutdown_all().await;
    }
}
