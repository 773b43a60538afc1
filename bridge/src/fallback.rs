//! Degraded analysis path: a plain compiler in syntax-only mode.
//!
//! Used when the engine is absent, dead, or silent past its deadline. The
//! compiler's combined output goes through the same normalizer as engine
//! records, so callers cannot tell which path produced their diagnostics.

use std::path::Path;
use std::process::Stdio;

use cpplens_types::{Diagnostic, FallbackSettings};
use tokio::process::Command;

use crate::error::BridgeError;
use crate::normalize;

pub struct CompilerCheck {
    settings: FallbackSettings,
}

impl CompilerCheck {
    #[must_use]
    pub fn new(settings: FallbackSettings) -> Self {
        Self { settings }
    }

    /// Syntax-check one file, returning whatever diagnostics were recognized.
    ///
    /// An empty list is a valid "no issues" result. Compilers exit non-zero
    /// on diagnosed errors, so the exit code is ignored; only failing to run
    /// every candidate at all is an error.
    pub async fn check_syntax_only(
        &self,
        file: &Path,
        extra_flags: &[String],
    ) -> Result<Vec<Diagnostic>, BridgeError> {
        let mut tried = Vec::new();

        for candidate in self.settings.compilers() {
            tried.push(candidate.clone());

            let Ok(binary) = which::which(candidate) else {
                tracing::debug!("fallback compiler {candidate} not on PATH");
                continue;
            };

            let mut cmd = Command::new(&binary);
            cmd.arg("-fsyntax-only")
                .args(self.settings.flags())
                .args(extra_flags)
                .arg(file)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let child = match cmd.spawn() {
                Ok(child) => child,
                Err(e) => {
                    tracing::debug!("fallback compiler {candidate} failed to start: {e}");
                    continue;
                }
            };

            let output = match tokio::time::timeout(
                self.settings.timeout(),
                child.wait_with_output(),
            )
            .await
            {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    tracing::warn!("fallback compiler {candidate} failed: {e}");
                    continue;
                }
                Err(_) => {
                    // Dropping the future killed the child.
                    tracing::warn!("fallback compiler {candidate} timed out");
                    continue;
                }
            };

            // Diagnostics usually land on stderr, but parse both streams;
            // the line filter discards everything that isn't one.
            let mut combined = String::from_utf8_lossy(&output.stderr).into_owned();
            combined.push('\n');
            combined.push_str(&String::from_utf8_lossy(&output.stdout));

            tracing::debug!(
                compiler = %binary.display(),
                exit = ?output.status.code(),
                "fallback syntax check complete"
            );
            return Ok(normalize::compiler_output(&combined));
        }

        Err(BridgeError::CompilerUnavailable { tried })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpplens_types::{Settings, Severity};
    use std::io::Write;

    fn settings(compilers: &[&str], flags: &[&str]) -> FallbackSettings {
        let toml = format!(
            "[fallback]\ncompilers = [{}]\nflags = [{}]\n",
            compilers
                .iter()
                .map(|c| format!("{c:?}"))
                .collect::<Vec<_>>()
                .join(", "),
            flags
                .iter()
                .map(|f| format!("{f:?}"))
                .collect::<Vec<_>>()
                .join(", "),
        );
        Settings::from_toml(&toml).unwrap().fallback().clone()
    }

    #[tokio::test]
    async fn all_candidates_missing_is_compiler_unavailable() {
        let check = CompilerCheck::new(settings(
            &["cpplens-test-missing-cc", "cpplens-test-missing-cxx"],
            &[],
        ));
        let err = check
            .check_syntax_only(Path::new("/tmp/x.cpp"), &[])
            .await
            .unwrap_err();
        match err {
            BridgeError::CompilerUnavailable { tried } => {
                assert_eq!(tried, ["cpplens-test-missing-cc", "cpplens-test-missing-cxx"]);
            }
            other => panic!("expected CompilerUnavailable, got {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_candidate_yields_empty_diagnostics() {
        // `true` ignores its arguments and prints nothing: a clean check.
        let check = CompilerCheck::new(settings(&["true"], &[]));
        let items = check
            .check_syntax_only(Path::new("/tmp/x.cpp"), &[])
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_candidates_are_skipped_until_one_runs() {
        let check = CompilerCheck::new(settings(&["cpplens-test-missing-cc", "true"], &[]));
        let items = check
            .check_syntax_only(Path::new("/tmp/x.cpp"), &[])
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    /// Full subprocess path: a stand-in compiler that prints one diagnostic
    /// and exits non-zero, like a real compiler rejecting bad code.
    #[cfg(unix)]
    #[tokio::test]
    async fn diagnosed_error_is_parsed_despite_nonzero_exit() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-cc");
        {
            let mut f = std::fs::File::create(&script).unwrap();
            // Args arrive as: -fsyntax-only <file>; echo a diagnostic for $2.
            writeln!(f, "#!/bin/sh").unwrap();
            writeln!(f, "echo \"$2:10:5: error: expected ';' after expression\" >&2").unwrap();
            writeln!(f, "echo \"1 error generated.\" >&2").unwrap();
            writeln!(f, "exit 1").unwrap();
        }
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let check = CompilerCheck::new(settings(&[script.to_str().unwrap()], &[]));
        let items = check
            .check_syntax_only(Path::new("/tmp/broken.cpp"), &[])
            .await
            .unwrap();

        assert_eq!(items.len(), 1, "summary line must be discarded");
        assert_eq!(items[0].line, 10);
        assert_eq!(items[0].column, 5);
        assert_eq!(items[0].severity, Severity::Error);
        assert_eq!(
            items[0].origin,
            cpplens_types::DiagnosticOrigin::CompilerFallback
        );
    }
}
