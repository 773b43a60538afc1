//! Session registry — one live engine session per workspace root.
//!
//! Sessions are created lazily on first acquire, reused while alive, and
//! replaced under a fresh generation when the previous incarnation died.
//! Idle sessions are reaped opportunistically during acquire.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cpplens_types::EngineSettings;
use tokio::sync::Mutex;

use crate::error::BridgeError;
use crate::session::EngineSession;

pub struct SessionRegistry {
    settings: EngineSettings,
    sessions: Mutex<HashMap<PathBuf, Arc<EngineSession>>>,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            sessions: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Get the live session for `root`, spawning one if needed.
    ///
    /// A session whose process has exited since last use is discarded here
    /// and transparently replaced under a new generation, so anything still
    /// referencing the dead incarnation keeps failing fast instead of
    /// resolving against the wrong process.
    pub(crate) async fn acquire(
        &self,
        root: &Path,
        build_dir: Option<&Path>,
    ) -> Result<Arc<EngineSession>, BridgeError> {
        let mut sessions = self.sessions.lock().await;

        self.reap_idle(&mut sessions);

        if let Some(session) = sessions.get(root) {
            if session.is_alive() {
                return Ok(session.clone());
            }
            let dead = sessions.remove(root);
            if let Some(dead) = dead {
                tracing::info!(
                    root = %root.display(),
                    generation = dead.generation(),
                    "engine session died; spawning a replacement"
                );
            }
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(
            EngineSession::spawn(root, build_dir, &self.settings, generation).await?,
        );
        sessions.insert(root.to_path_buf(), session.clone());
        Ok(session)
    }

    /// Drop sessions idle past the configured threshold. Graceful shutdown
    /// runs detached so acquire latency stays flat.
    fn reap_idle(&self, sessions: &mut HashMap<PathBuf, Arc<EngineSession>>) {
        let threshold = self.settings.idle_shutdown();
        let idle_roots: Vec<PathBuf> = sessions
            .iter()
            .filter(|(_, s)| s.is_alive() && s.idle_for() > threshold)
            .map(|(root, _)| root.clone())
            .collect();

        for root in idle_roots {
            if let Some(session) = sessions.remove(&root) {
                tracing::info!(root = %root.display(), "shutting down idle engine session");
                tokio::spawn(async move { session.shutdown().await });
            }
        }
    }

    /// Gracefully shut down every session. Called once at process exit.
    pub async fn shutdown_all(&self) {
        let sessions = std::mem::take(&mut *self.sessions.lock().await);
        for (root, session) in sessions {
            tracing::info!(root = %root.display(), "shutting down engine session");
            session.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpplens_types::Settings;

    fn unavailable_settings() -> EngineSettings {
        Settings::from_toml(
            r#"
            [engine]
            candidates = ["cpplens-test-no-such-engine"]
            "#,
        )
        .unwrap()
        .engine()
        .clone()
    }

    #[tokio::test]
    async fn missing_binary_is_engine_unavailable_not_a_panic() {
        let registry = SessionRegistry::new(unavailable_settings());
        let err = registry.acquire(Path::new("/tmp"), None).await.unwrap_err();
        match err {
            BridgeError::EngineUnavailable { reason } => {
                assert!(reason.contains("cpplens-test-no-such-engine"));
            }
            other => panic!("expected EngineUnavailable, got {other}"),
        }
    }

    #[tokio::test]
    async fn failed_spawn_leaves_no_registry_entry() {
        let registry = SessionRegistry::new(unavailable_settings());
        let _ = registry.acquire(Path::new("/tmp"), None).await;
        assert!(registry.sessions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn shutdown_all_with_no_sessions_is_a_noop() {
        let registry = SessionRegistry::new(unavailable_settings());
        registry.shutdown_all().await;
    }
}
