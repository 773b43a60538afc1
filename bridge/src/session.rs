//! One live engine process per workspace root.
//!
//! A session owns the child process, a writer task that serializes every
//! outgoing frame onto the engine's stdin, and a reader task that decodes
//! the engine's stdout and dispatches frames to the response map or the
//! diagnostics ledger. When the reader task exits (clean EOF, crash, or a
//! malformed frame) the session is marked dead and all pending waits fail
//! fast; the registry respawns under a new generation on the next acquire.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use cpplens_types::{Diagnostic, EngineSettings};
use serde_json::Value;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::codec::{FrameReader, FrameWriter, Incoming};
use crate::correlate::DiagnosticsLedger;
use crate::error::BridgeError;
use crate::normalize;
use crate::protocol::{
    self, EngineCapabilities, Notification, PublishDiagnosticsParams, PullDiagnosticsReport,
    Request,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const WRITER_CHANNEL_CAPACITY: usize = 64;

enum WriterCommand {
    Send(Value),
    Shutdown,
}

struct RpcReply {
    result: Option<Value>,
    error: Option<Value>,
}

enum RequestError {
    SessionClosed,
    TimedOut,
}

struct SessionState {
    pending: HashMap<u64, oneshot::Sender<RpcReply>>,
    ledger: DiagnosticsLedger,
    /// uri → last didOpen/didChange version.
    doc_versions: HashMap<String, i32>,
}

/// State reachable from the background tasks.
struct Shared {
    root: PathBuf,
    state: Mutex<SessionState>,
    alive: AtomicBool,
}

pub(crate) struct EngineSession {
    shared: Arc<Shared>,
    writer_tx: mpsc::Sender<WriterCommand>,
    next_id: AtomicU64,
    capabilities: EngineCapabilities,
    generation: u64,
    child: Mutex<Child>,
    last_used: StdMutex<Instant>,
    #[allow(dead_code)]
    reader_handle: tokio::task::JoinHandle<()>,
    #[allow(dead_code)]
    writer_handle: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSession")
            .field("root", &self.shared.root)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Collapse `.` and `..` components so containment checks can't be defeated
/// by traversal segments.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for c in path.components() {
        match c {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

impl EngineSession {
    /// Spawn the engine for `root` and run the startup handshake.
    ///
    /// Binary-missing, spawn failure, and handshake failure all come back as
    /// `EngineUnavailable` so the caller can decide to fall back instead of
    /// failing the request outright.
    pub async fn spawn(
        root: &Path,
        build_dir: Option<&Path>,
        settings: &EngineSettings,
        generation: u64,
    ) -> Result<Self, BridgeError> {
        let binary = settings
            .candidates()
            .iter()
            .find_map(|name| which::which(name).ok())
            .ok_or_else(|| {
                BridgeError::engine_unavailable(format!(
                    "no engine binary found (tried: {})",
                    settings.candidates().join(", ")
                ))
            })?;

        let mut cmd = Command::new(&binary);
        cmd.args(settings.args())
            .current_dir(root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        if let Some(dir) = build_dir
            && dir.join("compile_commands.json").is_file()
        {
            cmd.arg(format!("--compile-commands-dir={}", dir.display()));
        }

        let mut child = cmd.spawn().map_err(|e| {
            BridgeError::engine_unavailable(format!("spawning {}: {e}", binary.display()))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::engine_unavailable("engine child has no stdout"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::engine_unavailable("engine child has no stdin"))?;

        let shared = Arc::new(Shared {
            root: normalize_path(root),
            state: Mutex::new(SessionState {
                pending: HashMap::new(),
                ledger: DiagnosticsLedger::new(),
                doc_versions: HashMap::new(),
            }),
            alive: AtomicBool::new(true),
        });

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(stdin);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("engine write error: {e}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let reader_shared = shared.clone();
        let reader_writer_tx = writer_tx.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(stdout);
            loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => {
                        dispatch_frame(&frame, &reader_shared, &reader_writer_tx).await;
                    }
                    Ok(None) => {
                        tracing::info!(root = %reader_shared.root.display(), "engine closed stdout");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(root = %reader_shared.root.display(), "engine stream error: {e}");
                        break;
                    }
                }
            }
            mark_session_dead(&reader_shared).await;
        });

        let mut session = Self {
            shared,
            writer_tx,
            next_id: AtomicU64::new(1),
            capabilities: EngineCapabilities::default(),
            generation,
            child: Mutex::new(child),
            last_used: StdMutex::new(Instant::now()),
            reader_handle,
            writer_handle,
        };

        session.capabilities = session.initialize(root, settings.init_timeout()).await?;
        Ok(session)
    }

    async fn initialize(
        &self,
        root: &Path,
        timeout: Duration,
    ) -> Result<EngineCapabilities, BridgeError> {
        let root_uri = protocol::path_to_file_uri(root)
            .map_err(|e| BridgeError::engine_unavailable(e.to_string()))?;

        let params = protocol::initialize_params(root_uri.as_str());
        let reply = self
            .request("initialize", Some(params), timeout)
            .await
            .map_err(|e| match e {
                RequestError::SessionClosed => {
                    BridgeError::engine_unavailable("engine exited during handshake")
                }
                RequestError::TimedOut => {
                    BridgeError::engine_unavailable("engine handshake timed out")
                }
            })?;

        if let Some(error) = reply.error {
            return Err(BridgeError::engine_unavailable(format!(
                "engine rejected initialize: {error}"
            )));
        }

        let capabilities =
            EngineCapabilities::from_initialize(reply.result.as_ref().unwrap_or(&Value::Null));

        self.notify("initialized", Some(serde_json::json!({})))
            .await?;

        Ok(capabilities)
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// How long since the session last served a request.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    fn touch(&self) {
        if let Ok(mut t) = self.last_used.lock() {
            *t = Instant::now();
        }
    }

    /// Fetch diagnostics for one file, pushing its current text first.
    ///
    /// In pull mode the engine answers a correlated request; in push mode we
    /// register a waiter before the document-sync notification is enqueued
    /// (under the same lock, so a reply can never race the registration) and
    /// resolve on the next publish for this file.
    pub async fn diagnostics_for(
        &self,
        file: &Path,
        text: &str,
        timeout: Duration,
    ) -> Result<Vec<Diagnostic>, BridgeError> {
        self.touch();
        let uri = protocol::path_to_file_uri(file)
            .map_err(|e| BridgeError::engine_unavailable(e.to_string()))?
            .to_string();

        if self.capabilities.pull_diagnostics {
            self.pull_diagnostics(file, &uri, text, timeout).await
        } else {
            self.await_published_diagnostics(file, &uri, text, timeout)
                .await
        }
    }

    async fn pull_diagnostics(
        &self,
        file: &Path,
        uri: &str,
        text: &str,
        timeout: Duration,
    ) -> Result<Vec<Diagnostic>, BridgeError> {
        {
            let mut state = self.shared.state.lock().await;
            let frame = document_sync_frame(&mut state, uri, file, text);
            self.send_frame(frame).await?;
        }

        let reply = self
            .request(
                "textDocument/diagnostic",
                Some(protocol::pull_diagnostics_params(uri)),
                timeout,
            )
            .await
            .map_err(|e| match e {
                RequestError::SessionClosed => {
                    BridgeError::engine_unavailable("engine exited while answering diagnostics")
                }
                RequestError::TimedOut => BridgeError::TimedOut { waited: timeout },
            })?;

        if let Some(error) = reply.error {
            return Err(BridgeError::engine_unavailable(format!(
                "diagnostics request failed: {error}"
            )));
        }

        let report: PullDiagnosticsReport =
            serde_json::from_value(reply.result.unwrap_or_default())
                .map_err(crate::error::ProtocolError::Payload)?;

        let mut items: Vec<Diagnostic> = report
            .items
            .iter()
            .map(|r| normalize::engine_record(file, r))
            .collect();
        cpplens_types::sort_diagnostics(&mut items);
        Ok(items)
    }

    async fn await_published_diagnostics(
        &self,
        file: &Path,
        uri: &str,
        text: &str,
        timeout: Duration,
    ) -> Result<Vec<Diagnostic>, BridgeError> {
        // Waiters and publishes must agree on the key; the engine may echo
        // a cleaned-up form of the path we sent.
        let key = normalize_path(file);
        let rx = {
            let mut state = self.shared.state.lock().await;
            let now = Instant::now();
            let rx = state.ledger.register(&key, now, now + timeout);
            let frame = document_sync_frame(&mut state, uri, file, text);
            // Enqueued under the state lock: the registration is visible
            // before any frame the engine could send in reply. An orphaned
            // waiter slot from a failed send is reaped by the next purge.
            self.send_frame(frame).await?;
            rx
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(mut items)) => {
                cpplens_types::sort_diagnostics(&mut items);
                Ok(items)
            }
            Ok(Err(_)) => Err(BridgeError::engine_unavailable(
                "engine session closed while waiting for diagnostics",
            )),
            Err(_) => {
                self.shared
                    .state
                    .lock()
                    .await
                    .ledger
                    .purge_expired(Instant::now());
                Err(BridgeError::TimedOut { waited: timeout })
            }
        }
    }

    async fn request(
        &self,
        method: &'static str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<RpcReply, RequestError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = oneshot::channel();
        self.shared.state.lock().await.pending.insert(id, tx);

        let frame = serde_json::to_value(Request::new(id, method, params))
            .expect("request serialization is infallible");
        if self
            .writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .is_err()
        {
            self.shared.state.lock().await.pending.remove(&id);
            return Err(RequestError::SessionClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.shared.state.lock().await.pending.remove(&id);
                Err(RequestError::SessionClosed)
            }
            Err(_) => {
                self.shared.state.lock().await.pending.remove(&id);
                Err(RequestError::TimedOut)
            }
        }
    }

    async fn notify(&self, method: &'static str, params: Option<Value>) -> Result<(), BridgeError> {
        let frame = serde_json::to_value(Notification::new(method, params))
            .expect("notification serialization is infallible");
        self.send_frame(frame).await
    }

    async fn send_frame(&self, frame: Value) -> Result<(), BridgeError> {
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| BridgeError::engine_unavailable("engine stdin closed"))
    }

    /// Graceful termination: shutdown request, exit notification, bounded
    /// wait, then kill.
    pub async fn shutdown(&self) {
        let shutdown_ok = matches!(
            self.request("shutdown", None, SHUTDOWN_GRACE).await,
            Ok(RpcReply { error: None, .. })
        );
        if shutdown_ok {
            let _ = self.notify("exit", None).await;
        }

        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;

        let mut child = self.child.lock().await;
        if tokio::time::timeout(SHUTDOWN_GRACE, child.wait())
            .await
            .is_err()
        {
            tracing::debug!(root = %self.shared.root.display(), "engine didn't exit in time, killing");
            let _ = child.kill().await;
        }
    }
}

/// Route one decoded frame: responses to the pending map, diagnostics to the
/// ledger, engine-initiated requests to a method-not-found reply.
async fn dispatch_frame(frame: &Value, shared: &Shared, writer_tx: &mpsc::Sender<WriterCommand>) {
    let Some(incoming) = Incoming::classify(frame) else {
        tracing::trace!("dropping unclassifiable frame from engine");
        return;
    };

    match incoming {
        Incoming::Response { id, result, error } => {
            let sender = shared.state.lock().await.pending.remove(&id);
            if let Some(tx) = sender {
                let _ = tx.send(RpcReply { result, error });
            }
        }
        Incoming::ServerRequest { id, method } => {
            // Engines send workspace/configuration and friends; answer or
            // they may stall waiting on us.
            tracing::debug!("engine request {method} answered with method-not-found");
            let reply = serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": -32601,
                    "message": format!("Method not found: {method}")
                }
            });
            let _ = writer_tx.send(WriterCommand::Send(reply)).await;
        }
        Incoming::Notification { method, params } => {
            if method == "textDocument/publishDiagnostics" {
                handle_publish(params, shared).await;
            } else {
                tracing::trace!("ignoring engine notification: {method}");
            }
        }
    }
}

async fn handle_publish(params: Option<Value>, shared: &Shared) {
    let Some(params) = params else { return };
    let parsed: PublishDiagnosticsParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!("unparsable publishDiagnostics payload: {e}");
            return;
        }
    };

    let Some(path) = protocol::file_uri_to_path(&parsed.uri) else {
        return;
    };
    let normalized = normalize_path(&path);
    if !normalized.starts_with(&shared.root) {
        tracing::warn!(
            "discarding diagnostics for path outside workspace: {}",
            path.display()
        );
        return;
    }

    let items: Vec<Diagnostic> = parsed
        .diagnostics
        .iter()
        .map(|r| normalize::engine_record(&path, r))
        .collect();

    shared
        .state
        .lock()
        .await
        .ledger
        .publish(&normalized, items, Instant::now());
}

/// Fail everything pending against a session whose reader has exited, so
/// callers resolve toward fallback immediately instead of riding out their
/// deadlines.
async fn mark_session_dead(shared: &Shared) {
    shared.alive.store(false, Ordering::SeqCst);
    let mut state = shared.state.lock().await;
    state.pending.clear();
    state.ledger.fail_all_waiters();
}

fn document_sync_frame(state: &mut SessionState, uri: &str, file: &Path, text: &str) -> Value {
    let notification = match state.doc_versions.get_mut(uri) {
        Some(version) => {
            *version += 1;
            Notification::new(
                "textDocument/didChange",
                Some(protocol::did_change_params(uri, *version, text)),
            )
        }
        None => {
            state.doc_versions.insert(uri.to_string(), 1);
            Notification::new(
                "textDocument/didOpen",
                Some(protocol::did_open_params(
                    uri,
                    protocol::language_id_for(file),
                    1,
                    text,
                )),
            )
        }
    };
    serde_json::to_value(&notification).expect("notification serialization is infallible")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_shared(root: &str) -> Arc<Shared> {
        Arc::new(Shared {
            root: normalize_path(Path::new(root)),
            state: Mutex::new(SessionState {
                pending: HashMap::new(),
                ledger: DiagnosticsLedger::new(),
                doc_versions: HashMap::new(),
            }),
            alive: AtomicBool::new(true),
        })
    }

    fn publish_frame(uri: &str, diags: Value) -> Value {
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": { "uri": uri, "diagnostics": diags }
        })
    }

    #[tokio::test]
    async fn response_routes_to_pending_request() {
        let shared = test_shared("/work");
        let (writer_tx, _writer_rx) = mpsc::channel(8);

        let (tx, rx) = oneshot::channel();
        shared.state.lock().await.pending.insert(1, tx);

        let frame = serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {"capabilities": {}}});
        dispatch_frame(&frame, &shared, &writer_tx).await;

        let reply = rx.await.unwrap();
        assert!(reply.result.is_some());
        assert!(reply.error.is_none());
        assert!(shared.state.lock().await.pending.is_empty());
    }

    #[tokio::test]
    async fn response_for_unknown_id_is_dropped() {
        let shared = test_shared("/work");
        let (writer_tx, _writer_rx) = mpsc::channel(8);
        let frame = serde_json::json!({"jsonrpc": "2.0", "id": 99, "result": {}});
        dispatch_frame(&frame, &shared, &writer_tx).await;
    }

    #[tokio::test]
    async fn publish_resolves_registered_waiter_with_normalized_items() {
        let shared = test_shared("/work");
        let (writer_tx, _writer_rx) = mpsc::channel(8);

        let file = Path::new("/work/main.cpp");
        let mut rx = {
            let now = Instant::now();
            let mut state = shared.state.lock().await;
            state.ledger.register(file, now, now + Duration::from_secs(30))
        };

        let frame = publish_frame(
            "file:///work/main.cpp",
            serde_json::json!([{
                "range": {"start": {"line": 9, "character": 4}, "end": {"line": 9, "character": 5}},
                "severity": 1,
                "message": "expected ';'"
            }]),
        );
        dispatch_frame(&frame, &shared, &writer_tx).await;

        let items = rx.try_recv().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].line, 10, "engine 0-based line becomes 1-based");
        assert_eq!(items[0].column, 5);
        assert!(items[0].severity.is_error());
    }

    #[tokio::test]
    async fn publish_with_empty_set_resolves_as_clean() {
        let shared = test_shared("/work");
        let (writer_tx, _writer_rx) = mpsc::channel(8);

        let file = Path::new("/work/main.cpp");
        let mut rx = {
            let now = Instant::now();
            let mut state = shared.state.lock().await;
            state.ledger.register(file, now, now + Duration::from_secs(30))
        };

        dispatch_frame(
            &publish_frame("file:///work/main.cpp", serde_json::json!([])),
            &shared,
            &writer_tx,
        )
        .await;

        assert!(rx.try_recv().unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_outside_workspace_is_discarded() {
        let shared = test_shared("/work");
        let (writer_tx, _writer_rx) = mpsc::channel(8);

        dispatch_frame(
            &publish_frame(
                "file:///etc/passwd",
                serde_json::json!([{
                    "range": {"start": {"line": 0, "character": 0}},
                    "severity": 1,
                    "message": "gotcha"
                }]),
            ),
            &shared,
            &writer_tx,
        )
        .await;

        assert!(
            shared
                .state
                .lock()
                .await
                .ledger
                .latest(Path::new("/etc/passwd"))
                .is_none()
        );
    }

    #[tokio::test]
    async fn publish_with_traversal_segments_is_discarded() {
        let shared = test_shared("/work");
        let (writer_tx, _writer_rx) = mpsc::channel(8);

        dispatch_frame(
            &publish_frame("file:///work/../etc/passwd", serde_json::json!([])),
            &shared,
            &writer_tx,
        )
        .await;

        let state = shared.state.lock().await;
        assert!(state.ledger.latest(Path::new("/etc/passwd")).is_none());
        assert!(state.ledger.latest(Path::new("/work/../etc/passwd")).is_none());
    }

    #[tokio::test]
    async fn server_request_gets_method_not_found() {
        let shared = test_shared("/work");
        let (writer_tx, mut writer_rx) = mpsc::channel(8);

        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "workspace/configuration",
            "params": {}
        });
        dispatch_frame(&frame, &shared, &writer_tx).await;

        match writer_rx.try_recv().unwrap() {
            WriterCommand::Send(reply) => {
                assert_eq!(reply["id"], 5);
                assert_eq!(reply["error"]["code"], -32601);
            }
            WriterCommand::Shutdown => panic!("expected a reply frame"),
        }
    }

    #[tokio::test]
    async fn unknown_notification_is_ignored() {
        let shared = test_shared("/work");
        let (writer_tx, mut writer_rx) = mpsc::channel(8);

        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "window/logMessage",
            "params": {"type": 3, "message": "hi"}
        });
        dispatch_frame(&frame, &shared, &writer_tx).await;

        assert!(writer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shapeless_frame_is_ignored() {
        let shared = test_shared("/work");
        let (writer_tx, mut writer_rx) = mpsc::channel(8);

        dispatch_frame(&serde_json::json!({"jsonrpc": "2.0"}), &shared, &writer_tx).await;
        assert!(writer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_session_fails_pending_waits_fast() {
        let shared = test_shared("/work");

        let file = Path::new("/work/main.cpp");
        let (mut wait_rx, mut req_rx) = {
            let now = Instant::now();
            let mut state = shared.state.lock().await;
            let wait = state.ledger.register(file, now, now + Duration::from_secs(30));
            let (tx, rx) = oneshot::channel();
            state.pending.insert(7, tx);
            (wait, rx)
        };

        mark_session_dead(&shared).await;

        assert!(!shared.alive.load(Ordering::SeqCst));
        assert!(matches!(
            wait_rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert!(matches!(
            req_rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn document_sync_opens_then_changes_with_rising_versions() {
        let shared = test_shared("/work");
        let file = Path::new("/work/main.cpp");
        let uri = "file:///work/main.cpp";

        let mut state = shared.state.lock().await;

        let open = document_sync_frame(&mut state, uri, file, "int x;");
        assert_eq!(open["method"], "textDocument/didOpen");
        assert_eq!(open["params"]["textDocument"]["version"], 1);
        assert_eq!(open["params"]["textDocument"]["languageId"], "cpp");

        let change = document_sync_frame(&mut state, uri, file, "int y;");
        assert_eq!(change["method"], "textDocument/didChange");
        assert_eq!(change["params"]["textDocument"]["version"], 2);

        let change = document_sync_frame(&mut state, uri, file, "int z;");
        assert_eq!(change["params"]["textDocument"]["version"], 3);
    }

    #[test]
    fn normalize_path_collapses_traversal() {
        assert_eq!(
            normalize_path(Path::new("/work/../etc/passwd")),
            PathBuf::from("/etc/passwd")
        );
        assert_eq!(
            normalize_path(Path::new("/work/./src/a.cpp")),
            PathBuf::from("/work/src/a.cpp")
        );
    }
}
