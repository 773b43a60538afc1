//! Engine message payloads and the startup handshake shapes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub(crate) struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Protocol features negotiated at startup. Immutable after the handshake.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EngineCapabilities {
    /// Whether the engine answers `textDocument/diagnostic` pull requests.
    /// When false, diagnostics only arrive as push notifications.
    pub pull_diagnostics: bool,
}

impl EngineCapabilities {
    pub fn from_initialize(result: &Value) -> Self {
        let provider = &result["capabilities"]["diagnosticProvider"];
        Self {
            pull_diagnostics: provider.is_object() || provider.as_bool() == Some(true),
        }
    }
}

pub(crate) fn initialize_params(root_uri: &str) -> Value {
    serde_json::json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "capabilities": {
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": false
                },
                "publishDiagnostics": {
                    "relatedInformation": false
                },
                "diagnostic": {
                    "dynamicRegistration": false
                }
            }
        },
        "workspaceFolders": [{
            "uri": root_uri,
            "name": "workspace"
        }]
    })
}

pub(crate) fn did_open_params(uri: &str, language_id: &str, version: i32, text: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn did_change_params(uri: &str, version: i32, text: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": [{
            "text": text
        }]
    })
}

pub(crate) fn pull_diagnostics_params(uri: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri
        }
    })
}

/// Payload of a `textDocument/publishDiagnostics` notification.
#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<EngineDiagnostic>,
}

/// Payload of a `textDocument/diagnostic` response.
///
/// Engines may answer `kind: "unchanged"` with no items; treat that the same
/// as an empty report since we never send a previousResultId.
#[derive(Debug, Deserialize)]
pub(crate) struct PullDiagnosticsReport {
    #[serde(default)]
    pub items: Vec<EngineDiagnostic>,
}

/// One diagnostic record as the engine emits it: 0-based range, numeric
/// severity, free-form code.
#[derive(Debug, Deserialize)]
pub(crate) struct EngineDiagnostic {
    pub range: EngineRange,
    pub severity: Option<u64>,
    #[serde(default)]
    pub code: Option<Value>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EngineRange {
    pub start: EnginePosition,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EnginePosition {
    pub line: u32,
    pub character: u32,
}

pub(crate) fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

pub(crate) fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri).ok().and_then(|u| u.to_file_path().ok())
}

/// Language identifier for a source path, by extension.
pub(crate) fn language_id_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("c") => "c",
        Some("h") => "c",
        _ => "cpp",
    }
}
