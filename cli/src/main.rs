//! cpplens binary — stdio tool-call server for C/C++ static analysis.
//!
//! stdout carries the JSON-RPC protocol, so all logging goes to stderr.
//! Settings are read from `$CPPLENS_CONFIG` or `./cpplens.toml` when
//! present; otherwise built-in defaults apply.

mod rpc;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cpplens_bridge::DiagnosticsBridge;
use cpplens_types::Settings;
use tracing_subscriber::EnvFilter;

use rpc::RpcServer;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();
}

fn settings_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("CPPLENS_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let local = PathBuf::from("cpplens.toml");
    local.is_file().then_some(local)
}

fn load_settings() -> Result<Settings> {
    match settings_path() {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading settings file {}", path.display()))?;
            let settings = Settings::from_toml(&text)
                .with_context(|| format!("parsing settings file {}", path.display()))?;
            tracing::info!(path = %path.display(), "loaded settings");
            Ok(settings)
        }
        None => Ok(Settings::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let settings = load_settings()?;
    let bridge = Arc::new(DiagnosticsBridge::new(&settings));
    let registry = cpplens_tools::builtin_registry(bridge.clone());
    let server = RpcServer::new(registry);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "cpplens serving on stdio");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    let serve_result = server.run(stdin, stdout).await;

    // EOF or transport error: either way, take the engine sessions down
    // gracefully before reporting.
    bridge.shutdown().await;

    serve_result
}
