//! The `check_file` tool — thin adapter over the diagnostics bridge.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cpplens_bridge::DiagnosticsBridge;
use serde::Deserialize;
use serde_json::Value;

use crate::{ToolError, ToolExecutor, ToolFut, parse_args};

const CHECK_FILE_TOOL_NAME: &str = "check_file";

fn default_build_dir() -> String {
    "build".to_string()
}

#[derive(Debug, Deserialize)]
struct CheckFileArgs {
    file_path: String,
    /// Defaults to the file's parent directory; workspace discovery beyond
    /// that is the caller's job.
    workspace_root: Option<String>,
    #[serde(default = "default_build_dir")]
    build_dir: String,
}

pub struct CheckFileTool {
    bridge: Arc<DiagnosticsBridge>,
}

impl CheckFileTool {
    #[must_use]
    pub fn new(bridge: Arc<DiagnosticsBridge>) -> Self {
        Self { bridge }
    }
}

impl ToolExecutor for CheckFileTool {
    fn name(&self) -> &'static str {
        CHECK_FILE_TOOL_NAME
    }

    fn description(&self) -> &'static str {
        "Run diagnostics on a C/C++ file. Reports errors, warnings, and notes \
         from the analysis engine, or from a compiler syntax check when the \
         engine is unavailable."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the C/C++ source file."
                },
                "workspace_root": {
                    "type": "string",
                    "description": "Workspace root for the analysis session. Defaults to the file's directory."
                },
                "build_dir": {
                    "type": "string",
                    "default": "build",
                    "description": "Build directory containing compile_commands.json, relative to the workspace root."
                }
            },
            "required": ["file_path"]
        })
    }

    fn execute<'a>(&'a self, args: Value) -> ToolFut<'a> {
        Box::pin(async move {
            let args: CheckFileArgs = parse_args(&args)?;
            let file = PathBuf::from(&args.file_path);

            let workspace_root = match &args.workspace_root {
                Some(root) => PathBuf::from(root),
                None => file
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(".")),
            };
            let build_dir = workspace_root.join(&args.build_dir);

            let outcome = self
                .bridge
                .check_file(&file, &workspace_root, Some(&build_dir))
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    tool: CHECK_FILE_TOOL_NAME.to_string(),
                    message: e.to_string(),
                })?;

            serde_json::to_value(&outcome).map_err(|e| ToolError::ExecutionFailed {
                tool: CHECK_FILE_TOOL_NAME.to_string(),
                message: e.to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpplens_types::Settings;

    fn engineless_bridge() -> Arc<DiagnosticsBridge> {
        let settings = Settings::from_toml(
            r#"
            [engine]
            candidates = ["cpplens-test-no-such-engine"]

            [fallback]
            compilers = ["true"]
            flags = []
            "#,
        )
        .unwrap();
        Arc::new(DiagnosticsBridge::new(&settings))
    }

    #[tokio::test]
    async fn missing_required_arg_is_bad_args() {
        let tool = CheckFileTool::new(engineless_bridge());
        let err = tool.execute(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::BadArgs { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn checks_through_the_fallback_when_engine_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ok.cpp");
        std::fs::write(&file, "int main() { return 0; }\n").unwrap();

        let tool = CheckFileTool::new(engineless_bridge());
        let result = tool
            .execute(serde_json::json!({"file_path": file.to_str().unwrap()}))
            .await
            .unwrap();

        assert_eq!(result["backend"], "compiler-fallback");
        assert!(result["diagnostics"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreadable_file_surfaces_as_execution_failure() {
        let tool = CheckFileTool::new(engineless_bridge());
        let err = tool
            .execute(serde_json::json!({"file_path": "/nonexistent/x.cpp"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }
}
