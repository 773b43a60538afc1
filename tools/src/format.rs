//! Source formatting through clang-format.
//!
//! Dry runs (the default) report a unified diff without touching the file;
//! in-place runs rewrite it and report whether anything changed.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use similar::TextDiff;
use tokio::process::Command;

use crate::{ToolError, ToolExecutor, ToolFut, parse_args};

const FORMAT_TOOL_NAME: &str = "clang_format";

const FORMAT_TIMEOUT: Duration = Duration::from_secs(10);

fn default_style() -> String {
    "file".to_string()
}

#[derive(Debug, Deserialize)]
struct FormatArgs {
    file_path: String,
    /// file, llvm, google, chromium, mozilla, webkit.
    #[serde(default = "default_style")]
    style: String,
    /// When false, only a diff is produced.
    #[serde(default)]
    in_place: bool,
}

#[derive(Debug, Serialize)]
pub struct FormatReport {
    pub file: PathBuf,
    pub changed: bool,
    pub formatted_in_place: bool,
    /// Unified diff of the pending changes; absent for in-place runs and
    /// already-formatted files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

/// Unified diff with a couple of context lines, empty when nothing changed.
#[must_use]
pub fn render_diff(path: &Path, original: &str, formatted: &str) -> String {
    if original == formatted {
        return String::new();
    }
    let name = path.display().to_string();
    TextDiff::from_lines(original, formatted)
        .unified_diff()
        .context_radius(2)
        .header(&name, &name)
        .to_string()
}

async fn run_clang_format(args: &[String], file: &Path) -> Result<std::process::Output, ToolError> {
    let binary = which::which("clang-format").map_err(|_| ToolError::ExecutionFailed {
        tool: FORMAT_TOOL_NAME.to_string(),
        message: "clang-format not found on PATH".to_string(),
    })?;

    let child = Command::new(binary)
        .args(args)
        .arg(file)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ToolError::ExecutionFailed {
            tool: FORMAT_TOOL_NAME.to_string(),
            message: format!("spawning clang-format: {e}"),
        })?;

    let output = tokio::time::timeout(FORMAT_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| ToolError::ExecutionFailed {
            tool: FORMAT_TOOL_NAME.to_string(),
            message: "clang-format timed out".to_string(),
        })?
        .map_err(|e| ToolError::ExecutionFailed {
            tool: FORMAT_TOOL_NAME.to_string(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(ToolError::ExecutionFailed {
            tool: FORMAT_TOOL_NAME.to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

/// Format one file.
pub async fn format_file(path: &Path, style: &str, in_place: bool) -> Result<FormatReport, ToolError> {
    if !path.is_file() {
        return Err(ToolError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let style_flag = format!("--style={style}");

    if in_place {
        let original = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool: FORMAT_TOOL_NAME.to_string(),
                message: e.to_string(),
            })?;
        run_clang_format(&[style_flag, "-i".to_string()], path).await?;
        let rewritten = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool: FORMAT_TOOL_NAME.to_string(),
                message: e.to_string(),
            })?;
        return Ok(FormatReport {
            file: path.to_path_buf(),
            changed: original != rewritten,
            formatted_in_place: true,
            diff: None,
        });
    }

    let original = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool: FORMAT_TOOL_NAME.to_string(),
            message: e.to_string(),
        })?;
    let output = run_clang_format(std::slice::from_ref(&style_flag), path).await?;
    let formatted = String::from_utf8_lossy(&output.stdout);

    let diff = render_diff(path, &original, &formatted);
    Ok(FormatReport {
        file: path.to_path_buf(),
        changed: !diff.is_empty(),
        formatted_in_place: false,
        diff: if diff.is_empty() { None } else { Some(diff) },
    })
}

pub struct ClangFormatTool;

impl ToolExecutor for ClangFormatTool {
    fn name(&self) -> &'static str {
        FORMAT_TOOL_NAME
    }

    fn description(&self) -> &'static str {
        "Format a C/C++ file with clang-format. By default shows a diff \
         without modifying the file; set in_place to rewrite it."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the C/C++ source file."
                },
                "style": {
                    "type": "string",
                    "default": "file",
                    "description": "Formatting style (file, llvm, google, chromium, mozilla, webkit)."
                },
                "in_place": {
                    "type": "boolean",
                    "default": false,
                    "description": "Rewrite the file instead of showing a diff."
                }
            },
            "required": ["file_path"]
        })
    }

    fn execute<'a>(&'a self, args: Value) -> ToolFut<'a> {
        Box::pin(async move {
            let args: FormatArgs = parse_args(&args)?;
            let report =
                format_file(Path::new(&args.file_path), &args.style, args.in_place).await?;
            serde_json::to_value(&report).map_err(|e| ToolError::ExecutionFailed {
                tool: FORMAT_TOOL_NAME.to_string(),
                message: e.to_string(),
            })
        })
    }
}
