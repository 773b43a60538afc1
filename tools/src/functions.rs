//! Function listing: tag-index subprocess with a textual heuristic fallback.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;

use crate::includes::read_source;
use crate::{ToolError, ToolExecutor, ToolFut, parse_args};

const LIST_FUNCTIONS_TOOL_NAME: &str = "list_functions";

const CTAGS_TIMEOUT: Duration = Duration::from_secs(10);

/// Declaration-or-definition heuristic: a return type blob, a name, a
/// parameter list, optionally `const` and an opening brace.
static FUNCTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\w:*&<>\s]+\s+(\w[\w:]*)\s*\([^)]*\)\s*(const)?\s*\{?\s*$")
        .expect("function pattern is valid")
});

/// Control-flow keywords the heuristic would otherwise mistake for names.
const NOT_FUNCTIONS: &[&str] = &["if", "for", "while", "switch", "return", "else"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionSource {
    Ctags,
    Heuristic,
}

#[derive(Debug, Serialize)]
pub struct FunctionInfo {
    pub name: String,
    /// 1-based line number; absent when the tag index didn't record one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct FunctionList {
    pub file: PathBuf,
    pub source: FunctionSource,
    pub functions: Vec<FunctionInfo>,
}

/// Parse flat tag-index output: tab-separated records, comment lines
/// starting with `!`, line numbers in a `line:N` field.
#[must_use]
pub fn parse_ctags_output(output: &str) -> Vec<FunctionInfo> {
    output
        .lines()
        .filter(|line| !line.starts_with('!'))
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let name = fields.next()?.trim();
            if name.is_empty() {
                return None;
            }
            let line_no = fields
                .find_map(|f| f.strip_prefix("line:"))
                .and_then(|n| n.trim().parse().ok());
            Some(FunctionInfo {
                name: name.to_string(),
                line: line_no,
            })
        })
        .collect()
}

/// Scan source text for function-looking lines. Misses template-heavy and
/// multi-line declarations; good enough when no tag indexer is installed.
#[must_use]
pub fn heuristic_functions(text: &str) -> Vec<FunctionInfo> {
    text.lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let trimmed = line.trim();
            if trimmed.starts_with("//") || trimmed.starts_with("/*") {
                return None;
            }
            let captures = FUNCTION_LINE.captures(trimmed)?;
            let name = captures.get(1)?.as_str();
            if NOT_FUNCTIONS.contains(&name) {
                return None;
            }
            Some(FunctionInfo {
                name: name.to_string(),
                line: Some((index + 1) as u32),
            })
        })
        .collect()
}

async fn ctags_functions(path: &Path) -> Option<Vec<FunctionInfo>> {
    let binary = which::which("ctags").ok()?;

    let child = Command::new(binary)
        .args(["--fields=+n", "-o", "-", "--c++-kinds=fp"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .ok()?;

    let output = tokio::time::timeout(CTAGS_TIMEOUT, child.wait_with_output())
        .await
        .ok()?
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let parsed = parse_ctags_output(&String::from_utf8_lossy(&output.stdout));
    if parsed.is_empty() { None } else { Some(parsed) }
}

/// List functions in a file, preferring the tag index.
pub async fn list_functions(path: &Path) -> Result<FunctionList, ToolError> {
    let text = read_source(path)?;

    if let Some(functions) = ctags_functions(path).await {
        return Ok(FunctionList {
            file: path.to_path_buf(),
            source: FunctionSource::Ctags,
            functions,
        });
    }

    tracing::debug!(file = %path.display(), "tag index unavailable, using heuristic scan");
    Ok(FunctionList {
        file: path.to_path_buf(),
        source: FunctionSource::Heuristic,
        functions: heuristic_functions(&text),
    })
}

#[derive(Debug, Deserialize)]
struct ListFunctionsArgs {
    file_path: String,
}

pub struct ListFunctionsTool;

impl ToolExecutor for ListFunctionsTool {
    fn name(&self) -> &'static str {
        LIST_FUNCTIONS_TOOL_NAME
    }

    fn description(&self) -> &'static str {
        "Extract function and method declarations from a C/C++ file, via the \
         ctags index or a textual heuristic."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the C/C++ source file."
                }
            },
            "required": ["file_path"]
        })
    }

    fn execute<'a>(&'a self, args: Value) -> ToolFut<'a> {
        Box::pin(async move {
            let args: ListFunctionsArgs = parse_args(&args)?;
            let list = list_functions(Path::new(&args.file_path)).await?;
            serde_json::to_value(&list).map_err(|e| ToolError::ExecutionFailed {
                tool: LIST_FUNCTIONS_TOOL_NAME.to_string(),
                message: e.to_string(),
            })
        })
    }
}
