//! `#include` directive scanning.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ToolError, ToolExecutor, ToolFut, parse_args};

const GET_INCLUDES_TOOL_NAME: &str = "get_includes";

static INCLUDE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*#\s*include\s*([<"])([^>"]+)[>"]"#).expect("include pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IncludeKind {
    /// `#include <...>`
    System,
    /// `#include "..."`
    Local,
}

#[derive(Debug, Serialize)]
pub struct IncludeDirective {
    /// 1-based line number.
    pub line: u32,
    pub header: String,
    pub kind: IncludeKind,
}

/// Scan one file's text for include directives, in order of appearance.
#[must_use]
pub fn scan_includes(text: &str) -> Vec<IncludeDirective> {
    text.lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let captures = INCLUDE_LINE.captures(line)?;
            let kind = if &captures[1] == "<" {
                IncludeKind::System
            } else {
                IncludeKind::Local
            };
            Some(IncludeDirective {
                line: (index + 1) as u32,
                header: captures[2].to_string(),
                kind,
            })
        })
        .collect()
}

pub(crate) fn read_source(path: &Path) -> Result<String, ToolError> {
    if !path.is_file() {
        return Err(ToolError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let bytes = std::fs::read(path).map_err(|e| ToolError::ExecutionFailed {
        tool: GET_INCLUDES_TOOL_NAME.to_string(),
        message: format!("reading {}: {e}", path.display()),
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[derive(Debug, Deserialize)]
struct GetIncludesArgs {
    file_path: String,
}

pub struct GetIncludesTool;

impl ToolExecutor for GetIncludesTool {
    fn name(&self) -> &'static str {
        GET_INCLUDES_TOOL_NAME
    }

    fn description(&self) -> &'static str {
        "List all #include directives in a C/C++ file with line numbers and \
         system/local classification."
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
            let args: GetIncludesArgs = parse_args(&args)?;
            let path = PathBuf::from(&args.file_path);
            let text = read_source(&path)?;
            let includes = scan_includes(&text);
            Ok(serde_json::json!({
                "file": path,
                "includes": includes,
            }))
        })
    }
}
