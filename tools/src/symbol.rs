//! Symbol search across C/C++ sources under a root.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ToolError, ToolExecutor, ToolFut, parse_args};

const FIND_SYMBOL_TOOL_NAME: &str = "find_symbol";

/// Stop collecting after this many matches; the result is marked truncated.
const MAX_MATCHES: usize = 50;

/// Directory names never descended into, on top of the standard ignore
/// rules: generated trees drown out real definitions.
const SKIPPED_DIRS: &[&str] = &["build", "external"];

fn default_directory() -> String {
    "src".to_string()
}

fn default_extensions() -> Vec<String> {
    ["cpp", "h", "hpp", "c"].into_iter().map(String::from).collect()
}

#[derive(Debug, Deserialize)]
struct FindSymbolArgs {
    symbol: String,
    #[serde(default = "default_directory")]
    directory: String,
    #[serde(default = "default_extensions")]
    extensions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SymbolMatch {
    pub file: PathBuf,
    /// 1-based line number.
    pub line: u32,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SymbolSearch {
    pub pattern: String,
    pub matches: Vec<SymbolMatch>,
    pub truncated: bool,
}

/// Search for a symbol pattern in every matching source file under `root`.
///
/// Hidden files, ignore-ruled files, and [`SKIPPED_DIRS`] are never
/// visited. Files that are not valid UTF-8 are read lossily rather than
/// skipped.
pub fn search_symbol(
    root: &Path,
    pattern: &str,
    extensions: &[String],
    max_matches: usize,
) -> Result<SymbolSearch, ToolError> {
    let regex = Regex::new(pattern).map_err(|e| ToolError::BadArgs {
        message: format!("invalid symbol pattern: {e}"),
    })?;

    let walker = WalkBuilder::new(root)
        .filter_entry(|entry| {
            let skipped_dir = entry.file_type().is_some_and(|t| t.is_dir())
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| SKIPPED_DIRS.contains(&name));
            !skipped_dir
        })
        .build();

    let mut matches = Vec::new();
    let mut truncated = false;

    'files: for entry in walker {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        let has_wanted_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| extensions.iter().any(|want| want == ext));
        if !has_wanted_extension {
            continue;
        }

        let Ok(bytes) = std::fs::read(path) else {
            continue;
        };
        let text = String::from_utf8_lossy(&bytes);

        for (index, line) in text.lines().enumerate() {
            if regex.is_match(line) {
                if matches.len() >= max_matches {
                    truncated = true;
                    break 'files;
                }
                matches.push(SymbolMatch {
                    file: path.to_path_buf(),
                    line: (index + 1) as u32,
                    text: line.trim_end().to_string(),
                });
            }
        }
    }

    Ok(SymbolSearch {
        pattern: pattern.to_string(),
        matches,
        truncated,
    })
}

pub struct FindSymbolTool;

impl ToolExecutor for FindSymbolTool {
    fn name(&self) -> &'static str {
        FIND_SYMBOL_TOOL_NAME
    }

    fn description(&self) -> &'static str {
        "Search for a symbol (function, class, variable) across C/C++ files. \
         The pattern is a regular expression matched per line."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "symbol": {
                    "type": "string",
                    "description": "Symbol name to search for (supports regex)."
                },
                "directory": {
                    "type": "string",
                    "default": "src",
                    "description": "Directory to search in."
                },
                "extensions": {
                    "type": "array",
                    "items": { "type": "string" },
                    "default": ["cpp", "h", "hpp", "c"],
                    "description": "File extensions to search."
                }
            },
            "required": ["symbol"]
        })
    }

    fn execute<'a>(&'a self, args: Value) -> ToolFut<'a> {
        Box::pin(async move {
            let args: FindSymbolArgs = parse_args(&args)?;
            let search = search_symbol(
                Path::new(&args.directory),
                &args.symbol,
                &args.extensions,
                MAX_MATCHES,
            )?;
            serde_json::to_value(&search).map_err(|e| ToolError::ExecutionFailed {
                tool: FIND_SYMBOL_TOOL_NAME.to_string(),
                message: e.to_string(),
            })
        })
    }
}
