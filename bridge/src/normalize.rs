//! Normalization of heterogeneous diagnostic records into the canonical shape.
//!
//! Two producers feed this module: engine records (0-based positions,
//! numeric severities) and compiler text lines (already 1-based). Callers
//! cannot distinguish the producers afterwards except by the origin tag.

use std::path::Path;
use std::sync::LazyLock;

use cpplens_types::{Diagnostic, DiagnosticOrigin, Severity};
use regex::Regex;
use serde_json::Value;

use crate::protocol::EngineDiagnostic;

/// `<path>:<line>:<column>: <severity>: <message>`
static COMPILER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?):(\d+):(\d+):\s*([A-Za-z][A-Za-z ]*?):\s*(.*)$")
        .expect("compiler line pattern is valid")
});

/// Convert an engine record into the canonical shape.
///
/// The engine's 0-based positions become 1-based; severities outside the
/// engine's defined range become warnings rather than failing the record.
pub(crate) fn engine_record(file: &Path, record: &EngineDiagnostic) -> Diagnostic {
    Diagnostic {
        file: file.to_path_buf(),
        line: record.range.start.line + 1,
        column: record.range.start.character + 1,
        severity: record
            .severity
            .and_then(Severity::from_engine)
            .unwrap_or(Severity::Warning),
        message: record.message.clone(),
        code: record.code.as_ref().and_then(code_string),
        origin: DiagnosticOrigin::Engine,
    }
}

fn code_string(code: &Value) -> Option<String> {
    match code {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse one line of compiler output into the canonical shape.
///
/// Lines that don't match the diagnostic pattern (source excerpts, caret
/// markers, "N errors generated." summaries) return `None` and are simply
/// skipped. Unknown severity spellings default to warning instead of
/// discarding the line.
#[must_use]
pub fn compiler_line(line: &str) -> Option<Diagnostic> {
    let captures = COMPILER_LINE.captures(line)?;
    let path = captures.get(1)?.as_str();
    let line_no: u32 = captures.get(2)?.as_str().parse().ok()?;
    let column: u32 = captures.get(3)?.as_str().parse().ok()?;
    let severity = Severity::from_label(captures.get(4)?.as_str()).unwrap_or(Severity::Warning);
    let message = captures.get(5)?.as_str().to_string();

    Some(Diagnostic {
        file: path.into(),
        line: line_no,
        column,
        severity,
        message,
        code: None,
        origin: DiagnosticOrigin::CompilerFallback,
    })
}

/// Parse a whole compiler output blob, keeping recognized lines only.
#[must_use]
pub fn compiler_output(output: &str) -> Vec<Diagnostic> {
    let mut items: Vec<Diagnostic> = output.lines().filter_map(compiler_line).collect();
    cpplens_types::sort_diagnostics(&mut items);
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{EnginePosition, EngineRange};

    fn record(line: u32, character: u32, severity: Option<u64>) -> EngineDiagnostic {
        EngineDiagnostic {
            range: EngineRange {
                start: EnginePosition { line, character },
            },
            severity,
            code: None,
            message: "m".to_string(),
        }
    }

    #[test]
    fn engine_positions_become_one_based() {
        let d = engine_record(Path::new("/w/a.cpp"), &record(0, 0, Some(1)));
        assert_eq!(d.line, 1);
        assert_eq!(d.column, 1);
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.origin, DiagnosticOrigin::Engine);
    }

    #[test]
    fn engine_severity_stays_in_the_closed_set() {
        for (value, expected) in [
            (1, Severity::Error),
            (2, Severity::Warning),
            (3, Severity::Info),
            (4, Severity::Note),
        ] {
            let d = engine_record(Path::new("a.cpp"), &record(4, 2, Some(value)));
            assert_eq!(d.severity, expected);
        }
    }

    #[test]
    fn engine_unknown_or_missing_severity_defaults_to_warning() {
        let d = engine_record(Path::new("a.cpp"), &record(4, 2, None));
        assert_eq!(d.severity, Severity::Warning);
        let d = engine_record(Path::new("a.cpp"), &record(4, 2, Some(9)));
        assert_eq!(d.severity, Severity::Warning);
    }

    #[test]
    fn engine_code_passes_through_verbatim() {
        let mut r = record(1, 1, Some(1));
        r.code = Some(serde_json::json!("undeclared_var_use"));
        assert_eq!(
            engine_record(Path::new("a.cpp"), &r).code.as_deref(),
            Some("undeclared_var_use")
        );

        r.code = Some(serde_json::json!(404));
        assert_eq!(engine_record(Path::new("a.cpp"), &r).code.as_deref(), Some("404"));

        r.code = Some(Value::Null);
        assert!(engine_record(Path::new("a.cpp"), &r).code.is_none());
    }

    #[test]
    fn compiler_line_recovers_every_field() {
        let d = compiler_line("src/widget.cpp:10:5: error: expected ';' after expression").unwrap();
        assert_eq!(d.file, Path::new("src/widget.cpp"));
        assert_eq!(d.line, 10);
        assert_eq!(d.column, 5);
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.message, "expected ';' after expression");
        assert_eq!(d.origin, DiagnosticOrigin::CompilerFallback);
    }

    #[test]
    fn compiler_line_severity_spellings() {
        assert_eq!(
            compiler_line("a.cpp:1:1: warning: unused variable 'x'").unwrap().severity,
            Severity::Warning
        );
        assert_eq!(
            compiler_line("a.cpp:1:1: note: candidate function").unwrap().severity,
            Severity::Note
        );
        assert_eq!(
            compiler_line("a.cpp:1:1: fatal error: 'missing.h' file not found")
                .unwrap()
                .severity,
            Severity::Error
        );
    }

    #[test]
    fn compiler_line_unknown_severity_defaults_to_warning() {
        let d = compiler_line("a.cpp:3:7: advisory: something odd").unwrap();
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.message, "something odd");
    }

    #[test]
    fn non_diagnostic_lines_are_skipped() {
        assert!(compiler_line("    int x = ;").is_none());
        assert!(compiler_line("            ^").is_none());
        assert!(compiler_line("1 error generated.").is_none());
        assert!(compiler_line("In file included from main.cpp:2:").is_none());
        assert!(compiler_line("").is_none());
    }

    #[test]
    fn paths_containing_colons_still_parse() {
        let d = compiler_line("C:\\src\\a.cpp:4:2: error: boom").unwrap();
        assert_eq!(d.file, Path::new("C:\\src\\a.cpp"));
        assert_eq!(d.line, 4);
        assert_eq!(d.column, 2);
    }

    #[test]
    fn compiler_output_filters_and_sorts() {
        let output = "\
main.cpp:12:9: warning: unused variable 'n'
    int n = 0;
        ^
main.cpp:4:1: error: unknown type name 'vooid'
vooid f();
^
2 diagnostics generated.";
        let items = compiler_output(output);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].line, 4);
        assert_eq!(items[0].severity, Severity::Error);
        assert_eq!(items[1].line, 12);
        assert_eq!(items[1].severity, Severity::Warning);
    }

    #[test]
    fn compiler_output_on_clean_build_is_empty() {
        assert!(compiler_output("").is_empty());
        assert!(compiler_output("nothing to report\n").is_empty());
    }
}
