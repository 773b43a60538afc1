//! Tool executor framework and the built-in C/C++ analysis tools.

pub mod check;
pub mod format;
pub mod functions;
pub mod includes;
pub mod symbol;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use cpplens_bridge::DiagnosticsBridge;
use serde_json::Value;

/// Tool execution future type alias.
pub type ToolFut<'a> = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Bad tool args: {message}")]
    BadArgs { message: String },
    #[error("Tool execution failed: {tool}: {message}")]
    ExecutionFailed { tool: String, message: String },
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },
    #[error("Duplicate tool registered: {name}")]
    DuplicateTool { name: String },
    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },
}

/// One callable tool: a name, a JSON schema for its arguments, and an
/// executor. Results are structured JSON; errors are the closed
/// [`ToolError`] set.
pub trait ToolExecutor: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn schema(&self) -> Value;
    fn execute<'a>(&'a self, args: Value) -> ToolFut<'a>;
}

pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, ToolError> {
    serde_json::from_value(args.clone()).map_err(|e| ToolError::BadArgs {
        message: e.to_string(),
    })
}

/// Registry of executors, iterated in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    executors: Vec<Box<dyn ToolExecutor>>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: Box<dyn ToolExecutor>) -> Result<(), ToolError> {
        if self.executors.iter().any(|t| t.name() == tool.name()) {
            return Err(ToolError::DuplicateTool {
                name: tool.name().to_string(),
            });
        }
        self.executors.push(tool);
        Ok(())
    }

    /// Tool definitions in the shape the tool-call transport advertises.
    #[must_use]
    pub fn definitions(&self) -> Vec<Value> {
        self.executors
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name(),
                    "description": t.description(),
                    "inputSchema": t.schema(),
                })
            })
            .collect()
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let tool = self
            .executors
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
            })?;
        tracing::debug!(tool = name, "executing tool");
        tool.execute(args).await
    }
}

/// The standard tool set, sharing one diagnostics bridge.
#[must_use]
pub fn builtin_registry(bridge: Arc<DiagnosticsBridge>) -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    for tool in [
        Box::new(check::CheckFileTool::new(bridge)) as Box<dyn ToolExecutor>,
        Box::new(symbol::FindSymbolTool),
        Box::new(includes::GetIncludesTool),
        Box::new(functions::ListFunctionsTool),
        Box::new(format::ClangFormatTool),
    ] {
        registry
            .register(tool)
            .expect("builtin tool names are unique");
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    impl ToolExecutor for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn description(&self) -> &'static str {
            "repeats its arguments"
        }
        fn schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        fn execute<'a>(&'a self, args: Value) -> ToolFut<'a> {
            Box::pin(async move { Ok(args) })
        }
    }

    #[tokio::test]
    async fn registry_dispatches_by_name() {
        let mut registry = ToolRegistry::default();
        registry.register(Box::new(EchoTool)).unwrap();

        let result = registry
            .execute("echo", serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(result["x"], 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_a_structured_error() {
        let registry = ToolRegistry::default();
        let err = registry
            .execute("nope", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool { name } if name == "nope"));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = ToolRegistry::default();
        registry.register(Box::new(EchoTool)).unwrap();
        let err = registry.register(Box::new(EchoTool)).unwrap_err();
        assert!(matches!(err, ToolError::DuplicateTool { .. }));
    }

    #[test]
    fn definitions_carry_name_description_schema() {
        let mut registry = ToolRegistry::default();
        registry.register(Box::new(EchoTool)).unwrap();

        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0]["name"], "echo");
        assert_eq!(defs[0]["description"], "repeats its arguments");
        assert_eq!(defs[0]["inputSchema"]["type"], "object");
    }

    #[test]
    fn parse_args_reports_bad_shapes() {
        #[derive(serde::Deserialize, Debug)]
        struct Args {
            #[allow(dead_code)]
            path: String,
        }
        let err = parse_args::<Args>(&serde_json::json!({"path": 42})).unwrap_err();
        assert!(matches!(err, ToolError::BadArgs { .. }));
    }
}
