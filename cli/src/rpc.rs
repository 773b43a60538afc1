//! Newline-delimited JSON-RPC 2.0 loop over stdio.
//!
//! The transport dialect is small: `initialize`, `tools/list`, and
//! `tools/call`, plus the `notifications/initialized` no-op. Tool failures
//! come back as `isError` results so the caller can read them; only
//! protocol-level problems (unparsable request, unknown method) become
//! JSON-RPC errors.

use cpplens_tools::ToolRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    method: String,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcErrorBody>,
    id: Value,
}

#[derive(Debug, Serialize)]
struct RpcErrorBody {
    code: i32,
    message: String,
}

fn success(id: Value, result: Value) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0",
        result: Some(result),
        error: None,
        id,
    }
}

fn failure(id: Value, code: i32, message: String) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0",
        result: None,
        error: Some(RpcErrorBody { code, message }),
        id,
    }
}

pub struct RpcServer {
    registry: ToolRegistry,
}

impl RpcServer {
    #[must_use]
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// Handle one request line. Returns `None` when no response is due
    /// (notifications).
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let request: RpcRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                let response = failure(Value::Null, PARSE_ERROR, format!("parse error: {e}"));
                return serde_json::to_string(&response).ok();
            }
        };

        let Some(id) = request.id else {
            // Notifications get no reply; the only one we expect is the
            // post-initialize handshake ack.
            if request.method != "notifications/initialized" {
                tracing::debug!(method = request.method, "ignoring notification");
            }
            return None;
        };

        let response = match request.method.as_str() {
            "initialize" => success(id, self.initialize_result()),
            "tools/list" => success(
                id,
                serde_json::json!({ "tools": self.registry.definitions() }),
            ),
            "tools/call" => self.handle_tool_call(id, request.params).await,
            other => failure(id, METHOD_NOT_FOUND, format!("Unknown method: {other}")),
        };

        serde_json::to_string(&response).ok()
    }

    fn initialize_result(&self) -> Value {
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": "cpplens",
                "version": env!("CARGO_PKG_VERSION"),
            }
        })
    }

    async fn handle_tool_call(&self, id: Value, params: Option<Value>) -> RpcResponse {
        let Some(params) = params else {
            return failure(id, INVALID_PARAMS, "missing params".to_string());
        };
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return failure(id, INVALID_PARAMS, "missing tool name".to_string());
        };
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));

        match self.registry.execute(name, arguments).await {
            Ok(result) => success(
                id,
                serde_json::json!({
                    "content": [{
                        "type": "text",
                        "text": result.to_string(),
                    }]
                }),
            ),
            Err(e) => success(
                id,
                serde_json::json!({
                    "content": [{
                        "type": "text",
                        "text": format!("Error: {e}"),
                    }],
                    "isError": true
                }),
            ),
        }
    }

    /// Serve requests line-by-line until the reader reaches EOF.
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if !trimmed.starts_with('{') {
                continue;
            }
            if let Some(response) = self.handle_line(trimmed).await {
                writer.write_all(response.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpplens_tools::{ToolError, ToolExecutor, ToolFut};

    struct UpperTool;

    impl ToolExecutor for UpperTool {
        fn name(&self) -> &'static str {
            "upper"
        }
        fn description(&self) -> &'static str {
            "uppercases a string"
        }
        fn schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        fn execute<'a>(&'a self, args: Value) -> ToolFut<'a> {
            Box::pin(async move {
                let text = args
                    .get("text")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ToolError::BadArgs {
                        message: "missing text".to_string(),
                    })?;
                Ok(serde_json::json!({ "text": text.to_uppercase() }))
            })
        }
    }

    fn server() -> RpcServer {
        let mut registry = ToolRegistry::default();
        registry.register(Box::new(UpperTool)).unwrap();
        RpcServer::new(registry)
    }

    async fn roundtrip(server: &RpcServer, request: Value) -> Value {
        let line = serde_json::to_string(&request).unwrap();
        let response = server.handle_line(&line).await.unwrap();
        serde_json::from_str(&response).unwrap()
    }

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let response = roundtrip(
            &server(),
            serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}),
        )
        .await;
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(response["result"]["serverInfo"]["name"], "cpplens");
        assert!(response.get("error").is_none());
    }

    #[tokio::test]
    async fn tools_list_includes_registered_tools() {
        let response = roundtrip(
            &server(),
            serde_json::json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
        )
        .await;
        let tools = response["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "upper");
        assert!(tools[0]["inputSchema"].is_object());
    }

    #[tokio::test]
    async fn tools_call_returns_text_content() {
        let response = roundtrip(
            &server(),
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "tools/call",
                "params": { "name": "upper", "arguments": { "text": "abc" } }
            }),
        )
        .await;
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        let payload: Value = serde_json::from_str(text).unwrap();
        assert_eq!(payload["text"], "ABC");
        assert!(response["result"].get("isError").is_none());
    }

    #[tokio::test]
    async fn tool_failure_is_an_is_error_result_not_a_protocol_error() {
        let response = roundtrip(
            &server(),
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 4,
                "method": "tools/call",
                "params": { "name": "upper", "arguments": {} }
            }),
        )
        .await;
        assert_eq!(response["result"]["isError"], true);
        assert!(
            response["result"]["content"][0]["text"]
                .as_str()
                .unwrap()
                .starts_with("Error:")
        );
        assert!(response.get("error").is_none());
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_through_is_error() {
        let response = roundtrip(
            &server(),
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 5,
                "method": "tools/call",
                "params": { "name": "nope", "arguments": {} }
            }),
        )
        .await;
        assert_eq!(response["result"]["isError"], true);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let response = roundtrip(
            &server(),
            serde_json::json!({"jsonrpc": "2.0", "id": 6, "method": "resources/list"}),
        )
        .await;
        assert_eq!(response["error"]["code"], METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn unparsable_line_is_a_parse_error_with_null_id() {
        let response = server().handle_line("{not json").await.unwrap();
        let response: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(response["error"]["code"], PARSE_ERROR);
        assert_eq!(response["id"], Value::Null);
    }

    #[tokio::test]
    async fn notifications_get_no_reply() {
        let reply = server()
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn run_loop_answers_over_a_buffer() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#,
            "\n",
            "not json at all\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
        );
        let mut output = Vec::new();
        server().run(input.as_bytes(), &mut output).await.unwrap();

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2, "two requests, two responses");
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[1]["id"], 2);
    }
}
