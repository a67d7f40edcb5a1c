//! Newline-delimited JSON-RPC server loop.
//!
//! Reads one request per line from the input and writes one response per line
//! to the output. Notifications get no response. Tool failures are answered
//! as `isError` results so the client can tell them apart from protocol
//! errors.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use devloop::io::protocol::{
    CallToolParams, CallToolResult, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST,
    JSONRPC_VERSION, METHOD_INITIALIZE, METHOD_NOT_FOUND, METHOD_PING, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
    PARSE_ERROR, PROTOCOL_VERSION, Request, Response,
};

use crate::tools::{Toolbox, definitions};

const SERVER_NAME: &str = "devloop-tools";

pub struct Server {
    toolbox: Toolbox,
}

impl Server {
    pub fn new(toolbox: Toolbox) -> Self {
        Self { toolbox }
    }

    /// Serve until the input reaches end of file.
    pub fn serve<R: BufRead, W: Write>(&self, input: R, mut output: W) -> Result<()> {
        info!("tool server ready");
        for line in input.lines() {
            let line = line.context("read request line")?;
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(&line) {
                let encoded = serde_json::to_string(&response).context("encode response")?;
                writeln!(output, "{encoded}").context("write response")?;
                output.flush().context("flush response")?;
            }
        }
        info!("input closed, tool server exiting");
        Ok(())
    }

    /// Response for one request line, or `None` for a notification.
    pub fn handle_line(&self, line: &str) -> Option<Response> {
        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(err = %e, "unparseable request");
                return Some(Response::err(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {e}"),
                ));
            }
        };
        if request.is_notification() {
            debug!(method = %request.method, "notification");
            return None;
        }
        let id = request.id.clone().unwrap_or(Value::Null);
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(Response::err(
                id,
                INVALID_REQUEST,
                format!("Unsupported jsonrpc version {:?}", request.jsonrpc),
            ));
        }
        Some(self.dispatch(id, &request))
    }

    #[instrument(skip_all, fields(method = %request.method))]
    fn dispatch(&self, id: Value, request: &Request) -> Response {
        match request.method.as_str() {
            METHOD_INITIALIZE => Response::ok(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {
                        "name": SERVER_NAME,
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            ),
            METHOD_PING => Response::ok(id, json!({})),
            METHOD_TOOLS_LIST => Response::ok(id, json!({"tools": definitions()})),
            METHOD_TOOLS_CALL => self.call_tool(id, request.params.clone()),
            other => Response::err(id, METHOD_NOT_FOUND, format!("Method not found: {other}")),
        }
    }

    fn call_tool(&self, id: Value, params: Option<Value>) -> Response {
        let params: CallToolParams =
            match serde_json::from_value(params.unwrap_or_else(|| json!({}))) {
                Ok(params) => params,
                Err(e) => return Response::err(id, INVALID_PARAMS, format!("Invalid params: {e}")),
            };
        if !Toolbox::knows(&params.name) {
            return Response::err(id, INVALID_PARAMS, format!("Unknown tool: {}", params.name));
        }
        let result = match self.toolbox.call(&params.name, &params.arguments) {
            Ok(text) => CallToolResult::text(text),
            Err(e) => {
                let message = format!("{e:#}");
                warn!(tool = %params.name, err = %message, "tool failed");
                CallToolResult::error(message)
            }
        };
        match serde_json::to_value(&result) {
            Ok(value) => Response::ok(id, value),
            Err(e) => Response::err(id, INTERNAL_ERROR, format!("encode result: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use devloop::io::config::ToolServerConfig;
    use devloop::io::protocol::{ToolDefinition, tool_names};

    fn server(root: &Path) -> Server {
        let cfg = ToolServerConfig {
            workspace: root.join("workspace"),
            docs_dir: root.join("docs"),
            ..ToolServerConfig::default()
        };
        Server::new(Toolbox::new(&cfg).expect("toolbox"))
    }

    fn call(server: &Server, line: Value) -> Response {
        server.handle_line(&line.to_string()).expect("response")
    }

    #[test]
    fn initialize_reports_protocol_and_tools_capability() {
        let temp = tempfile::tempdir().expect("tempdir");
        let response = call(
            &server(temp.path()),
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
        );
        let result = response.into_result().expect("result");
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert!(result["capabilities"]["tools"].is_object());
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
    }

    #[test]
    fn notifications_get_no_response() {
        let temp = tempfile::tempdir().expect("tempdir");
        let line = json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string();
        assert!(server(temp.path()).handle_line(&line).is_none());
    }

    #[test]
    fn tools_list_returns_catalog() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = call(
            &server(temp.path()),
            json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list"}),
        )
        .into_result()
        .expect("result");
        let tools: Vec<ToolDefinition> =
            serde_json::from_value(result["tools"].clone()).expect("definitions");
        assert_eq!(tools.len(), tool_names::ALL.len());
    }

    #[test]
    fn tool_failure_is_an_error_result() {
        let temp = tempfile::tempdir().expect("tempdir");
        let response = call(
            &server(temp.path()),
            json!({
                "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                "params": {"name": "read_file", "arguments": {"filename": "absent.py"}},
            }),
        );
        assert_eq!(response.id, json!(2));
        let result: CallToolResult =
            serde_json::from_value(response.into_result().expect("result")).expect("tool result");
        assert!(result.is_error);
        assert_eq!(result.first_text(), "absent.py not found");
    }

    #[test]
    fn protocol_errors_use_standard_codes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let server = server(temp.path());

        let unknown_tool = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call", "params": {"name": "rm"}}),
        );
        let error = unknown_tool.error.expect("error");
        assert_eq!(error.code, INVALID_PARAMS);
        assert_eq!(error.message, "Unknown tool: rm");

        let unknown_method = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 4, "method": "resources/list"}),
        );
        assert_eq!(unknown_method.error.expect("error").code, METHOD_NOT_FOUND);

        let garbage = server.handle_line("{not json").expect("response");
        assert_eq!(garbage.id, Value::Null);
        assert_eq!(garbage.error.expect("error").code, PARSE_ERROR);
    }

    #[test]
    fn serve_answers_each_request_line() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = [
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}).to_string(),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string(),
            String::new(),
            json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}).to_string(),
        ]
        .join("\n");
        let mut output = Vec::new();
        server(temp.path())
            .serve(input.as_bytes(), &mut output)
            .expect("serve");

        let lines: Vec<Response> = String::from_utf8(output)
            .expect("utf8")
            .lines()
            .map(|line| serde_json::from_str(line).expect("response"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].id, json!(1));
        assert_eq!(lines[1].id, json!(2));
    }
}
