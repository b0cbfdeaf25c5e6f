//! Protocol dispatcher.
//!
//! A [`Dispatcher`] holds what every session shares (the registry and the
//! tool context). Each client connection gets its own [`Session`], which
//! walks `Uninitialized -> Negotiated -> Serving -> Closed`:
//!
//! - `initialize` is the only request accepted while uninitialized
//! - `notifications/initialized` moves a negotiated session to serving
//! - `tools/list`, `tools/call` and `ping` are accepted once negotiated
//! - the transport closes the session at end of input
//!
//! Tool calls are returned as futures so the transport can run them
//! concurrently while the session keeps reading envelopes in order.

use crate::error::{DbError, DbResult};
use crate::mcp::protocol::{Request, Response, parse_envelope};
use crate::mcp::registry::ToolRegistry;
use crate::tools::ToolContext;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use rmcp::model::{Implementation, ServerCapabilities};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Protocol versions this server speaks, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

const INSTRUCTIONS: &str = "Read-only SQL tools over a single SQLite database.\n\
    \n\
    1. Call `list_tables` to see what is available\n\
    2. Call `describe_table` for columns, keys and indexes\n\
    3. Query with `run_query`: one SELECT, no comments, `?` placeholders for values.\n\
       A LIMIT is appended when missing; larger limits than the server cap are rejected.\n\
    \n\
    `pool_status` reports connection pool load. PoolExhausted errors are retryable.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Negotiated,
    Serving,
    Closed,
}

impl SessionState {
    fn is_negotiated(self) -> bool {
        matches!(self, Self::Negotiated | Self::Serving)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Negotiated => "negotiated",
            Self::Serving => "serving",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// What the transport should do with one inbound envelope.
pub enum Dispatch {
    /// Write this response now.
    Reply(Response),
    /// Run this future (possibly concurrently) and write its response.
    Pending(BoxFuture<'static, Response>),
    /// Notification: nothing to write.
    Silent,
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reply(response) => f.debug_tuple("Reply").field(response).finish(),
            Self::Pending(_) => f.write_str("Pending"),
            Self::Silent => f.write_str("Silent"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
    protocol_version: String,
    #[serde(default)]
    capabilities: JsonValue,
    #[serde(default)]
    client_info: Option<ClientInfo>,
}

#[derive(Debug, Deserialize)]
struct ClientInfo {
    name: String,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    protocol_version: String,
    capabilities: ServerCapabilities,
    server_info: Implementation,
    instructions: String,
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: JsonValue,
}

/// Shared routing state for all sessions.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    context: ToolContext,
    server_info: Implementation,
}

impl Dispatcher {
    pub fn new(registry: ToolRegistry, context: ToolContext) -> Self {
        Self {
            registry: Arc::new(registry),
            context,
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_owned(),
                title: Some("DB Tool Server".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn context(&self) -> &ToolContext {
        &self.context
    }

    /// Start a new client session.
    pub fn session(self: &Arc<Self>) -> Session {
        Session {
            dispatcher: Arc::clone(self),
            state: SessionState::Uninitialized,
        }
    }

    fn list_tools(&self) -> JsonValue {
        let tools: Vec<_> = self.registry.list().iter().map(|t| t.to_tool()).collect();
        json!({ "tools": tools })
    }

    /// Resolve and run one tool call, converting panics into internal errors.
    fn call_tool(&self, params: JsonValue) -> DbResult<BoxFuture<'static, DbResult<JsonValue>>> {
        let params: CallToolParams = serde_json::from_value(params)
            .map_err(|e| DbError::invalid_params(format!("Invalid tools/call params: {}", e)))?;

        let tool = self
            .registry
            .get(&params.name)
            .ok_or_else(|| DbError::tool_not_found(&params.name))?;

        let name = params.name;
        let call = tool.call(self.context.clone(), params.arguments);
        Ok(async move {
            match AssertUnwindSafe(call).catch_unwind().await {
                Ok(Ok(output)) => Ok(call_result(output)),
                Ok(Err(err)) => Err(err),
                Err(panic) => {
                    let payload = panic_summary(panic.as_ref());
                    error!(tool = %name, payload = %payload, "Tool handler panicked");
                    Err(DbError::internal(format!("Tool '{}' panicked", name)))
                }
            }
        }
        .boxed())
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tools", &self.registry.len())
            .field("server", &self.server_info.name)
            .finish()
    }
}

/// Tool output in the `tools/call` result shape.
fn call_result(output: JsonValue) -> JsonValue {
    let text = serde_json::to_string(&output).unwrap_or_default();
    json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": output,
        "isError": false,
    })
}

/// Describe a panic payload without repeating it.
///
/// Panic messages are built by handler code from whatever it had in hand,
/// arguments and row values included, so only their shape reaches the log.
fn panic_summary(panic: &(dyn std::any::Any + Send)) -> String {
    let len = if let Some(s) = panic.downcast_ref::<&str>() {
        s.len()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.len()
    } else {
        return "non-string payload".to_string();
    };
    format!("string payload ({} bytes)", len)
}

/// Per-connection protocol state machine.
#[derive(Debug)]
pub struct Session {
    dispatcher: Arc<Dispatcher>,
    state: SessionState,
}

impl Session {
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// End of input: nothing more is accepted.
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            debug!(from = %self.state, "Session closed");
            self.state = SessionState::Closed;
        }
    }

    /// Decode and route one line of input.
    pub fn dispatch_line(&mut self, line: &str) -> Dispatch {
        match parse_envelope(line) {
            Ok(request) => self.dispatch(request),
            Err(err) => {
                warn!(error = %err.error, "Rejected malformed envelope");
                Dispatch::Reply(err.into_response())
            }
        }
    }

    /// Route one decoded envelope.
    pub fn dispatch(&mut self, request: Request) -> Dispatch {
        let Some(id) = request.id else {
            self.notify(&request.method);
            return Dispatch::Silent;
        };
        debug!(method = %request.method, state = %self.state, "Dispatching request");

        match self.route(&request.method, request.params) {
            Ok(Routed::Ready(result)) => Dispatch::Reply(Response::success(id, result)),
            Ok(Routed::Call(call)) => Dispatch::Pending(
                async move {
                    match call.await {
                        Ok(result) => Response::success(id, result),
                        Err(err) => Response::error(id, err),
                    }
                }
                .boxed(),
            ),
            Err(err) => {
                if err.kind() == "protocol" {
                    warn!(method = %request.method, error = %err, "Protocol error");
                }
                Dispatch::Reply(Response::error(id, err))
            }
        }
    }

    /// Route and, for tool calls, run to completion. Convenience for callers
    /// that do not need concurrency.
    pub async fn handle_line(&mut self, line: &str) -> Option<Response> {
        match self.dispatch_line(line) {
            Dispatch::Reply(response) => Some(response),
            Dispatch::Pending(call) => Some(call.await),
            Dispatch::Silent => None,
        }
    }

    fn route(&mut self, method: &str, params: JsonValue) -> DbResult<Routed> {
        if self.state == SessionState::Closed {
            return Err(DbError::invalid_request("Session is closed"));
        }
        if method == "initialize" {
            return self.initialize(params).map(Routed::Ready);
        }
        if !self.state.is_negotiated() {
            return Err(DbError::invalid_request(format!(
                "Session not initialized: call initialize before {}",
                method
            )));
        }

        match method {
            "ping" => Ok(Routed::Ready(json!({}))),
            "tools/list" => Ok(Routed::Ready(self.dispatcher.list_tools())),
            "tools/call" => self.dispatcher.call_tool(params).map(Routed::Call),
            other => Err(DbError::method_not_found(other)),
        }
    }

    fn initialize(&mut self, params: JsonValue) -> DbResult<JsonValue> {
        if self.state != SessionState::Uninitialized {
            return Err(DbError::invalid_request("Session already initialized"));
        }
        let params: InitializeParams = serde_json::from_value(params)
            .map_err(|e| DbError::invalid_params(format!("Invalid initialize params: {}", e)))?;

        let version = SUPPORTED_PROTOCOL_VERSIONS
            .iter()
            .find(|v| **v == params.protocol_version)
            .unwrap_or(&SUPPORTED_PROTOCOL_VERSIONS[0]);

        let (client, client_version) = params
            .client_info
            .map(|c| (c.name, c.version.unwrap_or_default()))
            .unwrap_or_default();
        info!(
            client = %client,
            client_version = %client_version,
            requested = %params.protocol_version,
            negotiated = %version,
            client_capabilities = %params.capabilities,
            "Session negotiated"
        );

        self.state = SessionState::Negotiated;
        let result = InitializeResult {
            protocol_version: (*version).to_string(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: self.dispatcher.server_info.clone(),
            instructions: INSTRUCTIONS.to_string(),
        };
        serde_json::to_value(result)
            .map_err(|e| DbError::internal(format!("Failed to encode initialize result: {}", e)))
    }

    fn notify(&mut self, method: &str) {
        match (method, self.state) {
            ("notifications/initialized", SessionState::Negotiated) => {
                self.state = SessionState::Serving;
                debug!("Session serving");
            }
            (method, state) => debug!(%method, %state, "Ignoring notification"),
        }
    }
}

enum Routed {
    Ready(JsonValue),
    Call(BoxFuture<'static, DbResult<JsonValue>>),
}
