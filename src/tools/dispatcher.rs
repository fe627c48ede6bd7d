//! Tool registry and dispatch
//!
//! Routes remote function calls to registered handlers. `dispatch` always
//! produces a well-formed result: unknown tools, handler errors, panics and
//! timeouts all become error results addressed to the caller's id.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{Error, Result};

/// Function signature advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

/// A remote procedure call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// Answer to a `ToolRequest`, correlated by `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    /// `{"result": ...}` on success, `{"error": "..."}` otherwise
    pub response: Value,
}

impl ToolResult {
    /// Successful result
    #[must_use]
    pub fn success(id: impl Into<String>, name: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            response: json!({ "result": result }),
        }
    }

    /// Error result
    #[must_use]
    pub fn failure(
        id: impl Into<String>,
        name: impl Into<String>,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            response: json!({ "error": error.to_string() }),
        }
    }

    /// Result sent for calls still pending when the session ends
    #[must_use]
    pub fn cancelled(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::failure(id, name, "cancelled: session closed")
    }

    /// Check if this result reports a failure
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.response.get("error").is_some()
    }

    /// Error message, if any
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.response.get("error").and_then(Value::as_str)
    }
}

/// A callable tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Signature advertised in the session setup
    fn declaration(&self) -> ToolDeclaration;

    /// Run the tool; side effects must be complete when this returns
    async fn call(&self, args: Value) -> Result<Value>;
}

/// Registry of tool handlers
#[derive(Clone)]
pub struct ToolDispatcher {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    timeout: Duration,
}

impl ToolDispatcher {
    /// Create an empty dispatcher with a per-call timeout
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            handlers: HashMap::new(),
            timeout,
        }
    }

    /// Register a handler under its declared name, replacing any previous one
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.declaration().name;
        tracing::debug!(tool = %name, "registered tool");
        self.handlers.insert(name, handler);
    }

    /// Builder-style `register`
    #[must_use]
    pub fn with(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Declarations of every registered tool, sorted by name
    #[must_use]
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut declarations: Vec<ToolDeclaration> =
            self.handlers.values().map(|h| h.declaration()).collect();
        declarations.sort_by(|a, b| a.name.cmp(&b.name));
        declarations
    }

    /// Check if a tool is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Per-call timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a request to completion
    pub async fn dispatch(&self, request: &ToolRequest) -> ToolResult {
        let Some(handler) = self.handlers.get(&request.name) else {
            tracing::warn!(tool = %request.name, id = %request.id, "unknown tool requested");
            return ToolResult::failure(
                &request.id,
                &request.name,
                format!("unknown tool: {}", request.name),
            );
        };

        let started = std::time::Instant::now();
        let call = AssertUnwindSafe(handler.call(request.args.clone())).catch_unwind();
        let outcome = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(Error::Handler(format!(
                "tool {} panicked: {}",
                request.name,
                panic_message(&*panic)
            ))),
            Err(_) => Err(Error::Timeout(format!(
                "tool {} exceeded {}s",
                request.name,
                self.timeout.as_secs()
            ))),
        };

        match outcome {
            Ok(value) => {
                tracing::debug!(
                    tool = %request.name,
                    id = %request.id,
                    elapsed_ms = started.elapsed().as_millis(),
                    "tool call succeeded"
                );
                ToolResult::success(&request.id, &request.name, value)
            }
            Err(e) => {
                tracing::warn!(tool = %request.name, id = %request.id, error = %e, "tool call failed");
                ToolResult::failure(&request.id, &request.name, e)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
