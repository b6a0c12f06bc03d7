use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use fleet_core::{TaskHandler, WorkerError};

use crate::{PriceWatchTask, SystemInfoTask};

/// Maps a wire task-type string to its handler. Populated once at startup
/// and read-only afterwards; the server cannot install new handlers at
/// runtime.
pub struct TaskRegistry {
    handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The closed set of handlers this build ships with.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SystemInfoTask::new()));
        registry.register(Arc::new(PriceWatchTask::new()));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(handler.task_type(), handler);
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Look up and invoke a handler, normalizing its reply. Every failure
    /// mode comes back as a `WorkerError`; nothing a handler does escapes
    /// this boundary in any other shape.
    pub async fn execute(&self, task_type: &str, params: &Value) -> Result<Value, WorkerError> {
        let handler = self
            .handlers
            .get(task_type)
            .ok_or_else(|| WorkerError::UnknownTaskType(task_type.to_string()))?;

        let reply = handler.run(params).await?;
        normalize_reply(reply)
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handlers may answer with a bare value or with the structured
/// `{"status", "data", "message"}` envelope. A `success` envelope yields its
/// `data` (empty object when absent); any other status is an execution
/// failure carrying the envelope's message; a bare value passes through
/// untouched.
fn normalize_reply(reply: Value) -> Result<Value, WorkerError> {
    let Some(status) = reply.get("status").and_then(Value::as_str) else {
        return Ok(reply);
    };

    if status == "success" {
        return Ok(reply
            .get("data")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())));
    }

    let message = reply
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("handler reported failure without a message");
    Err(WorkerError::Execution(message.to_string()))
}
