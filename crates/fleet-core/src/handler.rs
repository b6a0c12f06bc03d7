use async_trait::async_trait;
use serde_json::Value;

use crate::WorkerError;

/// One task type's implementation.
///
/// Handlers deserialize `params` into their own typed argument struct with
/// `deny_unknown_fields`, so a params shape the handler does not declare
/// surfaces as `InvalidParams` and is treated exactly like a handler
/// failure. A handler may answer with a bare value or with the structured
/// `{"status", "data", "message"}` envelope; the registry normalizes both.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> &'static str;

    async fn run(&self, params: &Value) -> Result<Value, WorkerError>;
}
