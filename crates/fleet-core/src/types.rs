use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A unit of work handed out by the server. Consumed exactly once: the
/// agent never re-polls while a descriptor is outstanding, and every
/// accepted non-update descriptor gets exactly one result submission.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDescriptor {
    pub id: String,
    pub task_type: String,
    #[serde(default = "empty_params")]
    pub params: Value,
}

fn empty_params() -> Value {
    Value::Object(Default::default())
}

/// One poll exchange: either a task descriptor or the server's explicit
/// "nothing for you right now".
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PollReply {
    Task(TaskDescriptor),
    NoTasks { status: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Success,
    Failure,
}

/// What goes back to the server for every accepted task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub worker_id: String,
    pub status: TaskStatus,
    pub result: Value,
}

impl TaskResult {
    pub fn success(task_id: String, worker_id: String, result: Value) -> Self {
        Self {
            task_id,
            worker_id,
            status: TaskStatus::Success,
            result,
        }
    }

    /// Failure results always carry the message under `result.error`.
    pub fn failure(task_id: String, worker_id: String, message: &str) -> Self {
        Self {
            task_id,
            worker_id,
            status: TaskStatus::Failure,
            result: json!({ "error": message }),
        }
    }
}
