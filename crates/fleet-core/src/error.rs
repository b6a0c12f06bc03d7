use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("server request failed: {0}")]
    Transport(String),

    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("invalid task params: {0}")]
    InvalidParams(String),

    #[error("task execution failed: {0}")]
    Execution(String),

    #[error("update failed: {0}")]
    Update(String),

    #[error("identity persistence failed: {0}")]
    Persistence(String),
}

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        WorkerError::InvalidParams(err.to_string())
    }
}
