pub mod error;
pub mod handler;
pub mod types;

pub use error::WorkerError;
pub use handler::TaskHandler;
pub use types::*;
