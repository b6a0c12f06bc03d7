use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use fleet_core::{TaskHandler, WorkerError};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SystemInfoParams {
    /// Optional settle time before probing, in seconds.
    #[serde(default)]
    delay_secs: u64,
}

/// Basic host probe: machine name, OS and architecture.
pub struct SystemInfoTask;

impl SystemInfoTask {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemInfoTask {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskHandler for SystemInfoTask {
    fn task_type(&self) -> &'static str {
        "get_sys_info"
    }

    async fn run(&self, params: &Value) -> Result<Value, WorkerError> {
        let params: SystemInfoParams = serde_json::from_value(params.clone())?;

        if params.delay_secs > 0 {
            tokio::time::sleep(Duration::from_secs(params.delay_secs)).await;
        }

        let computer_name = hostname::get()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".into());

        info!("SYS_INFO: Probed host '{}'", computer_name);

        Ok(json!({
            "status": "success",
            "data": {
                "computer_name": computer_name,
                "os": std::env::consts::OS,
                "os_family": std::env::consts::FAMILY,
                "arch": std::env::consts::ARCH,
            }
        }))
    }
}
