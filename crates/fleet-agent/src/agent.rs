use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use fleet_core::{PollReply, TaskDescriptor, TaskResult, WorkerError};
use fleet_tasks::TaskRegistry;

use crate::client::ServerClient;
use crate::config::AgentConfig;
use crate::update::UpdateManager;

/// Why the loop pauses before the next poll. Each class has its own
/// independently configured interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pause {
    Idle,
    ConnectionError,
    TaskError,
    UpdateError,
}

impl Pause {
    fn duration(self, config: &AgentConfig) -> Duration {
        match self {
            Pause::Idle => config.idle_sleep,
            Pause::ConnectionError => config.connection_error_sleep,
            Pause::TaskError => config.task_error_sleep,
            Pause::UpdateError => config.update_error_sleep,
        }
    }
}

/// Outcome of one loop iteration. `Continue(None)` polls again right away
/// (a task was executed and reported cleanly).
enum Flow {
    Continue(Option<Pause>),
    Handoff,
}

/// The only way `run` finishes: an update was staged and handed off, and
/// the process must now exit so the relaunch helper can swap binaries.
#[derive(Debug)]
pub struct UpdateHandoff;

/// The poll → dispatch → execute → report loop. Exactly one task is in
/// flight at a time; the next poll never starts before the current task's
/// result submission has been attempted.
pub struct Agent {
    config: AgentConfig,
    client: ServerClient,
    registry: TaskRegistry,
    updater: UpdateManager,
    worker_id: String,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        client: ServerClient,
        registry: TaskRegistry,
        updater: UpdateManager,
        worker_id: String,
    ) -> Self {
        Self {
            config,
            client,
            registry,
            updater,
            worker_id,
        }
    }

    pub async fn run(&self) -> UpdateHandoff {
        info!(
            "Worker {} polling {}",
            self.worker_id, self.config.server_url
        );

        loop {
            let pause = match self.iteration().await {
                Ok(Flow::Handoff) => return UpdateHandoff,
                Ok(Flow::Continue(pause)) => pause,
                Err(e) => {
                    error!("{}; backing off", e);
                    Some(Pause::ConnectionError)
                }
            };

            if let Some(pause) = pause {
                debug!("Sleeping {:?} ({:?})", pause.duration(&self.config), pause);
                sleep(pause.duration(&self.config)).await;
            }
        }
    }

    async fn iteration(&self) -> Result<Flow, WorkerError> {
        let task = match self.client.fetch_task().await? {
            PollReply::NoTasks { .. } => {
                debug!("No tasks available");
                return Ok(Flow::Continue(Some(Pause::Idle)));
            }
            PollReply::Task(task) => task,
        };

        info!("Task {} received (type '{}')", task.id, task.task_type);

        if task.task_type == self.config.update_task_type {
            self.run_update(task).await
        } else {
            self.run_task(task).await
        }
    }

    /// Update dispatch owns its failure reporting entirely: the failure
    /// result is submitted best-effort and a dead submit never masks the
    /// update backoff.
    async fn run_update(&self, task: TaskDescriptor) -> Result<Flow, WorkerError> {
        match self.updater.apply_update(&task.params).await {
            Ok(()) => Ok(Flow::Handoff),
            Err(e) => {
                warn!("Update failed: {}", e);
                let result =
                    TaskResult::failure(task.id, self.worker_id.clone(), &e.to_string());
                if let Err(submit_err) = self.client.submit_result(&result).await {
                    warn!("Could not report update failure: {}", submit_err);
                }
                Ok(Flow::Continue(Some(Pause::UpdateError)))
            }
        }
    }

    /// Regular task: execute through the registry, then submit exactly one
    /// result. A failed submission after a successfully executed task means
    /// the task is lost — the agent does not re-queue work on its own.
    async fn run_task(&self, task: TaskDescriptor) -> Result<Flow, WorkerError> {
        let (result, pause) = match self.registry.execute(&task.task_type, &task.params).await {
            Ok(value) => (
                TaskResult::success(task.id, self.worker_id.clone(), value),
                None,
            ),
            Err(e) => {
                warn!("Task {} failed: {}", task.id, e);
                (
                    TaskResult::failure(task.id, self.worker_id.clone(), &e.to_string()),
                    Some(Pause::TaskError),
                )
            }
        };

        self.client.submit_result(&result).await?;
        info!(
            "Task {} reported with status {:?}",
            result.task_id, result.status
        );
        Ok(Flow::Continue(pause))
    }
}
