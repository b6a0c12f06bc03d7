//! End-to-end loop behavior against a scripted in-process task server.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;

use fleet_agent::agent::Agent;
use fleet_agent::client::ServerClient;
use fleet_agent::config::{AgentConfig, InstallPaths};
use fleet_agent::update::UpdateManager;
use fleet_core::{TaskHandler, WorkerError};
use fleet_tasks::TaskRegistry;

#[derive(Default)]
struct ServerState {
    replies: Mutex<VecDeque<Value>>,
    fail_polls: Mutex<u32>,
    polls: Mutex<Vec<Instant>>,
    poll_worker_ids: Mutex<Vec<String>>,
    submissions: Mutex<Vec<Value>>,
}

impl ServerState {
    fn poll_count(&self) -> usize {
        self.polls.lock().unwrap().len()
    }

    fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    fn poll_gap(&self, after: usize) -> Duration {
        let polls = self.polls.lock().unwrap();
        polls[after + 1].duration_since(polls[after])
    }
}

async fn get_task(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    state.polls.lock().unwrap().push(Instant::now());
    if let Some(id) = headers.get("X-Worker-ID").and_then(|v| v.to_str().ok()) {
        state.poll_worker_ids.lock().unwrap().push(id.to_string());
    }

    {
        let mut fail = state.fail_polls.lock().unwrap();
        if *fail > 0 {
            *fail -= 1;
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let next = state.replies.lock().unwrap().pop_front();
    Json(next.unwrap_or_else(|| json!({"status": "no_tasks"}))).into_response()
}

async fn submit_result(State(state): State<Arc<ServerState>>, Json(body): Json<Value>) -> Json<Value> {
    state.submissions.lock().unwrap().push(body);
    Json(json!({"ok": true}))
}

async fn spawn_server(state: Arc<ServerState>) -> SocketAddr {
    let app = Router::new()
        .route("/get_task", get(get_task))
        .route("/submit_result", post(submit_result))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn test_config(addr: SocketAddr) -> AgentConfig {
    let mut config = AgentConfig::default();
    config.server_url = format!("http://{}", addr);
    config.idle_sleep = Duration::from_millis(30);
    config.connection_error_sleep = Duration::from_millis(60);
    config.task_error_sleep = Duration::from_millis(90);
    config.update_error_sleep = Duration::from_millis(150);
    config
}

fn spawn_agent(config: AgentConfig, registry: TaskRegistry, install: &TempDir) -> tokio::task::JoinHandle<()> {
    let paths = InstallPaths::rooted_at(
        install.path().join("fleet-agent"),
        install.path().to_path_buf(),
    );
    let client = ServerClient::new(&config, "worker_test", "1.0.0").unwrap();
    let updater = UpdateManager::new(paths, config.download_timeout).unwrap();
    let agent = Agent::new(config, client, registry, updater, "worker_test".into());

    tokio::spawn(async move {
        agent.run().await;
    })
}

async fn wait_for(mut cond: impl FnMut() -> bool, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

struct EchoTask;

#[async_trait]
impl TaskHandler for EchoTask {
    fn task_type(&self) -> &'static str {
        "echo"
    }

    async fn run(&self, params: &Value) -> Result<Value, WorkerError> {
        Ok(json!({"status": "success", "data": params.clone()}))
    }
}

fn echo_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry.register(Arc::new(EchoTask));
    registry
}

#[tokio::test]
async fn idle_loop_polls_without_submitting() {
    let state = Arc::new(ServerState::default());
    let addr = spawn_server(state.clone()).await;
    let install = TempDir::new().unwrap();

    let handle = spawn_agent(test_config(addr), echo_registry(), &install);
    wait_for(|| state.poll_count() >= 3, "three polls").await;
    handle.abort();

    assert_eq!(state.submission_count(), 0);
    // Each empty poll is followed by the idle interval.
    assert!(state.poll_gap(0) >= Duration::from_millis(30));
    assert!(state.poll_gap(1) >= Duration::from_millis(30));
}

#[tokio::test]
async fn echo_task_round_trips_the_exact_wire_result() {
    let state = Arc::new(ServerState::default());
    state
        .replies
        .lock()
        .unwrap()
        .push_back(json!({"id": "t1", "task_type": "echo", "params": {"x": 1}}));
    let addr = spawn_server(state.clone()).await;
    let install = TempDir::new().unwrap();

    let handle = spawn_agent(test_config(addr), echo_registry(), &install);
    wait_for(|| state.submission_count() >= 1, "one submission").await;
    handle.abort();

    let submitted = state.submissions.lock().unwrap()[0].clone();
    assert_eq!(
        submitted,
        json!({
            "task_id": "t1",
            "worker_id": "worker_test",
            "status": "success",
            "result": {"x": 1}
        })
    );
    assert_eq!(state.poll_worker_ids.lock().unwrap()[0], "worker_test");
}

#[tokio::test]
async fn executed_task_polls_again_without_idle_sleep() {
    let state = Arc::new(ServerState::default());
    state
        .replies
        .lock()
        .unwrap()
        .push_back(json!({"id": "t1", "task_type": "echo", "params": {}}));
    let addr = spawn_server(state.clone()).await;
    let install = TempDir::new().unwrap();

    let handle = spawn_agent(test_config(addr), echo_registry(), &install);
    wait_for(|| state.poll_count() >= 2, "the follow-up poll").await;
    handle.abort();

    assert_eq!(state.submission_count(), 1);
}

#[tokio::test]
async fn unknown_task_type_reports_failure_then_task_backoff() {
    let state = Arc::new(ServerState::default());
    state
        .replies
        .lock()
        .unwrap()
        .push_back(json!({"id": "t9", "task_type": "nonsense", "params": {}}));
    let addr = spawn_server(state.clone()).await;
    let install = TempDir::new().unwrap();

    let handle = spawn_agent(test_config(addr), echo_registry(), &install);
    wait_for(|| state.poll_count() >= 2, "the poll after the failure").await;
    handle.abort();

    let submitted = state.submissions.lock().unwrap()[0].clone();
    assert_eq!(submitted["task_id"], "t9");
    assert_eq!(submitted["status"], "failure");
    let message = submitted["result"]["error"].as_str().unwrap();
    assert!(message.contains("nonsense"));

    // The poll after a failed task waits out the task-error interval.
    assert!(state.poll_gap(0) >= Duration::from_millis(90));
}

#[tokio::test]
async fn poll_error_backs_off_with_connection_interval() {
    let state = Arc::new(ServerState::default());
    *state.fail_polls.lock().unwrap() = 1;
    let addr = spawn_server(state.clone()).await;
    let install = TempDir::new().unwrap();

    let handle = spawn_agent(test_config(addr), echo_registry(), &install);
    wait_for(|| state.poll_count() >= 2, "the retry poll").await;
    handle.abort();

    // No task was accepted, so nothing was submitted.
    assert_eq!(state.submission_count(), 0);
    assert!(state.poll_gap(0) >= Duration::from_millis(60));
}

#[tokio::test]
async fn failed_update_submits_failure_then_update_backoff() {
    let state = Arc::new(ServerState::default());
    let addr = spawn_server(state.clone()).await;
    state.replies.lock().unwrap().push_back(json!({
        "id": "u1",
        "task_type": "update_worker",
        "params": {"url": format!("http://{}/missing.zip", addr)}
    }));
    let install = TempDir::new().unwrap();

    let handle = spawn_agent(test_config(addr), echo_registry(), &install);
    wait_for(|| state.poll_count() >= 2, "the poll after the update failure").await;
    handle.abort();

    let submitted = state.submissions.lock().unwrap()[0].clone();
    assert_eq!(submitted["task_id"], "u1");
    assert_eq!(submitted["status"], "failure");
    assert!(submitted["result"]["error"].as_str().unwrap().len() > 0);

    // Update failures wait out the longest interval before re-polling.
    assert!(state.poll_gap(0) >= Duration::from_millis(150));

    // The failed attempt left no staging directories behind.
    let leftovers: Vec<_> = std::fs::read_dir(install.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("update-"))
        .collect();
    assert!(leftovers.is_empty());
}
