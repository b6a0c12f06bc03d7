use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleet_tasks::TaskRegistry;

use fleet_agent::agent::Agent;
use fleet_agent::client::ServerClient;
use fleet_agent::config::{AgentConfig, InstallPaths};
use fleet_agent::identity;
use fleet_agent::update::{remove_stale_update, UpdateManager};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AgentConfig::from_env();
    let paths = InstallPaths::discover().context("cannot locate the running executable")?;

    // A previous update cycle may have died between staging and swap.
    remove_stale_update(&paths);

    let worker_id = identity::get_or_create_identity(
        &paths.identity_file,
        &paths.nickname_file,
        &config.default_prefix,
    )
    .context("worker identity could not be persisted")?;
    let version = identity::resolve_version(&paths.version_file);

    info!("Worker {} | version {} | starting", worker_id, version);

    let client = ServerClient::new(&config, &worker_id, &version)?;
    let updater = UpdateManager::new(paths, config.download_timeout)?;
    let registry = TaskRegistry::builtin();

    let agent = Agent::new(config, client, registry, updater, worker_id);
    agent.run().await;

    info!("Exiting for binary replacement");
    std::process::exit(0);
}
