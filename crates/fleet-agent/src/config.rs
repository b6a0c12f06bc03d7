use std::env;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// File the stable worker id is persisted in.
pub const IDENTITY_FILE: &str = "worker_id";
/// Optional operator-supplied prefix for freshly generated ids.
pub const NICKNAME_FILE: &str = "nickname";
/// Version marker shipped next to the binary by the packaging step.
pub const VERSION_FILE: &str = "version.txt";
/// Relaunch helper expected next to the running executable.
pub const HELPER_SCRIPT: &str = if cfg!(windows) { "updater.bat" } else { "updater.sh" };
/// Suffix marking a staged replacement binary.
pub const PENDING_SUFFIX: &str = "update";

/// Deployment-time settings. Built once in `main` and passed by value into
/// the agent; nothing reads the environment after startup.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub server_url: String,
    pub default_prefix: String,
    /// Task type marking a self-update request.
    pub update_task_type: String,
    pub idle_sleep: Duration,
    pub connection_error_sleep: Duration,
    pub task_error_sleep: Duration,
    pub update_error_sleep: Duration,
    pub poll_timeout: Duration,
    pub submit_timeout: Duration,
    pub download_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3010".into(),
            default_prefix: "worker".into(),
            update_task_type: "update_worker".into(),
            idle_sleep: Duration::from_secs(60),
            connection_error_sleep: Duration::from_secs(60),
            task_error_sleep: Duration::from_secs(30),
            update_error_sleep: Duration::from_secs(180),
            poll_timeout: Duration::from_secs(10),
            submit_timeout: Duration::from_secs(60),
            download_timeout: Duration::from_secs(300),
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("FLEET_SERVER_URL") {
            config.server_url = url;
        }
        config.idle_sleep = secs_var("FLEET_IDLE_SLEEP_SECS", config.idle_sleep);
        config.connection_error_sleep =
            secs_var("FLEET_CONN_ERROR_SLEEP_SECS", config.connection_error_sleep);
        config.task_error_sleep = secs_var("FLEET_TASK_ERROR_SLEEP_SECS", config.task_error_sleep);
        config.update_error_sleep =
            secs_var("FLEET_UPDATE_ERROR_SLEEP_SECS", config.update_error_sleep);

        config
    }
}

fn secs_var(key: &str, fallback: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(fallback)
}

/// Everything path-shaped the agent touches, resolved once at startup from
/// the running executable's location.
#[derive(Debug, Clone)]
pub struct InstallPaths {
    pub current_exe: PathBuf,
    pub install_dir: PathBuf,
    pub identity_file: PathBuf,
    pub nickname_file: PathBuf,
    pub version_file: PathBuf,
    pub helper_script: PathBuf,
    /// Side-by-side destination for a staged replacement binary.
    pub pending_binary: PathBuf,
}

impl InstallPaths {
    pub fn discover() -> io::Result<Self> {
        let current_exe = env::current_exe()?;
        let install_dir = current_exe
            .parent()
            .map(PathBuf::from)
            .ok_or_else(|| io::Error::other("executable has no parent directory"))?;

        let data_dir = env::var("FLEET_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| install_dir.clone());

        Ok(Self::rooted_at(current_exe, data_dir))
    }

    /// Lay out all well-known paths for an executable living anywhere.
    /// `data_dir` holds the identity, nickname and version files; the
    /// helper script and pending binary always sit next to the executable.
    pub fn rooted_at(current_exe: PathBuf, data_dir: PathBuf) -> Self {
        let install_dir = current_exe
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut pending_name = current_exe
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        pending_name.push(".");
        pending_name.push(PENDING_SUFFIX);

        Self {
            identity_file: data_dir.join(IDENTITY_FILE),
            nickname_file: data_dir.join(NICKNAME_FILE),
            version_file: data_dir.join(VERSION_FILE),
            helper_script: install_dir.join(HELPER_SCRIPT),
            pending_binary: install_dir.join(pending_name),
            current_exe,
            install_dir,
        }
    }

    /// Name a replacement binary must carry at the update archive root.
    pub fn replacement_name(&self) -> String {
        self.current_exe
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "fleet-agent".into())
    }
}
