use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use fleet_core::WorkerError;

use crate::config::InstallPaths;

const ARCHIVE_NAME: &str = "update.zip";

/// Stages, verifies and hands off replacement binaries.
///
/// The running executable is never overwritten directly: the verified
/// replacement is moved to a side-by-side pending path and an external
/// relaunch helper finishes the swap after this process exits.
pub struct UpdateManager {
    http: reqwest::Client,
    paths: InstallPaths,
}

impl UpdateManager {
    pub fn new(paths: InstallPaths, download_timeout: Duration) -> Result<Self, WorkerError> {
        let http = reqwest::Client::builder()
            .timeout(download_timeout)
            .build()
            .map_err(|e| WorkerError::Update(e.to_string()))?;
        Ok(Self { http, paths })
    }

    /// Run one update attempt end to end. On `Ok` the relaunch helper has
    /// been launched and the caller is expected to exit the process.
    ///
    /// Staging lives in a per-attempt temp dir inside the install
    /// directory; it is removed on every exit path (same filesystem as the
    /// executable, so the final move is a plain rename).
    pub async fn apply_update(&self, params: &Value) -> Result<(), WorkerError> {
        let url = params
            .get("url")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| WorkerError::Update("update task carries no url".into()))?;

        let staging = TempDir::with_prefix_in("update-", &self.paths.install_dir)
            .map_err(|e| WorkerError::Update(format!("cannot create staging dir: {e}")))?;

        info!("Downloading update from {}", url);
        let archive_path = staging.path().join(ARCHIVE_NAME);
        self.download(url, &archive_path).await?;

        let replacement =
            extract_replacement(&archive_path, staging.path(), self.paths.replacement_name())
                .await?;

        // Without the helper the agent could strand itself unable to
        // restart; refuse before touching anything outside staging.
        if !self.paths.helper_script.is_file() {
            return Err(WorkerError::Update(format!(
                "relaunch helper {} is missing",
                self.paths.helper_script.display()
            )));
        }

        fs::rename(&replacement, &self.paths.pending_binary).map_err(|e| {
            WorkerError::Update(format!("cannot move replacement into place: {e}"))
        })?;

        self.launch_helper()?;
        info!(
            "Update staged at {}; handing off to {}",
            self.paths.pending_binary.display(),
            self.paths.helper_script.display()
        );
        Ok(())
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), WorkerError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| WorkerError::Update(format!("download failed: {e}")))?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| WorkerError::Update(format!("cannot write archive: {e}")))?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| WorkerError::Update(format!("download interrupted: {e}")))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| WorkerError::Update(format!("cannot write archive: {e}")))?;
        }
        file.flush()
            .await
            .map_err(|e| WorkerError::Update(format!("cannot write archive: {e}")))?;
        Ok(())
    }

    /// Launch the relaunch helper as an independent, detached process. It
    /// receives the current executable path and the pending replacement
    /// path, waits for this process to exit, swaps the files and restarts
    /// the agent.
    fn launch_helper(&self) -> Result<(), WorkerError> {
        let mut command = Command::new(&self.paths.helper_script);
        command
            .arg(&self.paths.current_exe)
            .arg(&self.paths.pending_binary)
            .current_dir(&self.paths.install_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach(&mut command);

        command
            .spawn()
            .map_err(|e| WorkerError::Update(format!("cannot launch relaunch helper: {e}")))?;
        Ok(())
    }
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

/// A crashed or interrupted update cycle can leave the pending binary
/// behind. Swept before the first poll so stale replacements never
/// accumulate or get mistaken for the active binary.
pub fn remove_stale_update(paths: &InstallPaths) {
    if paths.pending_binary.exists() {
        match fs::remove_file(&paths.pending_binary) {
            Ok(()) => warn!(
                "Removed stale pending update {}",
                paths.pending_binary.display()
            ),
            Err(e) => warn!(
                "Cannot remove stale pending update {}: {}",
                paths.pending_binary.display(),
                e
            ),
        }
    }
}

async fn extract_replacement(
    archive: &Path,
    staging: &Path,
    expected_name: String,
) -> Result<PathBuf, WorkerError> {
    let archive = archive.to_path_buf();
    let staging = staging.to_path_buf();
    tokio::task::spawn_blocking(move || unpack_archive(&archive, &staging, &expected_name))
        .await
        .map_err(|e| WorkerError::Update(format!("extraction task died: {e}")))?
}

/// Unpack the downloaded archive and verify it actually carries the
/// expected replacement binary. A corrupt or mismatched package must never
/// be installed.
fn unpack_archive(archive: &Path, staging: &Path, expected_name: &str) -> Result<PathBuf, WorkerError> {
    let file = fs::File::open(archive)
        .map_err(|e| WorkerError::Update(format!("cannot reopen archive: {e}")))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| WorkerError::Update(format!("bad update archive: {e}")))?;
    zip.extract(staging)
        .map_err(|e| WorkerError::Update(format!("cannot extract update archive: {e}")))?;

    let replacement = staging.join(expected_name);
    if !replacement.is_file() {
        return Err(WorkerError::Update(format!(
            "archive carries no '{expected_name}' binary"
        )));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&replacement, fs::Permissions::from_mode(0o755))
            .map_err(|e| WorkerError::Update(format!("cannot mark replacement executable: {e}")))?;
    }

    Ok(replacement)
}
