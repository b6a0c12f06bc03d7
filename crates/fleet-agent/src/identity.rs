use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{info, warn};
use uuid::Uuid;

use fleet_core::WorkerError;

/// Hex characters appended to the prefix of a freshly generated id.
const ID_HEX_LEN: usize = 12;

/// Stable worker id: read back verbatim when the identity file already
/// holds one, generated and persisted exactly once otherwise.
///
/// A fresh id is `<prefix>_<hex>`, where the prefix comes from the
/// operator's nickname file when that is readable and non-empty. Running
/// with a throwaway id would break result attribution across restarts, so
/// a failed persist is fatal to startup.
pub fn get_or_create_identity(
    path: &Path,
    nickname_path: &Path,
    default_prefix: &str,
) -> Result<String, WorkerError> {
    if let Ok(existing) = fs::read_to_string(path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return Ok(existing.to_string());
        }
    }

    let prefix = read_nickname(nickname_path).unwrap_or_else(|| default_prefix.to_string());
    let hex = Uuid::new_v4().simple().to_string();
    let id = format!("{}_{}", prefix, &hex[..ID_HEX_LEN]);

    persist_atomic(path, &id)?;
    info!("Generated new worker identity '{}'", id);
    Ok(id)
}

fn read_nickname(path: &Path) -> Option<String> {
    let raw = fs::read_to_string(path).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Write to a temp file in the same directory, then rename over the final
/// path, so a crash mid-write can never leave a truncated identity behind.
fn persist_atomic(path: &Path, contents: &str) -> Result<(), WorkerError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp =
        NamedTempFile::new_in(dir).map_err(|e| WorkerError::Persistence(e.to_string()))?;
    tmp.write_all(contents.as_bytes())
        .map_err(|e| WorkerError::Persistence(e.to_string()))?;
    tmp.persist(path)
        .map_err(|e| WorkerError::Persistence(e.to_string()))?;
    Ok(())
}

/// Version marker resolved from the packaged version file. Never invented
/// at runtime beyond the documented `0.0.0` fallback for a missing marker.
pub fn resolve_version(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().to_string(),
        _ => {
            warn!(
                "No version marker at {}, reporting 0.0.0",
                path.display()
            );
            "0.0.0".into()
        }
    }
}
