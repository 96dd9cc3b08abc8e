//! Output directory layout and preparation
//!
//! Every run writes into its own session folder,
//! `PlaylistFetcher_Session_<dd_MM_yyyy_HH_mm_ss>`, placed under the
//! user-supplied base directory or, by default, the desktop (falling back to
//! the home directory).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, error};

use crate::constants::output;
use crate::errors::{RunError, RunResult};

/// Session folder name for a run started at `started`
pub fn session_folder_name(started: DateTime<Local>) -> String {
    format!(
        "{}{}",
        output::SESSION_FOLDER_PREFIX,
        started.format(output::SESSION_ID_FORMAT)
    )
}

/// Base directory used when none is given
pub fn default_output_base() -> PathBuf {
    dirs::desktop_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Session folder under `base`, or under the default base
pub fn session_output_dir(base: Option<&Path>, started: DateTime<Local>) -> PathBuf {
    let base = base.map(Path::to_path_buf).unwrap_or_else(default_output_base);
    base.join(session_folder_name(started))
}

/// Create `path` and make sure files can be written into it
///
/// Any failure is reported as [`RunError::DirectoryAccess`] so the run can
/// abort before a session is created.
pub async fn prepare_output_directory(path: &Path) -> RunResult<()> {
    let access = |source: std::io::Error| {
        error!("Output directory {} is not usable: {}", path.display(), source);
        RunError::DirectoryAccess {
            path: path.to_path_buf(),
            source,
        }
    };

    tokio::fs::create_dir_all(path).await.map_err(access)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = tokio::fs::metadata(path).await.map_err(access)?.permissions();
        perms.set_mode(output::DIRECTORY_PERMISSIONS);
        tokio::fs::set_permissions(path, perms).await.map_err(access)?;
    }

    // writability probe, removed when dropped
    let dir = path.to_path_buf();
    tokio::task::spawn_blocking(move || tempfile::NamedTempFile::new_in(dir))
        .await
        .map_err(|e| access(std::io::Error::new(std::io::ErrorKind::Other, e)))?
        .map_err(access)?;

    debug!("Output directory ready: {}", path.display());
    Ok(())
}
