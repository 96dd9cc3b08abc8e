//! Post-run file name cleanup
//!
//! The primary source appends its site name to every file it serves. Once a
//! run is quiescent the suffix is stripped: `"A - B my-free-mp3s.com.mp3"`
//! becomes `"A - B.mp3"`. Existing files are never overwritten.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// What the cleanup pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub renamed: usize,
    /// Renames skipped because the target name already existed
    pub skipped_existing: usize,
    pub failed: usize,
}

/// File name with `suffix` removed and the stem trimmed, or `None` when the
/// name does not contain `suffix`
pub fn cleaned_name(file_name: &str, suffix: &str) -> Option<String> {
    if suffix.is_empty() || !file_name.contains(suffix) {
        return None;
    }

    let stripped = file_name.replace(suffix, "");
    let path = Path::new(&stripped);
    let stem = path.file_stem()?.to_string_lossy();
    let stem = stem.trim();
    if stem.is_empty() {
        return None;
    }

    Some(match path.extension() {
        Some(ext) => format!("{}.{}", stem, ext.to_string_lossy()),
        None => stem.to_string(),
    })
}

/// Strip `suffix` from every file name in `dir`
///
/// Files whose name ends in one of `skip_suffixes` (partial transfers) are
/// left alone.
pub async fn strip_site_suffix(dir: &Path, suffix: &str, skip_suffixes: &[String]) -> CleanupReport {
    let mut report = CleanupReport::default();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read {} for cleanup: {}", dir.display(), e);
            return report;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("Cleanup of {} stopped early: {}", dir.display(), e);
                break;
            }
        };

        let is_file = entry
            .file_type()
            .await
            .map(|kind| kind.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().into_owned();
        if skip_suffixes
            .iter()
            .any(|skip| file_name.ends_with(skip.as_str()))
        {
            continue;
        }
        let Some(new_name) = cleaned_name(&file_name, suffix) else {
            continue;
        };

        let target = dir.join(&new_name);
        if tokio::fs::try_exists(&target).await.unwrap_or(true) {
            debug!("Not renaming '{}': '{}' already exists", file_name, new_name);
            report.skipped_existing += 1;
            continue;
        }

        match tokio::fs::rename(entry.path(), &target).await {
            Ok(()) => {
                debug!("Renamed '{}' to '{}'", file_name, new_name);
                report.renamed += 1;
            }
            Err(e) => {
                warn!("Failed to rename '{}': {}", file_name, e);
                report.failed += 1;
            }
        }
    }

    info!(
        "Cleanup renamed {} files ({} skipped, {} failed)",
        report.renamed, report.skipped_existing, report.failed
    );
    report
}
