//! Expired artifact sweep.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, warn};

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Files deleted
    pub files_removed: usize,
    /// Bytes reclaimed
    pub total_size_freed: u64,
    /// Per-file failures
    pub errors: Vec<String>,
}

/// Delete regular files in `dir` last modified more than `ttl` ago.
/// A missing directory is an empty sweep. Failures on individual files are
/// collected rather than aborting the sweep.
pub async fn sweep_expired_artifacts(dir: &Path, ttl: Duration) -> SweepReport {
    let mut report = SweepReport::default();
    let cutoff = SystemTime::now().checked_sub(ttl).unwrap_or(SystemTime::UNIX_EPOCH);

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
        Err(e) => {
            report.errors.push(format!("{}: {}", dir.display(), e));
            return report;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                report.errors.push(format!("{}: {}", dir.display(), e));
                break;
            }
        };
        let path = entry.path();

        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                report.errors.push(format!("{}: {}", path.display(), e));
                continue;
            }
        };
        let expired = metadata.modified().map_or(false, |modified| modified <= cutoff);
        if !expired {
            continue;
        }

        match fs::remove_file(&path).await {
            Ok(()) => {
                report.files_removed += 1;
                report.total_size_freed += metadata.len();
            }
            Err(e) => {
                warn!("Failed to sweep {}: {}", path.display(), e);
                report.errors.push(format!("{}: {}", path.display(), e));
            }
        }
    }

    debug!(
        "Swept {} files ({} bytes), {} errors",
        report.files_removed,
        report.total_size_freed,
        report.errors.len()
    );
    report
}
