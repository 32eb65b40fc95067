//! Snapshot copier - point-in-time copies of a file the engine overwrites.
//!
//! Every snapshot gets its own name (`{job_id}-{iteration:04}.{ext}`), so a
//! later iteration or a concurrent job never clobbers a snapshot someone is
//! still reading.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::domain::Snapshot;
use crate::error::{GenserveError, Result};

/// Copies engine output into a private snapshot directory.
#[derive(Debug, Clone)]
pub struct SnapshotCopier {
    root: PathBuf,
}

impl SnapshotCopier {
    /// Create a copier that writes into `root` (created on first use).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path a snapshot for this job/iteration would be written to.
    pub fn path_for(&self, source: &Path, job_id: &str, iteration: u32) -> PathBuf {
        let name = match source.extension() {
            Some(ext) => format!("{}-{:04}.{}", job_id, iteration, ext.to_string_lossy()),
            None => format!("{}-{:04}", job_id, iteration),
        };
        self.root.join(name)
    }

    /// Copy `source` (bytes, permissions and modification time) into a new
    /// snapshot. The copy is complete when this returns.
    pub fn snapshot(&self, source: &Path, job_id: &str, iteration: u32) -> Result<Snapshot> {
        if !source.is_file() {
            return Err(GenserveError::Snapshot(format!(
                "engine output {} does not exist",
                source.display()
            )));
        }

        fs::create_dir_all(&self.root).map_err(|e| {
            GenserveError::Snapshot(format!("Failed to create {}: {}", self.root.display(), e))
        })?;

        let target = self.path_for(source, job_id, iteration);
        fs::copy(source, &target).map_err(|e| {
            GenserveError::Snapshot(format!(
                "Failed to copy {} to {}: {}",
                source.display(),
                target.display(),
                e
            ))
        })?;

        // fs::copy carries permissions; carry the modification time as well.
        if let Err(e) = copy_modified_time(source, &target) {
            debug!("Could not preserve modification time on {}: {}", target.display(), e);
        }

        Ok(Snapshot {
            job_id: job_id.to_string(),
            iteration,
            path: target,
        })
    }

    /// Remove every snapshot of `job_id` except `keep`. Returns how many were removed.
    pub fn prune(&self, job_id: &str, keep: &Path) -> Result<usize> {
        let prefix = format!("{}-", job_id);
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            let is_job_snapshot = path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with(&prefix))
                .unwrap_or(false);
            if is_job_snapshot && path != keep {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Give `target` the modification time of `source`.
fn copy_modified_time(source: &Path, target: &Path) -> std::io::Result<()> {
    let modified = fs::metadata(source)?.modified()?;
    fs::File::options().write(true).open(target)?.set_modified(modified)
}
