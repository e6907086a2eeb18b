use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::{Progress, Result};

/// Durable checkpoint of the scheduler position, backed by a single
/// JSON file written atomically via temp-file + rename. Loading never
/// fails the scheduler: a missing or malformed file yields a
/// zero-initialized record and a warning.
pub struct ProgressTracker {
    path: PathBuf,
    shared: Arc<RwLock<Progress>>,
}

/// Read-only view handed to the monitoring API.
#[derive(Clone)]
pub struct ProgressHandle {
    shared: Arc<RwLock<Progress>>,
}

impl ProgressHandle {
    pub fn snapshot(&self) -> Progress {
        self.shared.read().unwrap().clone()
    }
}

impl ProgressTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            shared: Arc::new(RwLock::new(Progress::default())),
        }
    }

    pub fn handle(&self) -> ProgressHandle {
        ProgressHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn load(&self) -> Progress {
        let mut progress = match std::fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str::<Progress>(&raw) {
                Ok(progress) => progress,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "malformed progress file, starting fresh");
                    Progress::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Progress::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable progress file, starting fresh");
                Progress::default()
            }
        };

        // A set running flag means the previous process died mid-run.
        if progress.running {
            warn!("previous run did not shut down cleanly");
            progress.running = false;
            if let Err(e) = self.save(&mut progress) {
                warn!(error = %e, "could not persist recovered progress");
            }
        }

        *self.shared.write().unwrap() = progress.clone();
        progress
    }

    pub fn save(&self, progress: &mut Progress) -> Result<()> {
        progress.updated_at = Some(Utc::now());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp = tmp_path(&self.path);
        std::fs::write(&tmp, serde_json::to_string_pretty(progress)?)?;
        std::fs::rename(&tmp, &self.path)?;

        *self.shared.write().unwrap() = progress.clone();
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        let mut fresh = Progress::default();
        self.save(&mut fresh)?;
        info!("progress reset to page 1");
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let tracker = ProgressTracker::new(dir.path().join("progress.json"));

        let progress = tracker.load();
        assert_eq!(progress.current_page, 1);
        assert_eq!(progress.processed, 0);
        assert!(!progress.running);
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        let tracker = ProgressTracker::new(&path);

        let mut progress = Progress {
            current_page: 7,
            processed: 300,
            succeeded: 280,
            failed: 20,
            ..Progress::default()
        };
        tracker.save(&mut progress).unwrap();
        assert!(progress.updated_at.is_some());

        let reloaded = ProgressTracker::new(&path).load();
        assert_eq!(reloaded.current_page, 7);
        assert_eq!(reloaded.processed, 300);
        assert_eq!(reloaded.succeeded, 280);
        assert_eq!(reloaded.failed, 20);
    }

    #[test]
    fn malformed_file_recovers_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "{not json").unwrap();

        let progress = ProgressTracker::new(&path).load();
        assert_eq!(progress.current_page, 1);
    }

    #[test]
    fn stale_running_flag_cleared_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        let tracker = ProgressTracker::new(&path);

        let mut progress = Progress {
            running: true,
            current_page: 3,
            ..Progress::default()
        };
        tracker.save(&mut progress).unwrap();

        let reloaded = ProgressTracker::new(&path).load();
        assert!(!reloaded.running);
        assert_eq!(reloaded.current_page, 3);

        // And the recovery was persisted, not just in memory.
        let on_disk: Progress =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(!on_disk.running);
    }

    #[test]
    fn handle_sees_saved_progress() {
        let dir = TempDir::new().unwrap();
        let tracker = ProgressTracker::new(dir.path().join("progress.json"));
        let handle = tracker.handle();

        let mut progress = Progress {
            current_page: 4,
            ..Progress::default()
        };
        tracker.save(&mut progress).unwrap();
        assert_eq!(handle.snapshot().current_page, 4);
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        let tracker = ProgressTracker::new(&path);
        tracker.save(&mut Progress::default()).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec!["progress.json"]);
    }
}
