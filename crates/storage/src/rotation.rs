use chrono::{Datelike, Utc};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::{DatabaseSpec, DatabaseUsage, DbStatus, Result, StoreError};

/// Excluded from write selection at or above this load on either axis.
const SELECTION_CAP: f64 = 0.85;
const WARNING_RATIO: f64 = 0.70;
const CRITICAL_RATIO: f64 = 0.90;
const FAILURES_TO_DOWN: u32 = 3;
const SUCCESSES_TO_RESTORE: u32 = 2;

struct DbState {
    usage: DatabaseUsage,
    consecutive_failures: u32,
    consecutive_successes: u32,
    /// (year, month) the write counter belongs to, UTC.
    counter_month: (i32, u32),
}

/// Tracks per-database load and steers each write to the least-loaded
/// healthy target. Counters live in memory and are flushed to the
/// usage meta-table by the probe loop.
pub struct RotationManager {
    states: Mutex<Vec<DbState>>,
}

impl RotationManager {
    pub fn new(specs: Vec<DatabaseSpec>) -> Self {
        let now = Utc::now();
        let states = specs
            .into_iter()
            .map(|spec| DbState {
                usage: DatabaseUsage {
                    name: spec.name,
                    url: spec.path.display().to_string(),
                    bytes_used: 0,
                    storage_quota_bytes: spec.storage_quota_bytes,
                    writes_this_month: 0,
                    monthly_write_limit: spec.monthly_write_limit,
                    last_health_check: None,
                    status: DbStatus::Healthy,
                },
                consecutive_failures: 0,
                consecutive_successes: 0,
                counter_month: (now.year(), now.month()),
            })
            .collect();

        Self {
            states: Mutex::new(states),
        }
    }

    pub fn choose_write_target(&self) -> Result<String> {
        self.choose_write_target_excluding(&[])
    }

    /// Healthy target with the lowest max(write ratio, byte ratio);
    /// anything at or above the 85% cap on either axis is skipped even
    /// when nominally healthy.
    pub fn choose_write_target_excluding(&self, excluded: &[String]) -> Result<String> {
        let states = self.states.lock().unwrap();

        let chosen = states
            .iter()
            .filter(|state| state.usage.status != DbStatus::Down)
            .filter(|state| !excluded.contains(&state.usage.name))
            .filter(|state| {
                state.usage.write_ratio() < SELECTION_CAP
                    && state.usage.byte_ratio() < SELECTION_CAP
            })
            .min_by(|a, b| {
                a.usage
                    .load_ratio()
                    .total_cmp(&b.usage.load_ratio())
                    .then_with(|| a.usage.name.cmp(&b.usage.name))
            });

        match chosen {
            Some(state) => Ok(state.usage.name.clone()),
            None => {
                error!("no database below the usage cap, refusing writes");
                Err(StoreError::NoCapacity)
            }
        }
    }

    pub fn record_write(&self, db_name: &str, rows: u64, bytes: u64) {
        let mut states = self.states.lock().unwrap();
        let Some(state) = states.iter_mut().find(|s| s.usage.name == db_name) else {
            return;
        };

        // Write counters are monthly; the first write of a new UTC
        // calendar month resets them.
        let now = Utc::now();
        let month = (now.year(), now.month());
        if month != state.counter_month {
            info!(db = db_name, "new month, resetting write counter");
            state.counter_month = month;
            state.usage.writes_this_month = 0;
        }

        state.usage.writes_this_month += rows;
        state.usage.bytes_used += bytes;

        if state.usage.status != DbStatus::Down {
            state.usage.status = status_for_ratio(state.usage.load_ratio());
        }
    }

    pub fn record_health_probe(&self, db_name: &str, ok: bool, rtt_ms: u64, bytes_used: Option<u64>) {
        let mut states = self.states.lock().unwrap();
        let Some(state) = states.iter_mut().find(|s| s.usage.name == db_name) else {
            return;
        };

        state.usage.last_health_check = Some(Utc::now());
        if let Some(bytes) = bytes_used {
            state.usage.bytes_used = bytes;
        }

        if state.usage.status == DbStatus::Down {
            if ok {
                state.consecutive_successes += 1;
                if state.consecutive_successes >= SUCCESSES_TO_RESTORE {
                    // A recovered database re-enters as warning, never
                    // straight back to healthy.
                    info!(db = db_name, rtt_ms, "database recovered");
                    state.usage.status = DbStatus::Warning;
                    state.consecutive_successes = 0;
                    state.consecutive_failures = 0;
                }
            } else {
                state.consecutive_successes = 0;
            }
            return;
        }

        if ok {
            state.consecutive_failures = 0;
            state.usage.status = status_for_ratio(state.usage.load_ratio());
        } else {
            state.consecutive_failures += 1;
            if state.consecutive_failures >= FAILURES_TO_DOWN {
                warn!(db = db_name, "three consecutive probe failures, marking down");
                state.usage.status = DbStatus::Down;
                state.consecutive_successes = 0;
            }
        }
    }

    pub fn snapshot(&self) -> Vec<DatabaseUsage> {
        self.states
            .lock()
            .unwrap()
            .iter()
            .map(|state| state.usage.clone())
            .collect()
    }
}

fn status_for_ratio(ratio: f64) -> DbStatus {
    if ratio >= CRITICAL_RATIO {
        DbStatus::Critical
    } else if ratio >= WARNING_RATIO {
        DbStatus::Warning
    } else {
        DbStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn spec(name: &str, write_limit: u64) -> DatabaseSpec {
        DatabaseSpec {
            name: name.to_string(),
            path: PathBuf::from(format!("/tmp/{name}.db")),
            storage_quota_bytes: 1_000_000,
            monthly_write_limit: write_limit,
        }
    }

    fn manager_with_usage(loads: &[(&str, u64)]) -> RotationManager {
        let manager = RotationManager::new(
            loads.iter().map(|(name, _)| spec(name, 100)).collect(),
        );
        for (name, writes) in loads {
            manager.record_write(name, *writes, 0);
        }
        manager
    }

    #[test]
    fn picks_least_loaded_target() {
        let manager = manager_with_usage(&[("a", 84), ("b", 20)]);
        assert_eq!(manager.choose_write_target().unwrap(), "b");
    }

    #[test]
    fn cap_excludes_loaded_target_even_if_healthy() {
        let manager = manager_with_usage(&[("a", 85), ("b", 20)]);
        assert_eq!(manager.choose_write_target().unwrap(), "b");

        let manager = manager_with_usage(&[("a", 85), ("b", 90)]);
        assert!(matches!(
            manager.choose_write_target(),
            Err(StoreError::NoCapacity)
        ));
    }

    #[test]
    fn lower_loaded_database_takes_the_writes() {
        // Two healthy databases with unequal load: every selection
        // must steer to the lower one until the loads cross.
        let manager = manager_with_usage(&[("a", 40), ("b", 10)]);
        for _ in 0..20 {
            let target = manager.choose_write_target().unwrap();
            assert_eq!(target, "b");
            manager.record_write(&target, 1, 0);
        }
    }

    #[test]
    fn byte_quota_counts_toward_cap() {
        let manager = RotationManager::new(vec![spec("a", 1000), spec("b", 1000)]);
        manager.record_write("a", 1, 900_000); // 90% of byte quota
        assert_eq!(manager.choose_write_target().unwrap(), "b");
    }

    #[test]
    fn status_ladder_tracks_load() {
        let manager = RotationManager::new(vec![spec("a", 100)]);

        manager.record_write("a", 69, 0);
        assert_eq!(manager.snapshot()[0].status, DbStatus::Healthy);
        manager.record_write("a", 1, 0);
        assert_eq!(manager.snapshot()[0].status, DbStatus::Warning);
        manager.record_write("a", 20, 0);
        assert_eq!(manager.snapshot()[0].status, DbStatus::Critical);
    }

    #[test]
    fn three_failures_mark_down_two_successes_restore_warning() {
        let manager = RotationManager::new(vec![spec("a", 100), spec("b", 100)]);

        manager.record_health_probe("a", false, 0, None);
        manager.record_health_probe("a", false, 0, None);
        assert_eq!(manager.snapshot()[0].status, DbStatus::Healthy);
        manager.record_health_probe("a", false, 0, None);
        assert_eq!(manager.snapshot()[0].status, DbStatus::Down);

        // Down targets never win selection.
        assert_eq!(manager.choose_write_target().unwrap(), "b");

        manager.record_health_probe("a", true, 5, None);
        assert_eq!(manager.snapshot()[0].status, DbStatus::Down);
        manager.record_health_probe("a", true, 5, None);
        assert_eq!(manager.snapshot()[0].status, DbStatus::Warning);
    }

    #[test]
    fn interrupted_success_streak_does_not_restore() {
        let manager = RotationManager::new(vec![spec("a", 100)]);
        for _ in 0..3 {
            manager.record_health_probe("a", false, 0, None);
        }
        manager.record_health_probe("a", true, 5, None);
        manager.record_health_probe("a", false, 0, None);
        manager.record_health_probe("a", true, 5, None);
        assert_eq!(manager.snapshot()[0].status, DbStatus::Down);
    }

    #[test]
    fn probe_updates_byte_usage() {
        let manager = RotationManager::new(vec![spec("a", 100)]);
        manager.record_health_probe("a", true, 3, Some(42_000));
        let usage = &manager.snapshot()[0];
        assert_eq!(usage.bytes_used, 42_000);
        assert!(usage.last_health_check.is_some());
    }
}
