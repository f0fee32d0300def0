//! Store-path selection (spec §4.10).
//!
//! A new regular upload needs one store path chosen from the configured set,
//! subject to whichever reserved-space policy the node is running. Round-
//! robin and load-balance only decide *which* path to prefer; the reserved-
//! space policy decides whether a candidate path is eligible at all.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::{ReservedSpacePolicy, StorePathConfig, StorePathPolicy};
use crate::error::StorageError;

/// Disk usage for one store path, as read from the filesystem (spec §4.10).
#[derive(Debug, Clone, Copy)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

/// Chooses a store path for new uploads, tracking round-robin state across
/// calls.
pub struct StorePathChooser {
    paths: Vec<StorePathConfig>,
    policy: StorePathPolicy,
    reserved: ReservedSpacePolicy,
    round_robin_cursor: AtomicUsize,
}

impl StorePathChooser {
    pub fn new(paths: Vec<StorePathConfig>, policy: StorePathPolicy, reserved: ReservedSpacePolicy) -> Self {
        Self { paths, policy, reserved, round_robin_cursor: AtomicUsize::new(0) }
    }

    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    pub fn path(&self, index: usize) -> Option<&Path> {
        self.paths.get(index).map(|p| p.path.as_path())
    }

    /// Picks a store path index, given a `usage` lookup for each candidate
    /// path (injected so callers can stat the filesystem without this type
    /// doing blocking I/O itself).
    pub fn choose(
        &self,
        usage: impl Fn(&Path) -> std::io::Result<DiskUsage>,
    ) -> Result<u8, StorageError> {
        let all_usage: Vec<(usize, DiskUsage)> = self
            .paths
            .iter()
            .enumerate()
            .filter_map(|(i, p)| usage(&p.path).ok().map(|u| (i, u)))
            .collect();

        let fallback_clears = self.average_free_mb(&all_usage) > self.reserved_mb_or_zero();

        let eligible: Vec<(usize, DiskUsage)> = all_usage
            .into_iter()
            .filter(|(i, u)| self.is_eligible(*i, *u, fallback_clears))
            .collect();

        if eligible.is_empty() {
            return Err(StorageError::NoSpace);
        }

        let chosen = match self.policy {
            StorePathPolicy::RoundRobin => {
                let start = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % self.paths.len();
                eligible
                    .iter()
                    .find(|(i, _)| *i >= start)
                    .or_else(|| eligible.first())
                    .copied()
                    .unwrap()
            }
            StorePathPolicy::LoadBalance => *eligible
                .iter()
                .max_by_key(|(_, u)| u.free_bytes)
                .expect("eligible is non-empty"),
        };
        Ok(chosen.0 as u8)
    }

    fn is_eligible(&self, index: usize, usage: DiskUsage, fallback_clears: bool) -> bool {
        match &self.reserved {
            ReservedSpacePolicy::AbsoluteMb { reserved_mb } => {
                usage.free_bytes > reserved_mb * 1024 * 1024
            }
            ReservedSpacePolicy::Ratio { ratio } => {
                let reserved_bytes = (usage.total_bytes as f64 * ratio) as u64;
                usage.free_bytes > reserved_bytes
            }
            ReservedSpacePolicy::AbsoluteWithFallback { reserved_mb } => {
                // Falls back to "does the system-wide average free space
                // clear the reservation" if this path alone doesn't (spec
                // §4.10 variant 3): a path that's individually tight but
                // sits in a group that's healthy on average is still usable.
                let _ = index;
                usage.free_bytes > reserved_mb * 1024 * 1024 || fallback_clears
            }
            ReservedSpacePolicy::RatioPerPath { ratio } => {
                let reserved_bytes = (usage.total_bytes as f64 * ratio) as u64;
                usage.free_bytes > reserved_bytes
            }
        }
    }

    fn reserved_mb_or_zero(&self) -> f64 {
        match &self.reserved {
            ReservedSpacePolicy::AbsoluteWithFallback { reserved_mb } => *reserved_mb as f64,
            _ => 0.0,
        }
    }

    /// Average free space across all configured paths, in megabytes.
    fn average_free_mb(&self, all_usage: &[(usize, DiskUsage)]) -> f64 {
        if all_usage.is_empty() {
            return 0.0;
        }
        let total_free: u64 = all_usage.iter().map(|(_, u)| u.free_bytes).sum();
        (total_free as f64 / all_usage.len() as f64) / (1024.0 * 1024.0)
    }

    pub fn store_paths(&self) -> &[StorePathConfig] {
        &self.paths
    }
}

/// Computes the on-disk two-level fan-out directory for a store path
/// (spec §4.4).
pub fn fanout_dir(base: &Path, dir_high: u8, dir_low: u8) -> PathBuf {
    base.join(format!("{:02X}", dir_high)).join(format!("{:02X}", dir_low))
}

#[cfg(test)]
mod test {
    use super::*;

    fn chooser(policy: StorePathPolicy, reserved: ReservedSpacePolicy) -> StorePathChooser {
        StorePathChooser::new(
            vec![
                StorePathConfig { path: "/data0".into() },
                StorePathConfig { path: "/data1".into() },
            ],
            policy,
            reserved,
        )
    }

    #[test]
    fn load_balance_prefers_more_free_space() {
        let chooser = chooser(StorePathPolicy::LoadBalance, ReservedSpacePolicy::Ratio { ratio: 0.0 });
        let chosen = chooser
            .choose(|p| {
                if p == Path::new("/data0") {
                    Ok(DiskUsage { total_bytes: 100, free_bytes: 10 })
                } else {
                    Ok(DiskUsage { total_bytes: 100, free_bytes: 90 })
                }
            })
            .unwrap();
        assert_eq!(chosen, 1);
    }

    #[test]
    fn no_space_when_every_path_below_reservation() {
        let chooser = chooser(
            StorePathPolicy::RoundRobin,
            ReservedSpacePolicy::AbsoluteMb { reserved_mb: 1024 },
        );
        let result = chooser.choose(|_| Ok(DiskUsage { total_bytes: 100, free_bytes: 1 }));
        assert!(matches!(result, Err(StorageError::NoSpace)));
    }

    #[test]
    fn absolute_with_fallback_rejects_when_average_also_below_reservation() {
        let chooser = chooser(
            StorePathPolicy::RoundRobin,
            ReservedSpacePolicy::AbsoluteWithFallback { reserved_mb: 1024 },
        );
        let result = chooser.choose(|_| Ok(DiskUsage { total_bytes: 100, free_bytes: 1 }));
        assert!(matches!(result, Err(StorageError::NoSpace)));
    }

    #[test]
    fn absolute_with_fallback_accepts_tight_path_when_average_clears_reservation() {
        let chooser = chooser(
            StorePathPolicy::RoundRobin,
            ReservedSpacePolicy::AbsoluteWithFallback { reserved_mb: 1 },
        );
        let chosen = chooser
            .choose(|p| {
                if p == Path::new("/data0") {
                    Ok(DiskUsage { total_bytes: 1024 * 1024 * 1024, free_bytes: 10 * 1024 })
                } else {
                    Ok(DiskUsage { total_bytes: 1024 * 1024 * 1024, free_bytes: 4 * 1024 * 1024 * 1024 })
                }
            })
            .unwrap();
        assert!(chosen == 0 || chosen == 1);
    }

    #[test]
    fn round_robin_advances_across_calls() {
        let chooser = chooser(StorePathPolicy::RoundRobin, ReservedSpacePolicy::Ratio { ratio: 0.0 });
        let usage = |_: &Path| Ok(DiskUsage { total_bytes: 100, free_bytes: 50 });
        let first = chooser.choose(usage).unwrap();
        let second = chooser.choose(usage).unwrap();
        assert_ne!(first, second);
    }
}
