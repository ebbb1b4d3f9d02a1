//! Free-space watchdog for the local HOT volumes feeding ingest.
//!
//! The flag is eventually consistent (refreshed every 5 minutes); accept
//! paths check it before touching storage and answer 507 while it is set.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::volumes::VolumeManager;

const REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

// Percent-free thresholds: warn, block ingest, block + flag critical.
const WARN_PCT: u64 = 20;
const BLOCK_PCT: u64 = 10;
const CRITICAL_PCT: u64 = 5;

pub struct DiskMonitor {
    blocked: AtomicBool,
    critical: AtomicBool,
    /// Absolute floor in bytes, from the disk-threshold-MB knob.
    min_free_bytes: u64,
}

impl DiskMonitor {
    pub fn new(threshold_mb: u64) -> Self {
        Self {
            blocked: AtomicBool::new(false),
            critical: AtomicBool::new(false),
            min_free_bytes: threshold_mb * 1024 * 1024,
        }
    }

    pub fn ingest_blocked(&self) -> bool {
        self.blocked.load(Ordering::Relaxed)
    }

    pub fn is_critical(&self) -> bool {
        self.critical.load(Ordering::Relaxed)
    }

    /// Probe every ACTIVE local volume and recompute the flags from the
    /// worst one.
    pub async fn refresh(&self, volumes: &VolumeManager) {
        let mut block = false;
        let mut critical = false;

        for (volume, local) in volumes.active_local_volumes().await {
            let (free, total) = match (local.available_bytes().await, local.total_bytes().await) {
                (Ok(free), Ok(total)) if total > 0 => (free, total),
                (Err(e), _) | (_, Err(e)) => {
                    error!(volume = %volume.code, error = %e, "Disk probe failed");
                    continue;
                }
                _ => continue,
            };
            let pct_free = free * 100 / total;

            if pct_free < CRITICAL_PCT {
                error!(volume = %volume.code, pct_free, "Disk critically low");
                critical = true;
                block = true;
            } else if pct_free < BLOCK_PCT || free < self.min_free_bytes {
                warn!(volume = %volume.code, pct_free, free, "Disk low, blocking ingest");
                block = true;
            } else if pct_free < WARN_PCT {
                warn!(volume = %volume.code, pct_free, "Disk space getting low");
            }
        }

        let was_blocked = self.blocked.swap(block, Ordering::Relaxed);
        self.critical.store(critical, Ordering::Relaxed);
        if was_blocked && !block {
            info!("Disk space recovered, ingest unblocked");
        }
    }

    pub fn spawn(self: Arc<Self>, volumes: Arc<VolumeManager>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REFRESH_INTERVAL);
            loop {
                interval.tick().await;
                self.refresh(&volumes).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unblocked() {
        let monitor = DiskMonitor::new(5120);
        assert!(!monitor.ingest_blocked());
        assert!(!monitor.is_critical());
    }
}
