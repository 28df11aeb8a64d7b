use crate::config::StorageConfig;
use crate::error::{CatwatchError, Result};
use crate::persistence::{parse_artifact_timestamp, ARTIFACT_EXTENSION};
use crate::telemetry::TelemetryAggregator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reports the used fraction of the volume holding a directory
pub trait DiskUsageProbe: Send + Sync {
    fn usage(&self, path: &Path) -> Result<f64>;
}

/// `statvfs(3)` based probe
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsProbe;

impl DiskUsageProbe for StatvfsProbe {
    fn usage(&self, path: &Path) -> Result<f64> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| CatwatchError::component("eviction", "path contains a NUL byte"))?;

        let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stats) };
        if rc != 0 {
            return Err(CatwatchError::Io(std::io::Error::last_os_error()));
        }

        let total = stats.f_blocks as f64;
        if total <= 0.0 {
            return Ok(0.0);
        }
        let available = stats.f_bavail as f64;
        Ok(((total - available) / total).clamp(0.0, 1.0))
    }
}

/// Outcome of one eviction check
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvictionReport {
    pub usage_before: f64,
    pub usage_after: f64,
    pub files_deleted: usize,
    pub bytes_freed: u64,
    pub errors: usize,
}

#[derive(Debug)]
struct Artifact {
    path: PathBuf,
    created: SystemTime,
    size: u64,
}

/// Deletes the oldest committed detection images while the output volume is
/// above its usage threshold
pub struct EvictionPolicy {
    output_dir: PathBuf,
    threshold: f64,
    probe: Arc<dyn DiskUsageProbe>,
}

impl EvictionPolicy {
    pub fn new(output_dir: impl Into<PathBuf>, threshold: f64, probe: Arc<dyn DiskUsageProbe>) -> Self {
        Self {
            output_dir: output_dir.into(),
            threshold,
            probe,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.output_dir, config.usage_threshold, Arc::new(StatvfsProbe))
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Blocking; run it off the async workers
    pub fn check_and_evict(&self) -> Result<EvictionReport> {
        if !self.output_dir.exists() {
            return Ok(EvictionReport::default());
        }

        let usage_before = self.probe.usage(&self.output_dir)?;
        let mut report = EvictionReport {
            usage_before,
            usage_after: usage_before,
            ..EvictionReport::default()
        };

        if usage_before <= self.threshold {
            debug!(
                "Disk usage {:.1}% under threshold {:.1}%",
                usage_before * 100.0,
                self.threshold * 100.0
            );
            return Ok(report);
        }

        info!(
            "Disk usage {:.1}% exceeds {:.1}%, evicting oldest images",
            usage_before * 100.0,
            self.threshold * 100.0
        );

        for artifact in self.collect_artifacts()? {
            match std::fs::remove_file(&artifact.path) {
                Ok(()) => {
                    report.files_deleted += 1;
                    report.bytes_freed += artifact.size;
                    debug!("Evicted {}", artifact.path.display());
                }
                Err(e) => {
                    report.errors += 1;
                    warn!("Failed to evict {}: {}", artifact.path.display(), e);
                    continue;
                }
            }

            match self.probe.usage(&self.output_dir) {
                Ok(usage) => report.usage_after = usage,
                Err(e) => {
                    // Keep what was already deleted in the report
                    report.errors += 1;
                    warn!("Disk usage check failed after eviction: {}", e);
                    break;
                }
            }
            if report.usage_after <= self.threshold {
                break;
            }
        }

        if report.usage_after > self.threshold {
            warn!(
                "Disk usage still {:.1}% after evicting {} files",
                report.usage_after * 100.0,
                report.files_deleted
            );
        } else {
            info!(
                "Evicted {} files ({} bytes), usage now {:.1}%",
                report.files_deleted,
                report.bytes_freed,
                report.usage_after * 100.0
            );
        }

        Ok(report)
    }

    /// Committed images, oldest first
    fn collect_artifacts(&self) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::new();

        for entry in std::fs::read_dir(&self.output_dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {}", self.output_dir.display(), e);
                    continue;
                }
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXTENSION) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }

            let created = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_artifact_timestamp)
                .or_else(|| metadata.created().ok())
                .or_else(|| metadata.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);

            artifacts.push(Artifact {
                path,
                created,
                size: metadata.len(),
            });
        }

        artifacts.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.path.cmp(&b.path)));
        Ok(artifacts)
    }

    /// Check on a fixed interval until cancelled
    pub async fn run(
        self: Arc<Self>,
        interval: Duration,
        telemetry: Arc<TelemetryAggregator>,
        cancel: CancellationToken,
    ) {
        info!(
            "Eviction started for {} ({:?} interval, threshold {:.0}%)",
            self.output_dir.display(),
            interval,
            self.threshold * 100.0
        );
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let policy = Arc::clone(&self);
                    match tokio::task::spawn_blocking(move || policy.check_and_evict()).await {
                        Ok(Ok(report)) => telemetry.record_eviction(&report),
                        Ok(Err(e)) => {
                            error!("Eviction check failed: {}", e);
                            telemetry.record_eviction_error();
                        }
                        Err(e) => {
                            error!("Eviction task panicked: {}", e);
                            telemetry.record_eviction_error();
                        }
                    }
                }
            }
        }

        info!("Eviction stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::artifact_stem;
    use std::time::UNIX_EPOCH;

    /// Usage = bytes in the directory over a fixed capacity
    struct DirectorySizeProbe {
        capacity: u64,
    }

    impl DiskUsageProbe for DirectorySizeProbe {
        fn usage(&self, path: &Path) -> Result<f64> {
            let mut used = 0;
            for entry in std::fs::read_dir(path)? {
                used += entry?.metadata()?.len();
            }
            Ok(used as f64 / self.capacity as f64)
        }
    }

    fn write_artifact(dir: &Path, secs: u64, size: usize) -> PathBuf {
        let stem = artifact_stem(UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs));
        let path = dir.join(format!("{}.jpg", stem));
        std::fs::write(&path, vec![0u8; size]).unwrap();
        path
    }

    fn policy(dir: &Path, threshold: f64, capacity: u64) -> EvictionPolicy {
        EvictionPolicy::new(dir, threshold, Arc::new(DirectorySizeProbe { capacity }))
    }

    #[test]
    fn test_deletes_oldest_until_under_threshold() {
        let dir = tempfile::tempdir().unwrap();
        // Written newest first so mtime ordering disagrees with name ordering
        let newest = write_artifact(dir.path(), 30, 100);
        let middle = write_artifact(dir.path(), 20, 100);
        let oldest = write_artifact(dir.path(), 10, 100);

        // 300 of 350 bytes = 86%
        let report = policy(dir.path(), 0.6, 350).check_and_evict().unwrap();

        assert_eq!(report.files_deleted, 1);
        assert_eq!(report.bytes_freed, 100);
        assert_eq!(report.errors, 0);
        assert!(report.usage_before > 0.8);
        assert!(report.usage_after <= 0.6);
        assert!(!oldest.exists());
        assert!(middle.exists());
        assert!(newest.exists());
    }

    /// Reports a full disk once, then fails
    struct FailingAfterFirstProbe {
        calls: std::sync::atomic::AtomicU32,
    }

    impl DiskUsageProbe for FailingAfterFirstProbe {
        fn usage(&self, _path: &Path) -> Result<f64> {
            if self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Ok(0.99)
            } else {
                Err(CatwatchError::system("statvfs failed"))
            }
        }
    }

    #[test]
    fn test_usage_error_mid_eviction_keeps_report() {
        let dir = tempfile::tempdir().unwrap();
        let oldest = write_artifact(dir.path(), 10, 100);
        let middle = write_artifact(dir.path(), 20, 100);
        let newest = write_artifact(dir.path(), 30, 100);
        let probe = Arc::new(FailingAfterFirstProbe {
            calls: std::sync::atomic::AtomicU32::new(0),
        });

        let report = EvictionPolicy::new(dir.path(), 0.5, probe)
            .check_and_evict()
            .unwrap();

        assert_eq!(report.files_deleted, 1);
        assert_eq!(report.bytes_freed, 100);
        assert_eq!(report.errors, 1);
        assert_eq!(report.usage_before, 0.99);
        assert!(!oldest.exists());
        assert!(middle.exists());
        assert!(newest.exists());
    }

    #[test]
    fn test_under_threshold_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_artifact(dir.path(), 1, 100);

        let report = policy(dir.path(), 0.8, 1000).check_and_evict().unwrap();

        assert_eq!(report.files_deleted, 0);
        assert!(file.exists());
    }

    #[test]
    fn test_ignores_partial_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let committed = write_artifact(dir.path(), 5, 100);
        let partial = dir.path().join("frame_20231114_221320_000.jpg.partial");
        std::fs::write(&partial, vec![0u8; 400]).unwrap();
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, vec![0u8; 400]).unwrap();

        let report = policy(dir.path(), 0.1, 1000).check_and_evict().unwrap();

        assert_eq!(report.files_deleted, 1);
        assert!(!committed.exists());
        assert!(partial.exists());
        assert!(notes.exists());
        // Nothing deletable left, usage stays high
        assert!(report.usage_after > 0.1);
    }

    #[test]
    fn test_falls_back_to_file_time_for_unparsed_names() {
        let dir = tempfile::tempdir().unwrap();
        let renamed = dir.path().join("manual_capture.jpg");
        std::fs::write(&renamed, vec![0u8; 100]).unwrap();

        let report = policy(dir.path(), 0.01, 1000).check_and_evict().unwrap();
        assert_eq!(report.files_deleted, 1);
        assert!(!renamed.exists());
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not-created-yet");
        let report = policy(&missing, 0.5, 10).check_and_evict().unwrap();
        assert_eq!(report, EvictionReport::default());
    }

    #[test]
    fn test_statvfs_probe_reports_fraction() {
        let dir = tempfile::tempdir().unwrap();
        let usage = StatvfsProbe.usage(dir.path()).unwrap();
        assert!((0.0..=1.0).contains(&usage));
    }

    #[tokio::test]
    async fn test_run_records_reports_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), 1, 100);
        let telemetry = Arc::new(TelemetryAggregator::default());
        let policy = Arc::new(policy(dir.path(), 0.01, 1000));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(policy.run(
            Duration::from_millis(10),
            Arc::clone(&telemetry),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap();

        let eviction = telemetry.snapshot().eviction;
        assert!(eviction.runs >= 1);
        assert_eq!(eviction.files_deleted, 1);
    }
}
