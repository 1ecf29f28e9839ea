//! Scheduled case scanning.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use storage_gateway_sdk::StorageError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{CaseScanner, ScanReport};

const MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollerConfig {
    #[serde(with = "casekit_utils::humantime_serde")]
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
        }
    }
}

#[derive(Default)]
struct PollState {
    runs: AtomicU64,
    last_report: Mutex<Option<ScanReport>>,
}

impl PollState {
    fn record(&self, outcome: Result<ScanReport, StorageError>) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(report) => {
                if !report.errors.is_empty() {
                    tracing::warn!(errors = ?report.errors, "case scan finished with errors");
                }
                *self.last_report.lock() = Some(report);
            }
            Err(e) => tracing::error!(error = %e, "case scan failed"),
        }
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Runs [`CaseScanner::scan`] once on start, then once per interval, until
/// stopped or dropped.
pub struct CasePoller {
    scanner: Arc<CaseScanner>,
    interval: Duration,
    state: Arc<PollState>,
    running: Mutex<Option<Running>>,
}

impl CasePoller {
    #[must_use]
    pub fn new(scanner: Arc<CaseScanner>, config: &PollerConfig) -> Self {
        Self {
            scanner,
            interval: config.interval.max(MIN_INTERVAL),
            state: Arc::new(PollState::default()),
            running: Mutex::new(None),
        }
    }

    /// Spawn the polling task. Returns `false` if it is already running.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            Arc::clone(&self.scanner),
            self.interval,
            cancel.clone(),
            Arc::clone(&self.state),
        ));
        *running = Some(Running { cancel, task });
        tracing::info!(interval = ?self.interval, "case polling started");
        true
    }

    /// Cancel the polling task and wait for it to exit. A scan in progress
    /// is abandoned.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            tracing::warn!(error = %e, "case polling task ended abnormally");
        }
        tracing::info!("case polling stopped");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    /// Scan now, outside the schedule.
    ///
    /// # Errors
    /// If the root cannot be listed.
    pub async fn trigger(&self) -> Result<ScanReport, StorageError> {
        tracing::info!("manual case scan triggered");
        let outcome = self.scanner.scan().await;
        self.state.record(outcome.clone());
        outcome
    }

    /// Completed scans, scheduled and manual.
    #[must_use]
    pub fn runs(&self) -> u64 {
        self.state.runs.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn last_report(&self) -> Option<ScanReport> {
        self.state.last_report.lock().clone()
    }
}

impl Drop for CasePoller {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

async fn poll_loop(
    scanner: Arc<CaseScanner>,
    interval: Duration,
    cancel: CancellationToken,
    state: Arc<PollState>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            outcome = scanner.scan() => outcome,
        };
        state.record(outcome);
    }
    tracing::debug!("case polling loop exited");
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use bytes::Bytes;
    use storage_gateway_sdk::{
        Entry, FileContent, OpContext, SearchMatch, StorageApi, WriteOptions,
    };

    use crate::scanner::MemoryIngestSink;

    /// Empty root; counts listings.
    #[derive(Default)]
    struct EmptyRoot {
        lists: AtomicUsize,
    }

    #[async_trait]
    impl StorageApi for EmptyRoot {
        async fn list(&self, _: &OpContext, _: &str) -> Result<Vec<Entry>, StorageError> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
        async fn read(&self, _: &OpContext, path: &str) -> Result<FileContent, StorageError> {
            Err(StorageError::not_found(path))
        }
        async fn write(
            &self,
            _: &OpContext,
            path: &str,
            _: Bytes,
            _: WriteOptions,
        ) -> Result<Entry, StorageError> {
            Err(StorageError::internal(path))
        }
        async fn ensure_folder(&self, _: &OpContext, _: &str) -> Result<(), StorageError> {
            Ok(())
        }
        async fn exists(&self, _: &OpContext, _: &str) -> Result<bool, StorageError> {
            Ok(false)
        }
        async fn delete(&self, _: &OpContext, _: &str) -> Result<(), StorageError> {
            Ok(())
        }
        async fn search(
            &self,
            _: &OpContext,
            _: &str,
            _: &str,
        ) -> Result<Vec<SearchMatch>, StorageError> {
            Ok(Vec::new())
        }
    }

    fn poller(interval: Duration) -> (CasePoller, Arc<EmptyRoot>) {
        let storage = Arc::new(EmptyRoot::default());
        let scanner = CaseScanner::new(
            Arc::clone(&storage) as Arc<dyn StorageApi>,
            Arc::new(MemoryIngestSink::new()),
            "/CASES",
        );
        (
            CasePoller::new(Arc::new(scanner), &PollerConfig { interval }),
            storage,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn scans_immediately_then_on_interval() {
        let (poller, storage) = poller(Duration::from_secs(600));
        assert!(poller.start());
        assert!(!poller.start());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(poller.runs(), 1);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(poller.runs(), 2);
        assert_eq!(storage.lists.load(Ordering::SeqCst), 2);
        assert_eq!(poller.last_report(), Some(ScanReport::default()));

        poller.stop().await;
        assert!(!poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_poller_does_not_scan() {
        let (poller, storage) = poller(Duration::from_secs(600));
        poller.start();
        tokio::time::sleep(Duration::from_millis(1)).await;
        poller.stop().await;

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(storage.lists.load(Ordering::SeqCst), 1);

        // restartable after a stop
        assert!(poller.start());
        poller.stop().await;
    }

    #[tokio::test]
    async fn trigger_scans_on_demand() {
        let (poller, storage) = poller(Duration::from_secs(600));
        let report = poller.trigger().await.unwrap();
        assert_eq!(report.folders_seen, 0);
        assert_eq!(poller.runs(), 1);
        assert_eq!(storage.lists.load(Ordering::SeqCst), 1);
        assert!(!poller.is_running());
    }
}
