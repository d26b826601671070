//! Export scheduling
//!
//! The export cycle is the system's only steady-state control loop:
//! drain the aggregator, checkpoint the batch as pending, attempt delivery,
//! then either clear the checkpoint (success) or restore the batch into the
//! aggregator (failure) so the next cycle retries it alongside newer data.
//!
//! The aggregator keeps accepting records while a cycle's batch is in
//! flight; that is why failure restores (prepends) rather than overwrites.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::export::MetricExporter;
use crate::metrics::MetricAggregator;
use crate::store::StateStore;

/// Fixed export period.
pub const EXPORT_PERIOD: Duration = Duration::from_secs(30);

/// What a single export cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing queued; any stale pending checkpoint was cleared
    Idle,
    /// Batch of this many records delivered and checkpoint cleared
    Exported(usize),
    /// Delivery failed; batch of this many records restored for next cycle
    Deferred(usize),
}

/// Run one flush → persist → export → clear-or-restore cycle.
///
/// Locks are never held across the awaited delivery; records appended while
/// the batch is in flight stay in the aggregator and, on failure, the batch
/// is restored ahead of them. Storage failures degrade the crash-safety
/// checkpoint but never abort the cycle.
pub async fn run_export_cycle(
    aggregator: &Mutex<MetricAggregator>,
    store: &Mutex<StateStore>,
    exporter: &MetricExporter,
) -> CycleOutcome {
    let batch = aggregator.lock().unwrap().flush();
    if batch.is_empty() {
        if let Err(e) = store.lock().unwrap().clear_pending_metrics() {
            tracing::warn!(error = %e, "failed to clear stale pending metrics");
        }
        return CycleOutcome::Idle;
    }

    if let Err(e) = store.lock().unwrap().save_pending_metrics(&batch) {
        tracing::warn!(error = %e, "failed to checkpoint pending metrics before export");
    }

    let count = batch.len();
    if exporter.export(&batch).await {
        if let Err(e) = store.lock().unwrap().clear_pending_metrics() {
            tracing::warn!(error = %e, "export succeeded but clearing pending metrics failed");
        }
        tracing::debug!(count, "export cycle delivered batch");
        CycleOutcome::Exported(count)
    } else {
        aggregator.lock().unwrap().restore(batch);
        tracing::warn!(count, "export cycle failed, batch restored for retry");
        CycleOutcome::Deferred(count)
    }
}

/// Periodic timer driving export cycles.
///
/// `start` when already running and `stop` when stopped are both no-ops.
/// Stopping only halts future firings: the shutdown signal is observed at
/// the tick boundary, so a cycle already in flight always runs to
/// completion and its batch is either cleared or restored, never dropped.
pub struct ExportScheduler {
    aggregator: Arc<Mutex<MetricAggregator>>,
    store: Arc<Mutex<StateStore>>,
    exporter: Arc<Mutex<MetricExporter>>,
    period: Duration,
    task: Option<(JoinHandle<()>, watch::Sender<bool>)>,
}

impl ExportScheduler {
    pub fn new(
        aggregator: Arc<Mutex<MetricAggregator>>,
        store: Arc<Mutex<StateStore>>,
        exporter: Arc<Mutex<MetricExporter>>,
    ) -> Self {
        ExportScheduler {
            aggregator,
            store,
            exporter,
            period: EXPORT_PERIOD,
            task: None,
        }
    }

    /// Override the period (used by tests and the CLI).
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Begin periodic export cycles. No-op if already running.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let aggregator = Arc::clone(&self.aggregator);
        let store = Arc::clone(&self.store);
        let exporter = Arc::clone(&self.exporter);
        let period = self.period;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; the cycle proper starts one
            // period in.
            ticker.tick().await;
            loop {
                // Shutdown is only observed here, never inside a cycle: a
                // flushed batch must reach its clear-or-restore step.
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    _ = ticker.tick() => {}
                }
                if !store.lock().unwrap().config().enabled {
                    continue;
                }
                // Snapshot the exporter so the endpoint lock is not held
                // across the network call.
                let exporter = exporter.lock().unwrap().clone();
                run_export_cycle(&aggregator, &store, &exporter).await;
            }
        });
        self.task = Some((task, shutdown_tx));
    }

    /// Stop future firings. No-op if not running.
    ///
    /// A cycle already in flight keeps running to completion in the
    /// background; only the timer is halted.
    pub fn stop(&mut self) {
        if let Some((_task, shutdown)) = self.task.take() {
            let _ = shutdown.send(true);
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for ExportScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::METRIC_SCROLL_COUNT;
    use crate::route::{Route, RouteType};

    fn shared_parts(dir: &tempfile::TempDir) -> (Arc<Mutex<MetricAggregator>>, Arc<Mutex<StateStore>>) {
        let store = StateStore::load(dir.path().join("state.json"));
        let aggregator = MetricAggregator::new("machine-1");
        (Arc::new(Mutex::new(aggregator)), Arc::new(Mutex::new(store)))
    }

    #[tokio::test]
    async fn test_empty_cycle_is_idle_and_clears_stale_pending() {
        let dir = tempfile::tempdir().unwrap();
        let (aggregator, store) = shared_parts(&dir);
        // Simulate a stale checkpoint from an interrupted run.
        {
            let mut agg = MetricAggregator::new("m");
            agg.record_scroll(10);
            let stale = agg.flush();
            store.lock().unwrap().save_pending_metrics(&stale).unwrap();
        }

        let exporter = MetricExporter::new("http://127.0.0.1:1").unwrap();
        let outcome = run_export_cycle(&aggregator, &store, &exporter).await;

        assert_eq!(outcome, CycleOutcome::Idle);
        assert!(store.lock().unwrap().pending_metrics().is_empty());
    }

    #[tokio::test]
    async fn test_failed_cycle_restores_batch_ahead_of_newer_records() {
        let dir = tempfile::tempdir().unwrap();
        let (aggregator, store) = shared_parts(&dir);

        aggregator
            .lock()
            .unwrap()
            .record_intervention(&Route::new(RouteType::Workspace));

        // Nothing listens on port 1; every attempt is a transport error.
        let exporter = MetricExporter::new("http://127.0.0.1:1").unwrap();
        let outcome = run_export_cycle(&aggregator, &store, &exporter).await;
        assert_eq!(outcome, CycleOutcome::Deferred(1));

        // The batch was checkpointed before the attempt and stays pending.
        assert_eq!(store.lock().unwrap().pending_metrics().len(), 1);

        // Restored records sit ahead of anything recorded since.
        aggregator.lock().unwrap().record_scroll(5);
        let queued = aggregator.lock().unwrap().peek();
        assert_eq!(queued[0].name, crate::metrics::METRIC_INTERVENTION);
        assert_eq!(queued[1].name, METRIC_SCROLL_COUNT);
    }

    #[tokio::test]
    async fn test_stop_during_inflight_cycle_still_restores_batch() {
        let dir = tempfile::tempdir().unwrap();
        let (aggregator, store) = shared_parts(&dir);
        {
            let mut agg = aggregator.lock().unwrap();
            agg.record_intervention(&Route::new(RouteType::Workspace));
            agg.record_intervention(&Route::new(RouteType::TaskBoard));
        }

        // Nothing listens on port 1, so the first cycle fails fast on each
        // attempt and spends roughly three seconds in retry backoff.
        let exporter = Arc::new(Mutex::new(
            MetricExporter::new("http://127.0.0.1:1").unwrap(),
        ));
        let mut scheduler =
            ExportScheduler::new(Arc::clone(&aggregator), Arc::clone(&store), exporter)
                .with_period(Duration::from_millis(50));

        scheduler.start();
        // Let the cycle flush the batch and enter its backoff sleeps.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(aggregator.lock().unwrap().is_empty());

        // Stopping mid-cycle halts the timer but must not discard the batch
        // already in flight.
        scheduler.stop();
        assert!(!scheduler.is_running());
        tokio::time::sleep(Duration::from_secs(4)).await;

        assert_eq!(aggregator.lock().unwrap().len(), 2);
        assert_eq!(store.lock().unwrap().pending_metrics().len(), 2);
    }
}
