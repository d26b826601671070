//! Tracker orchestration
//!
//! [`ActivityTracker`] owns the whole pipeline: the state machine with its
//! registered transition observer, the session memory, the aggregator, the
//! state store, the exporter, and the two periodic tasks (idle check and
//! export loop). It is also the integration point that interprets inbound
//! page messages into the correct sequence of machine transitions and
//! aggregator writes.
//!
//! Message-handling order contract: when a message carries both a route and
//! an engagement signal, the route update is applied *before* the
//! state-changing event. The transition observer reads the machine's current
//! route at the moment a state change fires, so reversing that order would
//! attribute the next closing duration to a stale or absent route. The
//! machine itself stays agnostic; the ordering lives here and only here.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::events::InboundMessage;
use crate::export::MetricExporter;
use crate::machine::{ActivityEvent, ActivityMachine};
use crate::metrics::{MetricAggregator, ProjectNameLookup};
use crate::route::Route;
use crate::scheduler::{run_export_cycle, CycleOutcome, ExportScheduler};
use crate::session::SessionTracker;
use crate::store::{ConfigPatch, StateStore, TrackerConfig};

/// Fixed cadence of the idle re-evaluation timer.
pub const IDLE_CHECK_PERIOD: Duration = Duration::from_secs(5);

/// Owns and wires every component of the tracking pipeline.
pub struct ActivityTracker {
    machine: Arc<Mutex<ActivityMachine>>,
    aggregator: Arc<Mutex<MetricAggregator>>,
    sessions: Arc<Mutex<SessionTracker>>,
    store: Arc<Mutex<StateStore>>,
    exporter: Arc<Mutex<MetricExporter>>,
    scheduler: ExportScheduler,
    idle_task: Option<JoinHandle<()>>,
}

impl ActivityTracker {
    /// Build a tracker around a loaded state store.
    ///
    /// Metrics left pending by an interrupted previous run are restored into
    /// the aggregator so the next export cycle retries them; the persisted
    /// checkpoint is only cleared after a confirmed export.
    pub fn new(store: StateStore) -> Result<Self> {
        let config = store.config();

        let mut aggregator = MetricAggregator::new(config.machine_id.clone());
        let pending = store.pending_metrics();
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "restoring pending metrics from previous run");
            aggregator.restore(pending);
        }

        let exporter = MetricExporter::new(&config.endpoint)?;
        let mut machine = ActivityMachine::new(config.idle_timeout_ms);

        let aggregator = Arc::new(Mutex::new(aggregator));
        let sessions = Arc::new(Mutex::new(SessionTracker::new()));

        // The single transition subscriber: derives duration metrics the
        // machine itself knows nothing about.
        {
            let aggregator = Arc::clone(&aggregator);
            let sessions = Arc::clone(&sessions);
            machine.set_observer(Box::new(move |prev, next, ctx, now_ms| {
                let mut sessions = sessions.lock().unwrap();
                let mut aggregator = aggregator.lock().unwrap();
                sessions.on_transition(prev, next, ctx, now_ms, &mut aggregator);
            }));
        }

        let store = Arc::new(Mutex::new(store));
        let exporter = Arc::new(Mutex::new(exporter));
        let scheduler = ExportScheduler::new(
            Arc::clone(&aggregator),
            Arc::clone(&store),
            Arc::clone(&exporter),
        );

        Ok(ActivityTracker {
            machine: Arc::new(Mutex::new(machine)),
            aggregator,
            sessions,
            store,
            exporter,
            scheduler,
            idle_task: None,
        })
    }

    /// Install a project-name lookup used to enrich route attribution.
    pub fn set_project_lookup(&self, lookup: ProjectNameLookup) {
        self.aggregator.lock().unwrap().set_project_lookup(lookup);
    }

    /// Interpret one inbound page message.
    ///
    /// Ignored entirely while tracking is disabled. Route updates precede
    /// state-changing events; every engagement message fires `Activity`.
    pub fn handle_message(&self, message: InboundMessage) {
        if !self.store.lock().unwrap().config().enabled {
            tracing::trace!("tracking disabled, dropping message");
            return;
        }

        let now_ms = message.timestamp();
        match message {
            InboundMessage::Focus { route, .. } => {
                self.navigate_if_present(route, now_ms);
                self.machine.lock().unwrap().transition(ActivityEvent::Focus, now_ms);
            }
            InboundMessage::Blur { route, .. } => {
                self.navigate_if_present(route, now_ms);
                self.machine.lock().unwrap().transition(ActivityEvent::Blur, now_ms);
            }
            InboundMessage::Activity { route, .. } => {
                self.navigate_if_present(route, now_ms);
                self.machine.lock().unwrap().transition(ActivityEvent::Activity, now_ms);
            }
            InboundMessage::Scroll {
                route,
                scroll_distance,
                ..
            } => {
                self.navigate_if_present(route, now_ms);
                self.machine.lock().unwrap().transition(ActivityEvent::Activity, now_ms);
                self.aggregator.lock().unwrap().record_scroll(scroll_distance);
            }
            InboundMessage::Navigation { route, .. } => {
                // Close/open view sessions against the route in effect at
                // this moment, then apply the route update, then count the
                // navigation itself as engagement.
                let prev_route = self.machine.lock().unwrap().context().current_route;
                let state = self.machine.lock().unwrap().current_state();
                {
                    let mut sessions = self.sessions.lock().unwrap();
                    let mut aggregator = self.aggregator.lock().unwrap();
                    sessions.on_route_change(
                        prev_route.as_ref(),
                        &route,
                        state,
                        now_ms,
                        &mut aggregator,
                    );
                }
                let mut machine = self.machine.lock().unwrap();
                machine.transition(ActivityEvent::Navigate(route), now_ms);
                machine.transition(ActivityEvent::Activity, now_ms);
            }
            InboundMessage::HumanIntervention { route, .. } => {
                self.navigate_if_present(route, now_ms);
                self.machine.lock().unwrap().transition(ActivityEvent::Activity, now_ms);
                if let Some(route) = self.current_route() {
                    self.aggregator.lock().unwrap().record_intervention(&route);
                } else {
                    tracing::debug!("intervention with no known route, dropping record");
                }
            }
            InboundMessage::Typing {
                route, char_count, ..
            } => {
                self.navigate_if_present(route, now_ms);
                self.machine.lock().unwrap().transition(ActivityEvent::Activity, now_ms);
                if let Some(route) = self.current_route() {
                    self.aggregator.lock().unwrap().record_typing(char_count, &route);
                } else {
                    tracing::debug!("typing with no known route, dropping record");
                }
            }
            InboundMessage::MessageSent {
                route,
                message_length,
                ..
            } => {
                self.navigate_if_present(route, now_ms);
                self.machine.lock().unwrap().transition(ActivityEvent::Activity, now_ms);
                if let Some(route) = self.current_route() {
                    self.aggregator
                        .lock()
                        .unwrap()
                        .record_message_sent(message_length, &route);
                } else {
                    tracing::debug!("message sent with no known route, dropping record");
                }
            }
        }
    }

    fn navigate_if_present(&self, route: Option<Route>, now_ms: i64) {
        if let Some(route) = route {
            self.machine
                .lock()
                .unwrap()
                .transition(ActivityEvent::Navigate(route), now_ms);
        }
    }

    fn current_route(&self) -> Option<Route> {
        self.machine.lock().unwrap().context().current_route
    }

    /// Begin periodic idle re-evaluation. No-op when already running.
    pub fn start_idle_check(&mut self) {
        if self.idle_task.is_some() {
            return;
        }
        let machine = Arc::clone(&self.machine);
        self.idle_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(IDLE_CHECK_PERIOD);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let now_ms = Utc::now().timestamp_millis();
                machine
                    .lock()
                    .unwrap()
                    .transition(ActivityEvent::IdleTimeout, now_ms);
            }
        }));
    }

    /// Stop future idle checks. No-op when not running.
    pub fn stop_idle_check(&mut self) {
        if let Some(task) = self.idle_task.take() {
            task.abort();
        }
    }

    /// Begin the periodic export loop. No-op when already running.
    pub fn start_export_loop(&mut self) {
        self.scheduler.start();
    }

    /// Stop future export cycles. No-op when not running.
    pub fn stop_export_loop(&mut self) {
        self.scheduler.stop();
    }

    /// Run one export cycle immediately (used at shutdown and by the CLI).
    pub async fn export_now(&self) -> CycleOutcome {
        let exporter = self.exporter.lock().unwrap().clone();
        run_export_cycle(&self.aggregator, &self.store, &exporter).await
    }

    // Runtime configuration surface. Each setter persists the change and
    // applies it to the live component immediately.

    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.store.lock().unwrap().save_config(ConfigPatch {
            enabled: Some(enabled),
            ..Default::default()
        })
    }

    pub fn set_machine_id(&self, machine_id: impl Into<String>) -> Result<()> {
        let machine_id = machine_id.into();
        self.store.lock().unwrap().save_config(ConfigPatch {
            machine_id: Some(machine_id.clone()),
            ..Default::default()
        })?;
        self.aggregator.lock().unwrap().set_machine_id(machine_id);
        Ok(())
    }

    pub fn set_idle_timeout_ms(&self, idle_timeout_ms: i64) -> Result<()> {
        self.store.lock().unwrap().save_config(ConfigPatch {
            idle_timeout_ms: Some(idle_timeout_ms),
            ..Default::default()
        })?;
        self.machine.lock().unwrap().set_idle_timeout_ms(idle_timeout_ms);
        Ok(())
    }

    pub fn set_endpoint(&self, endpoint: impl Into<String>) -> Result<()> {
        let endpoint = endpoint.into();
        self.store.lock().unwrap().save_config(ConfigPatch {
            endpoint: Some(endpoint.clone()),
            ..Default::default()
        })?;
        self.exporter.lock().unwrap().set_endpoint(endpoint);
        Ok(())
    }

    pub fn set_sidebar_open(&self, sidebar_open: bool) -> Result<()> {
        self.store.lock().unwrap().save_config(ConfigPatch {
            sidebar_open: Some(sidebar_open),
            ..Default::default()
        })
    }

    /// Copy of the current configuration.
    pub fn config(&self) -> TrackerConfig {
        self.store.lock().unwrap().config()
    }

    /// Number of records currently queued for export.
    pub fn queued_metrics(&self) -> usize {
        self.aggregator.lock().unwrap().len()
    }

    /// Number of records checkpointed but not yet confirmed exported.
    pub fn pending_metrics(&self) -> usize {
        self.store.lock().unwrap().pending_metrics().len()
    }

    /// Non-destructive snapshot of the queue (for status displays and tests).
    pub fn peek_metrics(&self) -> Vec<crate::metrics::MetricRecord> {
        self.aggregator.lock().unwrap().peek()
    }

    /// Current engagement state.
    pub fn current_state(&self) -> crate::machine::ActivityState {
        self.machine.lock().unwrap().current_state()
    }
}

impl Drop for ActivityTracker {
    fn drop(&mut self) {
        self.stop_idle_check();
    }
}
