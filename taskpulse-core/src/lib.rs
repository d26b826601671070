//! # taskpulse-core
//!
//! Core library for taskpulse - user activity telemetry for a task-tracking
//! web application.
//!
//! This library provides:
//! - The activity state machine (active / idle / unfocused)
//! - Metrics aggregation into a bounded, restorable queue
//! - Crash-safe persistence for configuration and unexported metrics
//! - An OTLP metrics exporter with retry and backoff
//! - The periodic export scheduler and the tracker glue wiring it all
//!
//! ## Architecture
//!
//! Raw page events flow in as [`events::InboundMessage`]s; the
//! [`tracker::ActivityTracker`] turns them into state-machine transitions
//! and metric records. A transition observer derives duration metrics
//! (active time, view time) that the machine itself knows nothing about. On
//! a fixed period the scheduler drains the queue, checkpoints the batch to
//! disk, attempts delivery, and either clears the checkpoint or restores the
//! batch for the next cycle — so no metric is silently lost or
//! double-counted across process restarts.
//!
//! ## Example
//!
//! ```rust,no_run
//! use taskpulse_core::{paths, ActivityTracker, StateStore};
//!
//! let store = StateStore::load(paths::state_file_path());
//! let mut tracker = ActivityTracker::new(store).expect("failed to build tracker");
//! tracker.start_idle_check();
//! tracker.start_export_loop();
//! ```

// Re-export commonly used items at the crate root
pub use error::{Error, Result};
pub use events::InboundMessage;
pub use machine::{ActivityEvent, ActivityMachine, ActivityState, StateContext};
pub use metrics::{MetricAggregator, MetricKind, MetricQueue, MetricRecord};
pub use route::{Route, RouteType, RouteView};
pub use scheduler::{CycleOutcome, ExportScheduler};
pub use store::{ConfigPatch, StateStore, TrackerConfig};
pub use tracker::ActivityTracker;

// Public modules
pub mod error;
pub mod events;
pub mod export;
pub mod logging;
pub mod machine;
pub mod metrics;
pub mod paths;
pub mod route;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod tracker;
