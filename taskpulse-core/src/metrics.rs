//! Metrics aggregation
//!
//! Turns domain events into immutable [`MetricRecord`]s and buffers them in a
//! bounded, drainable, restorable queue. Records are attributed at creation
//! time from the route active at that instant; once created they are never
//! altered, only moved between the queue, the persistence checkpoint, and the
//! exporter.
//!
//! The queue is bounded at [`MAX_QUEUE_SIZE`] with FIFO eviction: under
//! sustained overflow the oldest records are silently dropped. That loss is a
//! deliberate policy, not an error condition.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::route::{Route, RouteView};

/// Maximum number of records held in the queue.
pub const MAX_QUEUE_SIZE: usize = 1000;

// Metric names emitted by the aggregator.
pub const METRIC_ACTIVE_TIME: &str = "user.active.duration_ms";
pub const METRIC_INTERVENTION: &str = "user.intervention.count";
pub const METRIC_SCROLL_COUNT: &str = "user.scroll.count";
pub const METRIC_SCROLL_DISTANCE: &str = "user.scroll.distance";
pub const METRIC_VIEW_TIME: &str = "user.view.duration_ms";
pub const METRIC_TYPING_CHARS: &str = "user.typing.characters";
pub const METRIC_MESSAGE_COUNT: &str = "user.message.count";
pub const METRIC_MESSAGE_LENGTH: &str = "user.message.length";

/// Whether a record accumulates (counter) or samples (gauge).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
}

/// Attribute value: string or integer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Str(String),
    Int(i64),
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

/// One attributed measurement, immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Dotted metric identifier
    pub name: String,
    /// Counter or gauge
    pub kind: MetricKind,
    /// Measured value
    pub value: i64,
    /// Capture time
    pub timestamp: DateTime<Utc>,
    /// Attribution built from the route active at record creation
    pub attributes: BTreeMap<String, AttrValue>,
}

/// Bounded, ordered queue of metric records with FIFO eviction.
#[derive(Debug, Default)]
pub struct MetricQueue {
    records: VecDeque<MetricRecord>,
}

impl MetricQueue {
    pub fn new() -> Self {
        MetricQueue {
            records: VecDeque::new(),
        }
    }

    /// Append a record, evicting from the front once over capacity.
    pub fn push(&mut self, record: MetricRecord) {
        self.records.push_back(record);
        self.enforce_bound();
    }

    /// Atomically return and clear all queued records, order preserved.
    pub fn flush(&mut self) -> Vec<MetricRecord> {
        self.records.drain(..).collect()
    }

    /// Non-destructive snapshot of the queue contents.
    pub fn peek(&self) -> Vec<MetricRecord> {
        self.records.iter().cloned().collect()
    }

    /// Reinsert previously flushed but unexported records ahead of anything
    /// recorded since the flush, then truncate from the front to capacity.
    pub fn restore(&mut self, records: Vec<MetricRecord>) {
        for record in records.into_iter().rev() {
            self.records.push_front(record);
        }
        self.enforce_bound();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn enforce_bound(&mut self) {
        let over = self.records.len().saturating_sub(MAX_QUEUE_SIZE);
        if over > 0 {
            tracing::trace!(dropped = over, "metric queue over capacity, dropping oldest");
            self.records.drain(..over);
        }
    }
}

/// Optional lookup used to enrich route attribution with a project name.
pub type ProjectNameLookup = Box<dyn Fn(&str) -> Option<String> + Send>;

/// Turns domain events into attributed records and owns the bounded queue.
pub struct MetricAggregator {
    machine_id: String,
    queue: MetricQueue,
    project_lookup: Option<ProjectNameLookup>,
}

impl MetricAggregator {
    pub fn new(machine_id: impl Into<String>) -> Self {
        MetricAggregator {
            machine_id: machine_id.into(),
            queue: MetricQueue::new(),
            project_lookup: None,
        }
    }

    /// Install a project-name lookup; replaces any previous one.
    pub fn set_project_lookup(&mut self, lookup: ProjectNameLookup) {
        self.project_lookup = Some(lookup);
    }

    /// Change the machine identity; takes effect on the next recorded metric.
    pub fn set_machine_id(&mut self, machine_id: impl Into<String>) {
        self.machine_id = machine_id.into();
    }

    /// Record an active-session duration for the given route.
    pub fn record_active_time(&mut self, duration_ms: i64, route: &Route) {
        let attrs = self.route_attributes(route);
        self.push(METRIC_ACTIVE_TIME, MetricKind::Gauge, duration_ms, attrs);
    }

    /// Record one human intervention for the given route.
    pub fn record_intervention(&mut self, route: &Route) {
        let attrs = self.route_attributes(route);
        self.push(METRIC_INTERVENTION, MetricKind::Counter, 1, attrs);
    }

    /// Record a scroll: one count and the scrolled distance.
    ///
    /// Scroll metrics carry machine identity only, no route attribution.
    pub fn record_scroll(&mut self, distance: i64) {
        let attrs = self.base_attributes();
        self.push(METRIC_SCROLL_COUNT, MetricKind::Counter, 1, attrs.clone());
        self.push(METRIC_SCROLL_DISTANCE, MetricKind::Counter, distance, attrs);
    }

    /// Record a view-session duration (diffs/preview) for the given route.
    pub fn record_view_duration(&mut self, view: RouteView, duration_ms: i64, route: &Route) {
        let mut attrs = self.route_attributes(route);
        // The session's view wins over whatever the route currently carries.
        attrs.insert("view".to_string(), view.as_str().into());
        self.push(METRIC_VIEW_TIME, MetricKind::Gauge, duration_ms, attrs);
    }

    /// Record a batch of typed characters for the given route.
    pub fn record_typing(&mut self, char_count: i64, route: &Route) {
        let attrs = self.route_attributes(route);
        self.push(METRIC_TYPING_CHARS, MetricKind::Counter, char_count, attrs);
    }

    /// Record a sent message: one count and the message length.
    pub fn record_message_sent(&mut self, length: i64, route: &Route) {
        let attrs = self.route_attributes(route);
        self.push(METRIC_MESSAGE_COUNT, MetricKind::Counter, 1, attrs.clone());
        self.push(METRIC_MESSAGE_LENGTH, MetricKind::Gauge, length, attrs);
    }

    /// Atomically return and clear all queued records.
    pub fn flush(&mut self) -> Vec<MetricRecord> {
        self.queue.flush()
    }

    /// Non-destructive snapshot of queued records.
    pub fn peek(&self) -> Vec<MetricRecord> {
        self.queue.peek()
    }

    /// Reinsert a failed export batch ahead of anything recorded since.
    pub fn restore(&mut self, records: Vec<MetricRecord>) {
        self.queue.restore(records);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn push(
        &mut self,
        name: &str,
        kind: MetricKind,
        value: i64,
        attributes: BTreeMap<String, AttrValue>,
    ) {
        self.queue.push(MetricRecord {
            name: name.to_string(),
            kind,
            value,
            timestamp: Utc::now(),
            attributes,
        });
    }

    /// Machine identity only.
    fn base_attributes(&self) -> BTreeMap<String, AttrValue> {
        let mut attrs = BTreeMap::new();
        attrs.insert("machine.id".to_string(), self.machine_id.clone().into());
        attrs
    }

    /// Machine identity plus route-derived fields.
    ///
    /// Identifier keys are included only when present on the route; absent
    /// fields are omitted entirely rather than emitted as null/empty.
    fn route_attributes(&self, route: &Route) -> BTreeMap<String, AttrValue> {
        let mut attrs = self.base_attributes();
        attrs.insert("route.type".to_string(), route.route_type.as_str().into());
        if let Some(id) = &route.workspace_id {
            attrs.insert("workspace_id".to_string(), id.clone().into());
        }
        if let Some(id) = &route.project_id {
            attrs.insert("project_id".to_string(), id.clone().into());
            if let Some(lookup) = &self.project_lookup {
                if let Some(name) = lookup(id) {
                    attrs.insert("project_name".to_string(), name.into());
                }
            }
        }
        if let Some(id) = &route.task_id {
            attrs.insert("task_id".to_string(), id.clone().into());
        }
        if let Some(view) = route.view {
            attrs.insert("view".to_string(), view.as_str().into());
        }
        attrs
    }
}

impl std::fmt::Debug for MetricAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricAggregator")
            .field("machine_id", &self.machine_id)
            .field("queued", &self.queue.len())
            .field("has_project_lookup", &self.project_lookup.is_some())
            .finish()
    }
}
