//! OTLP metrics exporter
//!
//! Serializes a batch of metric records into the OTLP/HTTP JSON shape and
//! POSTs it to the collector's metrics ingestion path. Delivery is a pure
//! attempt: up to [`MAX_ATTEMPTS`] tries with capped exponential backoff for
//! transient failures (transport errors, 5xx, 429), immediate abort on any
//! other 4xx, and no persistence side effects. Re-queuing on failure is the
//! caller's job.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::metrics::{AttrValue, MetricKind, MetricRecord};

/// Maximum delivery attempts per export call.
pub const MAX_ATTEMPTS: usize = 3;

/// Initial backoff before the second attempt; doubles per retry.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Backoff ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(4);

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptOutcome {
    /// 2xx response
    Success,
    /// Transport error, 5xx, or 429
    Retryable,
    /// Any other 4xx: retrying a rejected request wastes attempts
    Fatal,
}

/// Run delivery attempts with exponential backoff (1s, 2s, capped at 4s).
///
/// Returns true on the first success, false on a fatal outcome or once all
/// attempts are exhausted. Factored out of the HTTP path so the retry
/// discipline is testable without a server.
pub(crate) async fn deliver_with_retry<F, Fut>(max_attempts: usize, mut attempt: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AttemptOutcome>,
{
    let mut delay = INITIAL_BACKOFF;
    for n in 1..=max_attempts {
        match attempt().await {
            AttemptOutcome::Success => return true,
            AttemptOutcome::Fatal => return false,
            AttemptOutcome::Retryable => {
                if n < max_attempts {
                    tracing::debug!(attempt = n, max_attempts, ?delay, "export attempt failed, backing off");
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, MAX_BACKOFF);
                }
            }
        }
    }
    false
}

/// HTTP exporter for the metrics collector.
#[derive(Debug, Clone)]
pub struct MetricExporter {
    http_client: reqwest::Client,
    endpoint: String,
}

impl MetricExporter {
    /// Create an exporter targeting the given collector base URL.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(MetricExporter {
            http_client,
            endpoint: normalize_endpoint(endpoint.into()),
        })
    }

    /// Change the collector endpoint; takes effect on the next export.
    pub fn set_endpoint(&mut self, endpoint: impl Into<String>) {
        self.endpoint = normalize_endpoint(endpoint.into());
    }

    /// Deliver a batch, returning whether it was accepted.
    ///
    /// An empty batch is trivially successful with no network call.
    pub async fn export(&self, records: &[MetricRecord]) -> bool {
        if records.is_empty() {
            return true;
        }

        let payload = otlp_payload(records);
        let delivered = deliver_with_retry(MAX_ATTEMPTS, || self.send_once(&payload)).await;
        if delivered {
            tracing::debug!(count = records.len(), "exported metrics batch");
        } else {
            tracing::warn!(count = records.len(), endpoint = %self.endpoint, "metrics batch not delivered");
        }
        delivered
    }

    async fn send_once(&self, payload: &Value) -> AttemptOutcome {
        let url = format!("{}/v1/metrics", self.endpoint);
        match self.http_client.post(&url).json(payload).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    AttemptOutcome::Success
                } else if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                    tracing::warn!(%status, "collector rejected metrics payload");
                    AttemptOutcome::Fatal
                } else {
                    tracing::warn!(%status, "transient collector error");
                    AttemptOutcome::Retryable
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "metrics POST failed");
                AttemptOutcome::Retryable
            }
        }
    }
}

fn normalize_endpoint(endpoint: String) -> String {
    endpoint.trim_end_matches('/').to_string()
}

/// Build the OTLP/HTTP JSON payload for a batch.
///
/// Counters become cumulative monotonic `sum` entries, gauges become `gauge`
/// entries; each record carries exactly one data point.
fn otlp_payload(records: &[MetricRecord]) -> Value {
    let metrics: Vec<Value> = records.iter().map(record_to_metric).collect();
    json!({
        "resourceMetrics": [{
            "resource": { "attributes": [] },
            "scopeMetrics": [{
                "scope": { "name": "taskpulse" },
                "metrics": metrics,
            }],
        }],
    })
}

fn record_to_metric(record: &MetricRecord) -> Value {
    let time_unix_nano = record
        .timestamp
        .timestamp_nanos_opt()
        .unwrap_or_default()
        .to_string();

    let attributes: Vec<Value> = record
        .attributes
        .iter()
        .map(|(key, value)| {
            let value = match value {
                AttrValue::Str(s) => json!({ "stringValue": s }),
                // OTLP JSON encodes 64-bit ints as strings.
                AttrValue::Int(i) => json!({ "intValue": i.to_string() }),
            };
            json!({ "key": key, "value": value })
        })
        .collect();

    let data_point = json!({
        "timeUnixNano": time_unix_nano,
        "asInt": record.value.to_string(),
        "attributes": attributes,
    });

    match record.kind {
        MetricKind::Counter => json!({
            "name": record.name,
            "sum": {
                "dataPoints": [data_point],
                // AGGREGATION_TEMPORALITY_CUMULATIVE
                "aggregationTemporality": 2,
                "isMonotonic": true,
            },
        }),
        MetricKind::Gauge => json!({
            "name": record.name,
            "gauge": { "dataPoints": [data_point] },
        }),
    }
}
