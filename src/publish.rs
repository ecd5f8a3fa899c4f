//! Publishing aggregated counts as Prometheus samples.
//!
//! Samples are grouped into batches, one per grouping key. Every batch is
//! published with replace semantics: the sink's copy of the group is cleared
//! first, then the new samples are written, so series that disappeared from
//! the latest pass do not linger with stale values. Whole groups the pass no
//! longer writes (a removed window, ages turned off) are cleared afterwards.
//!
//! Two sinks are provided: [`PushgatewaySink`] talks to a Prometheus
//! Pushgateway over HTTP, [`MemorySink`] keeps everything in memory for dry
//! runs and tests.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregation, StatusAge};
use crate::error::PublishError;

/// Content type of the Prometheus text exposition format
const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

/// Grouping-key label used for every batch
pub const WINDOW_LABEL: &str = "window";

/// Grouping-key value for the unscheduled batch
pub const UNSCHEDULED_GROUP: &str = "unscheduled";

/// Grouping-key value for the status age batch
pub const CURRENT_GROUP: &str = "current";

/// Identifies one group of series on the sink.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GroupingKey {
    pub job: String,
    /// Extra grouping labels, in URL order
    pub labels: Vec<(String, String)>,
}

impl GroupingKey {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            labels: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((name.into(), value.into()));
        self
    }

    /// Value of the grouping label `name`.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Same group with labels sorted and empty values dropped. Two keys
    /// address the same group exactly when their normalized forms are equal.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let mut labels: Vec<(String, String)> = self
            .labels
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .cloned()
            .collect();
        labels.sort();
        Self {
            job: self.job.clone(),
            labels,
        }
    }
}

impl std::fmt::Display for GroupingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job={}", self.job)?;
        for (name, value) in &self.labels {
            write!(f, "/{}={}", name, value)?;
        }
        Ok(())
    }
}

/// One timeseries sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedMetric {
    pub metric_name: String,
    pub help: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    pub key: GroupingKey,
}

/// Samples published together under one grouping key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricBatch {
    pub key: GroupingKey,
    pub metrics: Vec<PublishedMetric>,
}

/// Destination for metric batches.
pub trait MetricsSink: Send + Sync {
    /// Short description for logs.
    fn describe(&self) -> String;

    /// Whether [`MetricsSink::clear`] removes previously pushed samples.
    fn supports_clear(&self) -> bool {
        true
    }

    /// Keys of every group currently stored for `job`.
    fn groups(&self, job: &str) -> impl Future<Output = Result<Vec<GroupingKey>, PublishError>> + Send;

    /// Remove every sample stored under `key`.
    fn clear(&self, key: &GroupingKey) -> impl Future<Output = Result<(), PublishError>> + Send;

    /// Store `metrics` under `key`.
    fn push(
        &self,
        key: &GroupingKey,
        metrics: &[PublishedMetric],
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// Render samples in the Prometheus text exposition format.
///
/// Samples sharing a metric name must share label names.
pub fn encode_text(metrics: &[PublishedMetric]) -> Result<String, PublishError> {
    let registry = Registry::new();
    let mut families: BTreeMap<&str, (Vec<&str>, GaugeVec)> = BTreeMap::new();

    for metric in metrics {
        let label_names: Vec<&str> = metric.labels.keys().map(String::as_str).collect();

        if !families.contains_key(metric.metric_name.as_str()) {
            let gauge = GaugeVec::new(
                Opts::new(metric.metric_name.clone(), metric.help.clone()),
                &label_names,
            )
            .map_err(|e| PublishError::Encode(e.to_string()))?;
            registry
                .register(Box::new(gauge.clone()))
                .map_err(|e| PublishError::Encode(e.to_string()))?;
            families.insert(metric.metric_name.as_str(), (label_names.clone(), gauge));
        }

        let Some((expected, gauge)) = families.get(metric.metric_name.as_str()) else {
            continue;
        };
        if *expected != label_names {
            return Err(PublishError::Encode(format!(
                "metric {} has inconsistent label names",
                metric.metric_name
            )));
        }

        let values: Vec<&str> = metric.labels.values().map(String::as_str).collect();
        gauge
            .get_metric_with_label_values(&values)
            .map_err(|e| PublishError::Encode(e.to_string()))?
            .set(metric.value);
    }

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| PublishError::Encode(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| PublishError::Encode(e.to_string()))
}

// ============================================================================
// Pushgateway
// ============================================================================

/// Prometheus Pushgateway over HTTP(S).
///
/// A group lives at `{base}/metrics/job/{job}/{label}/{value}...`; clearing is
/// `DELETE` on that URL and writing is `PUT` with the text exposition body.
#[derive(Debug, Clone)]
pub struct PushgatewaySink {
    client: reqwest::Client,
    base: Url,
}

impl PushgatewaySink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PublishError> {
        let base = Url::parse(base_url).map_err(|_| PublishError::InvalidUrl(base_url.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(PublishError::InvalidUrl(base_url.to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::PublishFailed {
                url: base_url.to_string(),
                attempts: 0,
                reason: e.to_string(),
            })?;

        Ok(Self { client, base })
    }

    /// URL of a group. Segments are percent-encoded.
    pub fn group_url(&self, key: &GroupingKey) -> Result<Url, PublishError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| PublishError::InvalidUrl(self.base.to_string()))?;
            segments.pop_if_empty().extend(["metrics", "job", key.job.as_str()]);
            for (name, value) in &key.labels {
                segments.extend([name.as_str(), value.as_str()]);
            }
        }
        Ok(url)
    }

    /// URL of the group listing of the v1 API.
    pub fn api_url(&self) -> Result<Url, PublishError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| PublishError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(["api", "v1", "metrics"]);
        Ok(url)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &Url,
    ) -> Result<reqwest::Response, PublishError> {
        let response = request.send().await.map_err(|e| PublishError::PublishFailed {
            url: url.to_string(),
            attempts: 1,
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Rejected {
                url: url.to_string(),
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }
        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
struct GroupListing {
    #[serde(default)]
    data: Vec<GroupEntry>,
}

#[derive(Debug, Deserialize)]
struct GroupEntry {
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

/// Grouping keys of `job` in a `/api/v1/metrics` response body.
pub fn groups_from_listing(body: &str, job: &str) -> Result<Vec<GroupingKey>, serde_json::Error> {
    let listing: GroupListing = serde_json::from_str(body)?;
    let keys = listing
        .data
        .into_iter()
        .filter(|entry| entry.labels.get("job").is_some_and(|j| j == job))
        .map(|entry| {
            entry
                .labels
                .into_iter()
                .filter(|(name, value)| name != "job" && !value.is_empty())
                .fold(GroupingKey::new(job), |key, (name, value)| key.with_label(name, value))
        })
        .collect();
    Ok(keys)
}

impl MetricsSink for PushgatewaySink {
    fn describe(&self) -> String {
        self.base.to_string()
    }

    async fn groups(&self, job: &str) -> Result<Vec<GroupingKey>, PublishError> {
        let url = self.api_url()?;
        let response = self.send(self.client.get(url.clone()), &url).await?;
        let body = response.text().await.map_err(|e| PublishError::PublishFailed {
            url: url.to_string(),
            attempts: 1,
            reason: e.to_string(),
        })?;
        groups_from_listing(&body, job).map_err(|e| PublishError::UnexpectedResponse {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    async fn clear(&self, key: &GroupingKey) -> Result<(), PublishError> {
        let url = self.group_url(key)?;
        self.send(self.client.delete(url.clone()), &url).await.map(drop)
    }

    async fn push(&self, key: &GroupingKey, metrics: &[PublishedMetric]) -> Result<(), PublishError> {
        let url = self.group_url(key)?;
        let body = encode_text(metrics)?;
        let request = self
            .client
            .put(url.clone())
            .header(reqwest::header::CONTENT_TYPE, TEXT_FORMAT)
            .body(body);
        self.send(request, &url).await.map(drop)
    }
}

// ============================================================================
// In-memory sink
// ============================================================================

/// Sink that keeps groups in memory.
///
/// `push` appends to whatever the group already holds, so stale samples stay
/// visible unless the group was cleared first.
#[derive(Debug, Default)]
pub struct MemorySink {
    groups: Mutex<BTreeMap<GroupingKey, Vec<PublishedMetric>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples currently stored under `key`.
    pub fn current(&self, key: &GroupingKey) -> Vec<PublishedMetric> {
        self.lock().get(key).cloned().unwrap_or_default()
    }

    /// Every stored group, in key order.
    pub fn snapshot(&self) -> BTreeMap<GroupingKey, Vec<PublishedMetric>> {
        self.lock().clone()
    }

    /// Text exposition of every group, each preceded by a comment naming it.
    pub fn render(&self) -> Result<String, PublishError> {
        let mut out = String::new();
        for (key, metrics) in self.snapshot() {
            out.push_str(&format!("# group: {}\n", key));
            out.push_str(&encode_text(&metrics)?);
        }
        Ok(out)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<GroupingKey, Vec<PublishedMetric>>> {
        // A panic while holding the lock leaves the map intact
        self.groups.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MetricsSink for MemorySink {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn groups(&self, job: &str) -> Result<Vec<GroupingKey>, PublishError> {
        Ok(self.lock().keys().filter(|k| k.job == job).cloned().collect())
    }

    async fn clear(&self, key: &GroupingKey) -> Result<(), PublishError> {
        self.lock().remove(key);
        Ok(())
    }

    async fn push(&self, key: &GroupingKey, metrics: &[PublishedMetric]) -> Result<(), PublishError> {
        self.lock()
            .entry(key.clone())
            .or_default()
            .extend_from_slice(metrics);
        Ok(())
    }
}

// ============================================================================
// Publisher
// ============================================================================

/// Result of publishing one batch.
#[derive(Debug)]
pub struct BatchOutcome {
    pub key: GroupingKey,
    pub samples: usize,
    pub result: Result<(), PublishError>,
}

/// Results of publishing a set of batches.
#[derive(Debug, Default)]
pub struct PublishReport {
    pub outcomes: Vec<BatchOutcome>,
    /// Groups of earlier passes that this pass no longer writes
    pub removed: Vec<GroupingKey>,
}

impl PublishReport {
    pub fn published(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &BatchOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

/// Turns aggregates into batches and publishes them to a sink.
#[derive(Debug)]
pub struct Publisher<S> {
    sink: S,
    job_name: String,
    metric_prefix: String,
    retries: u32,
}

impl<S: MetricsSink> Publisher<S> {
    pub fn new(sink: S, job_name: impl Into<String>, metric_prefix: impl Into<String>) -> Self {
        Self {
            sink,
            job_name: job_name.into(),
            metric_prefix: metric_prefix.into(),
            retries: 1,
        }
    }

    /// Extra attempts per request after a failure.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn metric_name(&self, suffix: &str) -> String {
        format!("{}_{}", self.metric_prefix, suffix)
    }

    fn key(&self, window: &str) -> GroupingKey {
        GroupingKey::new(&self.job_name).with_label(WINDOW_LABEL, window)
    }

    /// One batch per window, in window order, plus the unscheduled batch.
    pub fn count_batches(&self, aggregation: &Aggregation, window_labels: &[&str]) -> Vec<MetricBatch> {
        let name = self.metric_name("job_count");
        let mut batches: Vec<MetricBatch> = window_labels
            .iter()
            .map(|window| {
                let key = self.key(window);
                let metrics = aggregation
                    .for_window(window)
                    .map(|count| {
                        let mut labels = count.labels.clone();
                        labels.insert(WINDOW_LABEL.to_string(), count.window.clone());
                        PublishedMetric {
                            metric_name: name.clone(),
                            help: "Jobs whose last start falls inside the window".to_string(),
                            labels,
                            value: count.count as f64,
                            key: key.clone(),
                        }
                    })
                    .collect();
                MetricBatch { key, metrics }
            })
            .collect();

        let key = self.key(UNSCHEDULED_GROUP);
        let name = self.metric_name("unscheduled_jobs");
        let metrics = aggregation
            .unscheduled
            .iter()
            .map(|count| PublishedMetric {
                metric_name: name.clone(),
                help: "Jobs without a readable last start time".to_string(),
                labels: count.labels.clone(),
                value: count.count as f64,
                key: key.clone(),
            })
            .collect();
        batches.push(MetricBatch { key, metrics });

        batches
    }

    /// Batch with one age sample per job that has started.
    pub fn age_batch(&self, ages: &[StatusAge]) -> MetricBatch {
        let key = self.key(CURRENT_GROUP);
        let name = self.metric_name("job_status_age_seconds");
        let metrics = ages
            .iter()
            .filter_map(|age| {
                let secs = age.age_secs?;
                Some(PublishedMetric {
                    metric_name: name.clone(),
                    help: "Seconds since the job last started, by current status".to_string(),
                    labels: BTreeMap::from([
                        ("job_name".to_string(), age.job_name.clone()),
                        ("status".to_string(), age.status.as_str().to_string()),
                    ]),
                    value: secs as f64,
                    key: key.clone(),
                })
            })
            .collect();
        MetricBatch { key, metrics }
    }

    /// Publish a single batch: clear the group, then write the samples.
    pub async fn publish_batch(&self, batch: &MetricBatch) -> Result<(), PublishError> {
        if self.sink.supports_clear() {
            self.with_retry("clear", &batch.key, || self.sink.clear(&batch.key))
                .await?;
        } else {
            tracing::debug!(key = %batch.key, "Sink cannot clear, pushing without replace");
        }

        if batch.metrics.is_empty() {
            return Ok(());
        }

        self.with_retry("push", &batch.key, || {
            self.sink.push(&batch.key, &batch.metrics)
        })
        .await
    }

    /// Publish every batch, then clear the job's groups that no batch
    /// targets. A failed batch does not stop the others.
    pub async fn publish_all(&self, batches: &[MetricBatch]) -> PublishReport {
        let mut report = PublishReport::default();

        for batch in batches {
            let result = self.publish_batch(batch).await;
            match &result {
                Ok(()) => tracing::info!(
                    key = %batch.key,
                    samples = batch.metrics.len(),
                    sink = %self.sink.describe(),
                    "Published batch"
                ),
                Err(e) => tracing::warn!(key = %batch.key, error = %e, "Failed to publish batch"),
            }
            report.outcomes.push(BatchOutcome {
                key: batch.key.clone(),
                samples: batch.metrics.len(),
                result,
            });
        }

        report.removed = self.remove_stale(batches).await;
        report
    }

    /// Clear groups stored under the job name that none of `batches` targets.
    async fn remove_stale(&self, batches: &[MetricBatch]) -> Vec<GroupingKey> {
        if !self.sink.supports_clear() {
            return Vec::new();
        }

        let stored = match self.sink.groups(&self.job_name).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(job = %self.job_name, error = %e, "Could not list groups, stale groups may remain");
                return Vec::new();
            }
        };

        let targeted: BTreeSet<GroupingKey> = batches.iter().map(|b| b.key.normalized()).collect();
        let mut removed = Vec::new();
        for key in stored {
            if targeted.contains(&key.normalized()) {
                continue;
            }
            match self.with_retry("clear", &key, || self.sink.clear(&key)).await {
                Ok(()) => {
                    tracing::info!(%key, "Removed stale group");
                    removed.push(key);
                }
                Err(e) => tracing::warn!(%key, error = %e, "Failed to remove stale group"),
            }
        }
        removed
    }

    /// Run `op`, retrying transient failures immediately up to `retries` times.
    async fn with_retry<F, Fut>(&self, what: &str, key: &GroupingKey, op: F) -> Result<(), PublishError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), PublishError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt <= self.retries && is_transient(&e) => {
                    tracing::debug!(%key, what, attempt, error = %e, "Retrying");
                    attempt += 1;
                }
                Err(PublishError::PublishFailed { url, reason, .. }) => {
                    return Err(PublishError::PublishFailed {
                        url,
                        attempts: attempt,
                        reason,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_transient(err: &PublishError) -> bool {
    match err {
        PublishError::PublishFailed { .. } => true,
        PublishError::Rejected { status, .. } => *status >= 500,
        PublishError::Encode(_)
        | PublishError::InvalidUrl(_)
        | PublishError::UnexpectedResponse { .. } => false,
    }
}
