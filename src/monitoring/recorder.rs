//! Recorder capability: the seam between the exporter and the monitoring
//! backend. One production implementation ships metrics over HTTP on a
//! background loop; tests substitute a recording stub.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::auth::TokenSource;
use crate::error::MonitoringError;
use crate::monitoring::measures::Measurement;
use crate::monitoring::views::View;

/// Unordered mapping from tag-key name to value.
pub type TagMap = BTreeMap<String, String>;

/// An immutable scope carrying ambient tags. Deriving a new scope never
/// mutates the base, so scopes are safe to share across worker threads.
#[derive(Debug, Clone, Default)]
pub struct TagContext {
    tags: TagMap,
}

impl TagContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union of this scope's tags and `tags`, with `tags` winning on
    /// same-named keys. Pure.
    pub fn with_tags(&self, tags: &TagMap) -> Self {
        let mut merged = self.tags.clone();
        for (k, v) in tags {
            merged.insert(k.clone(), v.clone());
        }
        Self { tags: merged }
    }

    pub fn tags(&self) -> &TagMap {
        &self.tags
    }
}

/// Resource descriptor identifying the entity producing metrics.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoredResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub labels: BTreeMap<String, String>,
}

/// Options handed to [`Recorder::initialize`].
#[derive(Clone)]
pub struct RecorderOptions {
    /// Cloud project metrics are exported to.
    pub project: String,
    /// Prefix prepended to metric names on the wire.
    pub metric_prefix: String,
    /// Base URL of the monitoring backend.
    pub endpoint: String,
    /// Identity of the exporting node.
    pub resource: MonitoredResource,
    /// Pause between background uploads.
    pub reporting_interval: Duration,
    /// View declarations registered with the backend during initialize.
    pub views: Vec<View>,
    /// Token source for authenticating outbound calls, if any.
    pub token_source: Option<Arc<dyn TokenSource>>,
}

/// Capability for sending tagged measurements to a backend.
///
/// `record_with_tags` must be cheap and safe under concurrent invocation;
/// durability is only guaranteed once `close` returns.
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Authenticate and start the background upload loop.
    async fn initialize(&self, opts: RecorderOptions) -> Result<(), MonitoringError>;

    /// Stop the background loop and block until every previously recorded
    /// measurement has been flushed.
    async fn close(&self);

    /// Derive a new scope carrying the union of `base`'s tags and `tags`.
    fn tags_context(&self, base: &TagContext, tags: &TagMap) -> TagContext;

    /// Enqueue one measurement under the merged tag set.
    fn record_with_tags(&self, scope: &TagContext, tags: &TagMap, sample: Measurement);
}

/// One enqueued sample awaiting upload.
#[derive(Debug, Clone, Serialize)]
struct PendingSample {
    name: &'static str,
    unit: &'static str,
    value: f64,
    tags: TagMap,
    recorded_at: DateTime<Utc>,
}

/// Wire body for one batch upload.
#[derive(Serialize)]
struct UploadBatch<'a> {
    project: &'a str,
    metric_prefix: &'a str,
    resource: &'a MonitoredResource,
    samples: &'a [PendingSample],
}

/// Wire body for the initialize handshake: registers the view declarations
/// so the backend learns each measure's aggregation and tag keys.
#[derive(Serialize)]
struct RegisterViewsRequest<'a> {
    project: &'a str,
    metric_prefix: &'a str,
    resource: &'a MonitoredResource,
    views: &'a [View],
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Production recorder: batches samples and uploads them to the monitoring
/// backend at a fixed reporting interval.
pub struct CloudRecorder {
    queue: Arc<Mutex<Vec<PendingSample>>>,
    worker: Mutex<Option<Worker>>,
}

impl CloudRecorder {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(Vec::new())),
            worker: Mutex::new(None),
        }
    }
}

impl Default for CloudRecorder {
    fn default() -> Self {
        Self::new()
    }
}

const BACKEND_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const BACKEND_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn build_backend_http_client() -> Result<reqwest::Client, MonitoringError> {
    reqwest::Client::builder()
        .connect_timeout(BACKEND_CONNECT_TIMEOUT)
        .timeout(BACKEND_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| MonitoringError::InitializationFailed(format!("HTTP client: {}", e)))
}

struct Uploader {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    project: String,
    metric_prefix: String,
    resource: MonitoredResource,
}

impl Uploader {
    async fn push(&self, samples: Vec<PendingSample>) -> Result<(), reqwest::Error> {
        let batch = UploadBatch {
            project: &self.project,
            metric_prefix: &self.metric_prefix,
            resource: &self.resource,
            samples: &samples,
        };
        let mut request = self.client.post(&self.url).json(&batch);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request.send().await?.error_for_status()?;
        Ok(())
    }

    /// Drain the queue and upload whatever was pending. Failures are logged,
    /// never propagated: a temporarily unavailable backend is routine and
    /// logs quieter than anything else.
    async fn flush(&self, queue: &Mutex<Vec<PendingSample>>) {
        let samples = std::mem::take(&mut *queue.lock());
        if samples.is_empty() {
            return;
        }
        let count = samples.len();
        if let Err(err) = self.push(samples).await {
            if err.status() == Some(reqwest::StatusCode::SERVICE_UNAVAILABLE) {
                warn!(error = %err, "failed to export metrics: backend unavailable");
            } else {
                error!(error = %err, "failed to export metrics");
            }
        } else {
            debug!(count, "exported metric samples");
        }
    }
}

#[async_trait]
impl Recorder for CloudRecorder {
    async fn initialize(&self, opts: RecorderOptions) -> Result<(), MonitoringError> {
        let client = build_backend_http_client()?;
        let token = match &opts.token_source {
            Some(source) => Some(source.token().await?),
            None => None,
        };

        // Handshake: register the views and verify the backend is reachable
        // and the token accepted before any background work starts.
        let register_url = format!("{}/v1/projects/{}/views", opts.endpoint, opts.project);
        let body = RegisterViewsRequest {
            project: &opts.project,
            metric_prefix: &opts.metric_prefix,
            resource: &opts.resource,
            views: &opts.views,
        };
        let mut register = client.post(&register_url).json(&body);
        if let Some(token) = &token {
            register = register.bearer_auth(token);
        }
        let response = register
            .send()
            .await
            .map_err(|e| MonitoringError::InitializationFailed(e.to_string()))?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(MonitoringError::Auth(format!(
                "backend rejected credentials: {}",
                response.status()
            )));
        }
        if response.status().is_server_error() {
            return Err(MonitoringError::InitializationFailed(format!(
                "view registration failed: {}",
                response.status()
            )));
        }

        let uploader = Uploader {
            client,
            url: format!("{}/v1/projects/{}/timeSeries", opts.endpoint, opts.project),
            token,
            project: opts.project,
            metric_prefix: opts.metric_prefix,
            resource: opts.resource,
        };

        let queue = Arc::clone(&self.queue);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = opts.reporting_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        uploader.flush(&queue).await;
                    }
                    _ = shutdown_rx.changed() => {
                        uploader.flush(&queue).await;
                        return;
                    }
                }
            }
        });

        *self.worker.lock() = Some(Worker {
            shutdown: shutdown_tx,
            handle,
        });
        Ok(())
    }

    async fn close(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            // Ignore a receiver that already hung up; awaiting the handle is
            // what guarantees the final flush completed.
            let _ = worker.shutdown.send(true);
            if let Err(err) = worker.handle.await {
                error!(error = %err, "metrics export task panicked during close");
            }
        }
    }

    fn tags_context(&self, base: &TagContext, tags: &TagMap) -> TagContext {
        base.with_tags(tags)
    }

    fn record_with_tags(&self, scope: &TagContext, tags: &TagMap, sample: Measurement) {
        let merged = scope.with_tags(tags);
        self.queue.lock().push(PendingSample {
            name: sample.measure.name,
            unit: sample.measure.unit.as_str(),
            value: sample.value,
            tags: merged.tags().clone(),
            recorded_at: Utc::now(),
        });
    }
}
