//! The metrics exporter: owns the recorder, derives the monitored resource,
//! and turns action records and build summaries into tagged samples.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::auth::Credentials;
use crate::config::MonitoringConfig;
use crate::error::MonitoringError;
use crate::labels;
use crate::monitoring::failure::check_build_failure;
use crate::monitoring::measures::{
    ACTION_COUNT, ACTION_LATENCY, BUILD_CACHE_HIT_RATIO, BUILD_COUNT, BUILD_LATENCY,
};
use crate::monitoring::recorder::{
    CloudRecorder, MonitoredResource, Recorder, RecorderOptions, TagContext, TagMap,
};
use crate::monitoring::views::{
    ViewRegistry, LABELS_KEY, OS_FAMILY_KEY, REMOTE_STATUS_KEY, STATUS_KEY, VERSION_KEY,
};
use crate::types::{ActionRecord, BuildSummary};
use crate::version;

/// Default region label of the exported resource.
const DEFAULT_ZONE: &str = "us-central1-a";

static FALLBACK_SEQ: AtomicU64 = AtomicU64::new(1);

fn fallback_node_id() -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let pid = std::process::id();
    let seq = FALLBACK_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("unknown-{ts}-{pid}-{seq}")
}

fn local_hostname() -> Option<String> {
    // /etc/hostname is authoritative on Linux; HOSTNAME is usually a
    // shell-local variable and not exported to this process.
    if let Ok(name) = std::fs::read_to_string("/etc/hostname") {
        let name = name.trim();
        if !name.is_empty() {
            return Some(name.to_string());
        }
    }
    ["HOSTNAME", "COMPUTERNAME"]
        .into_iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|name| !name.is_empty())
}

/// Always-non-empty node identity, unique with high probability when the
/// host name cannot be determined.
fn node_id(hostname: Option<String>) -> String {
    match hostname {
        Some(name) if !name.is_empty() => name,
        _ => {
            warn!("failed to determine hostname, using generated node id");
            fallback_node_id()
        }
    }
}

/// Exports build and action metrics to the monitoring backend.
///
/// One exporter per proxy process: construct, export zero or more records,
/// then [`Exporter::close`] exactly once at shutdown.
pub struct Exporter {
    project: String,
    namespace: String,
    log_dir: PathBuf,
    recorder: Box<dyn Recorder>,
    registry: Arc<ViewRegistry>,
}

impl Exporter {
    /// Construct an exporter backed by the production cloud recorder.
    /// Initialization runs to completion before this returns; on failure no
    /// exporter exists and the caller decides whether to build without
    /// telemetry.
    pub async fn new(
        config: &MonitoringConfig,
        credentials: Credentials,
        registry: Arc<ViewRegistry>,
    ) -> Result<Self, MonitoringError> {
        Self::with_recorder(config, credentials, registry, Box::new(CloudRecorder::new())).await
    }

    /// Construct an exporter over a supplied recorder. This is the seam for
    /// tests and alternate backends; call sites are otherwise identical to
    /// [`Exporter::new`].
    pub async fn with_recorder(
        config: &MonitoringConfig,
        credentials: Credentials,
        registry: Arc<ViewRegistry>,
        recorder: Box<dyn Recorder>,
    ) -> Result<Self, MonitoringError> {
        let exporter = Self {
            project: config.project.clone(),
            namespace: config.namespace.clone(),
            log_dir: config.log_dir.clone(),
            recorder,
            registry,
        };
        let opts = RecorderOptions {
            project: config.project.clone(),
            metric_prefix: config.metric_prefix.clone(),
            endpoint: config.endpoint.clone(),
            resource: exporter.monitored_resource(),
            reporting_interval: config.reporting_interval(),
            views: exporter.registry.views().to_vec(),
            token_source: credentials.token_source(),
        };
        exporter.recorder.initialize(opts).await?;
        Ok(exporter)
    }

    /// Resource descriptor for the exporting node.
    pub fn monitored_resource(&self) -> MonitoredResource {
        let mut resource_labels = BTreeMap::new();
        resource_labels.insert("project_id".to_string(), self.project.clone());
        resource_labels.insert("namespace".to_string(), self.namespace.clone());
        resource_labels.insert("location".to_string(), DEFAULT_ZONE.to_string());
        resource_labels.insert("node_id".to_string(), node_id(local_hostname()));
        MonitoredResource {
            resource_type: "generic_node".to_string(),
            labels: resource_labels,
        }
    }

    fn ambient_scope(&self) -> TagContext {
        let scope = self
            .recorder
            .tags_context(&TagContext::new(), self.registry.static_tags());
        let mut ambient = TagMap::new();
        ambient.insert(
            OS_FAMILY_KEY.to_string(),
            std::env::consts::OS.to_string(),
        );
        ambient.insert(
            VERSION_KEY.to_string(),
            version::current_version().to_string(),
        );
        self.recorder.tags_context(&scope, &ambient)
    }

    /// Export metrics for one completed action: one count sample and one
    /// latency sample, tagged with the record's labels and statuses. Cheap
    /// and non-blocking; safe to call from concurrent handlers.
    pub fn export_action_metrics(&self, record: &ActionRecord) {
        let scope = self.ambient_scope();
        let latency = record.proxy_execution_millis();

        let mut tags = TagMap::new();
        tags.insert(LABELS_KEY.to_string(), labels::to_key(&record.labels));
        tags.insert(STATUS_KEY.to_string(), record.status.as_str().to_string());
        tags.insert(
            REMOTE_STATUS_KEY.to_string(),
            record.remote_status.as_str().to_string(),
        );
        self.recorder
            .record_with_tags(&scope, &tags, ACTION_COUNT.m(1.0));
        self.recorder
            .record_with_tags(&scope, &tags, ACTION_LATENCY.m(latency));
    }

    /// Export overall build metrics. An empty build is a no-op: there is no
    /// meaningful cache-hit ratio or latency for zero records.
    pub fn export_build_metrics(&self, summary: &BuildSummary) {
        if summary.num_records == 0 {
            return;
        }
        let scope = self.ambient_scope();
        let empty = TagMap::new();
        self.recorder.record_with_tags(
            &scope,
            &empty,
            BUILD_CACHE_HIT_RATIO.m(summary.cache_hit_ratio),
        );
        self.recorder
            .record_with_tags(&scope, &empty, BUILD_LATENCY.m(summary.build_latency_s));

        let status = if check_build_failure(&self.log_dir) {
            "FAILURE"
        } else {
            "SUCCESS"
        };
        let mut tags = TagMap::new();
        tags.insert(STATUS_KEY.to_string(), status.to_string());
        self.recorder
            .record_with_tags(&scope, &tags, BUILD_COUNT.m(1.0));
    }

    /// Stop the exporter and wait for recorded data to be uploaded. Samples
    /// are only durable once this returns; using the exporter afterwards is
    /// undefined.
    pub async fn close(&self) {
        self.recorder.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::measures::Measurement;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq)]
    struct MetricReport {
        name: &'static str,
        value: f64,
        tags: TagMap,
    }

    #[derive(Default)]
    struct StubState {
        reports: Vec<MetricReport>,
        initialized: bool,
        registered_views: usize,
        closed: bool,
    }

    /// Recording stub: captures every sample synchronously under its merged
    /// tag set.
    #[derive(Default)]
    struct StubRecorder {
        state: Arc<Mutex<StubState>>,
        init_error: Option<String>,
    }

    impl StubRecorder {
        fn new() -> (Self, Arc<Mutex<StubState>>) {
            let state = Arc::new(Mutex::new(StubState::default()));
            (
                Self {
                    state: Arc::clone(&state),
                    init_error: None,
                },
                state,
            )
        }

        fn failing(message: &str) -> Self {
            Self {
                state: Arc::default(),
                init_error: Some(message.to_string()),
            }
        }
    }

    #[async_trait]
    impl Recorder for StubRecorder {
        async fn initialize(&self, opts: RecorderOptions) -> Result<(), MonitoringError> {
            if let Some(message) = &self.init_error {
                return Err(MonitoringError::InitializationFailed(message.clone()));
            }
            let mut state = self.state.lock();
            state.initialized = true;
            state.registered_views = opts.views.len();
            Ok(())
        }

        async fn close(&self) {
            self.state.lock().closed = true;
        }

        fn tags_context(&self, base: &TagContext, tags: &TagMap) -> TagContext {
            base.with_tags(tags)
        }

        fn record_with_tags(&self, scope: &TagContext, tags: &TagMap, sample: Measurement) {
            let merged = scope.with_tags(tags);
            self.state.lock().reports.push(MetricReport {
                name: sample.measure.name,
                value: sample.value,
                tags: merged.tags().clone(),
            });
        }
    }

    fn test_config(log_dir: &std::path::Path) -> MonitoringConfig {
        MonitoringConfig {
            project: "fake-project".to_string(),
            metric_prefix: "custom.googleapis.com".to_string(),
            namespace: "buildmon".to_string(),
            endpoint: "https://monitoring.example".to_string(),
            log_dir: log_dir.to_path_buf(),
            reporting_interval_secs: 60,
        }
    }

    async fn test_exporter(
        log_dir: &std::path::Path,
    ) -> (Exporter, Arc<Mutex<StubState>>) {
        let (stub, state) = StubRecorder::new();
        let registry = Arc::new(ViewRegistry::new(&HashMap::new()).unwrap());
        let exporter = Exporter::with_recorder(
            &test_config(log_dir),
            Credentials::none(),
            registry,
            Box::new(stub),
        )
        .await
        .unwrap();
        (exporter, state)
    }

    fn record(
        status: crate::types::CommandStatus,
        remote_status: crate::types::CommandStatus,
        latency_ms: i64,
    ) -> ActionRecord {
        let from = Utc::now();
        let mut event_times = HashMap::new();
        event_times.insert(
            crate::types::EVENT_PROXY_EXECUTION.to_string(),
            crate::types::TimeInterval::new(from, from + Duration::milliseconds(latency_ms)),
        );
        let mut labels = HashMap::new();
        labels.insert("type".to_string(), "tool".to_string());
        ActionRecord {
            status,
            remote_status,
            labels,
            event_times,
        }
    }

    fn action_tags(status: &str, remote_status: &str) -> TagMap {
        let mut tags = TagMap::new();
        tags.insert(LABELS_KEY.to_string(), "[type=tool]".to_string());
        tags.insert(
            OS_FAMILY_KEY.to_string(),
            std::env::consts::OS.to_string(),
        );
        tags.insert(
            VERSION_KEY.to_string(),
            version::current_version().to_string(),
        );
        tags.insert(STATUS_KEY.to_string(), status.to_string());
        tags.insert(REMOTE_STATUS_KEY.to_string(), remote_status.to_string());
        tags
    }

    fn build_tags() -> TagMap {
        let mut tags = TagMap::new();
        tags.insert(
            OS_FAMILY_KEY.to_string(),
            std::env::consts::OS.to_string(),
        );
        tags.insert(
            VERSION_KEY.to_string(),
            version::current_version().to_string(),
        );
        tags
    }

    fn sort_key(report: &MetricReport) -> String {
        let tags = report
            .tags
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        format!("{}{}[{}]", report.name, report.value, tags)
    }

    #[tokio::test]
    async fn export_metrics_for_actions_and_build() {
        use crate::types::CommandStatus::{CacheHit, NonZeroExit, Success};

        let log_dir = TempDir::new().unwrap();
        let (exporter, state) = test_exporter(log_dir.path()).await;

        let records = [
            record(CacheHit, CacheHit, 1000),
            record(Success, Success, 10000),
            record(Success, NonZeroExit, 10000),
        ];
        let summary = BuildSummary {
            num_records: 3,
            cache_hit_ratio: 1.0 / 3.0,
            build_latency_s: 10.0,
        };
        exporter.export_build_metrics(&summary);
        for r in &records {
            exporter.export_action_metrics(r);
        }
        exporter.close().await;

        let mut want = vec![
            MetricReport {
                name: "rbe/action/count",
                value: 1.0,
                tags: action_tags("CACHE_HIT", "CACHE_HIT"),
            },
            MetricReport {
                name: "rbe/action/latency",
                value: 1000.0,
                tags: action_tags("CACHE_HIT", "CACHE_HIT"),
            },
            MetricReport {
                name: "rbe/action/count",
                value: 1.0,
                tags: action_tags("SUCCESS", "SUCCESS"),
            },
            MetricReport {
                name: "rbe/action/latency",
                value: 10000.0,
                tags: action_tags("SUCCESS", "SUCCESS"),
            },
            MetricReport {
                name: "rbe/action/count",
                value: 1.0,
                tags: action_tags("SUCCESS", "NON_ZERO_EXIT"),
            },
            MetricReport {
                name: "rbe/action/latency",
                value: 10000.0,
                tags: action_tags("SUCCESS", "NON_ZERO_EXIT"),
            },
            MetricReport {
                name: "rbe/build/count",
                value: 1.0,
                tags: {
                    let mut tags = build_tags();
                    tags.insert(STATUS_KEY.to_string(), "SUCCESS".to_string());
                    tags
                },
            },
            MetricReport {
                name: "rbe/build/latency",
                value: 10.0,
                tags: build_tags(),
            },
            MetricReport {
                name: "rbe/build/cache_hit_ratio",
                value: 1.0 / 3.0,
                tags: build_tags(),
            },
        ];

        let state = state.lock();
        assert!(state.closed);
        let mut got = state.reports.clone();
        want.sort_by_key(sort_key);
        got.sort_by_key(sort_key);
        assert_eq!(got, want);
    }

    #[tokio::test]
    async fn build_failure_sentinel_tags_build_count() {
        use crate::types::CommandStatus::CacheHit;

        let log_dir = TempDir::new().unwrap();
        std::fs::write(log_dir.path().join("reproxy.FATAL"), b"FATAL").unwrap();
        let (exporter, state) = test_exporter(log_dir.path()).await;

        exporter.export_build_metrics(&BuildSummary {
            num_records: 1,
            cache_hit_ratio: 1.0,
            build_latency_s: 1.0,
        });
        exporter.export_action_metrics(&record(CacheHit, CacheHit, 1000));
        exporter.close().await;

        let state = state.lock();
        let build_count = state
            .reports
            .iter()
            .find(|r| r.name == "rbe/build/count")
            .unwrap();
        assert_eq!(build_count.tags.get(STATUS_KEY).unwrap(), "FAILURE");
        assert_eq!(state.reports.len(), 5);
    }

    #[tokio::test]
    async fn empty_build_emits_nothing() {
        let log_dir = TempDir::new().unwrap();
        let (exporter, state) = test_exporter(log_dir.path()).await;

        exporter.export_build_metrics(&BuildSummary::default());
        exporter.close().await;

        assert!(state.lock().reports.is_empty());
    }

    #[tokio::test]
    async fn missing_proxy_execution_interval_exports_zero_latency() {
        let log_dir = TempDir::new().unwrap();
        let (exporter, state) = test_exporter(log_dir.path()).await;

        exporter.export_action_metrics(&ActionRecord::default());
        exporter.close().await;

        let state = state.lock();
        let latency = state
            .reports
            .iter()
            .find(|r| r.name == "rbe/action/latency")
            .unwrap();
        assert_eq!(latency.value, 0.0);
        assert_eq!(state.reports.len(), 2);
    }

    #[tokio::test]
    async fn static_tags_reach_every_sample() {
        let log_dir = TempDir::new().unwrap();
        let (stub, state) = StubRecorder::new();
        let mut static_labels = HashMap::new();
        static_labels.insert("source".to_string(), "ci".to_string());
        let registry = Arc::new(ViewRegistry::new(&static_labels).unwrap());
        let exporter = Exporter::with_recorder(
            &test_config(log_dir.path()),
            Credentials::none(),
            registry,
            Box::new(stub),
        )
        .await
        .unwrap();

        exporter.export_build_metrics(&BuildSummary {
            num_records: 1,
            cache_hit_ratio: 0.5,
            build_latency_s: 2.0,
        });
        exporter.close().await;

        let state = state.lock();
        assert!(!state.reports.is_empty());
        for report in &state.reports {
            assert_eq!(report.tags.get("source").unwrap(), "ci");
        }
    }

    #[tokio::test]
    async fn initialize_registers_the_declared_views() {
        let log_dir = TempDir::new().unwrap();
        let (exporter, state) = test_exporter(log_dir.path()).await;
        {
            let state = state.lock();
            assert!(state.initialized);
            assert_eq!(state.registered_views, 5);
        }
        exporter.close().await;
    }

    #[tokio::test]
    async fn initialization_failure_surfaces_to_caller() {
        let log_dir = TempDir::new().unwrap();
        let registry = Arc::new(ViewRegistry::new(&HashMap::new()).unwrap());
        let result = Exporter::with_recorder(
            &test_config(log_dir.path()),
            Credentials::none(),
            registry,
            Box::new(StubRecorder::failing("backend unreachable")),
        )
        .await;
        assert!(matches!(
            result,
            Err(MonitoringError::InitializationFailed(_))
        ));
    }

    #[tokio::test]
    async fn monitored_resource_identifies_the_node() {
        let log_dir = TempDir::new().unwrap();
        let (exporter, _state) = test_exporter(log_dir.path()).await;

        let resource = exporter.monitored_resource();
        assert_eq!(resource.resource_type, "generic_node");
        assert_eq!(resource.labels.get("project_id").unwrap(), "fake-project");
        assert_eq!(resource.labels.get("namespace").unwrap(), "buildmon");
        assert_eq!(resource.labels.get("location").unwrap(), "us-central1-a");
        assert!(!resource.labels.get("node_id").unwrap().is_empty());
    }

    #[test]
    fn node_id_prefers_the_machine_hostname() {
        let etc_hostname = std::fs::read_to_string("/etc/hostname")
            .map(|name| name.trim().to_string())
            .unwrap_or_default();
        if etc_hostname.is_empty() {
            // Nothing to compare against on hosts without /etc/hostname.
            return;
        }
        let id = node_id(local_hostname());
        assert_eq!(id, etc_hostname);
        assert!(!id.starts_with("unknown-"));
    }

    #[test]
    fn missing_hostname_yields_generated_node_id() {
        let id = node_id(None);
        assert!(id.starts_with("unknown-"));
        assert!(id.len() > "unknown-".len());

        let empty = node_id(Some(String::new()));
        assert!(empty.starts_with("unknown-"));
        assert_ne!(id, empty);
    }
}
