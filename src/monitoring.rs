//! Monitoring domain: measures, views, the recorder capability, the
//! exporter lifecycle, and build-failure detection.

pub mod exporter;
pub mod failure;
pub mod measures;
pub mod recorder;
pub mod views;

pub use exporter::Exporter;
pub use failure::{check_build_failure, clean_log_dir, FAILURE_FILES};
pub use measures::{
    Measurement, MeasureDescriptor, ACTION_COUNT, ACTION_LATENCY, BUILD_CACHE_HIT_RATIO,
    BUILD_COUNT, BUILD_LATENCY,
};
pub use recorder::{CloudRecorder, MonitoredResource, Recorder, RecorderOptions, TagContext, TagMap};
pub use views::{registered_views, setup_views, Aggregation, View, ViewRegistry};
