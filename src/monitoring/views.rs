//! View declarations and the one-time registry binding measures to
//! aggregations and tag keys.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::MonitoringError;
use crate::monitoring::measures::{
    MeasureDescriptor, ACTION_COUNT, ACTION_LATENCY, ACTION_LATENCY_BUCKETS_MS, BUILD_CACHE_HIT_RATIO,
    BUILD_COUNT, BUILD_LATENCY, BUILD_LATENCY_BUCKETS_S, RATIO_BUCKETS,
};
use crate::monitoring::recorder::TagMap;

/// Dynamic tag key: free-form labels describing the action's kind.
pub const LABELS_KEY: &str = "action_labels";
/// Dynamic tag key: OS family of the exporting host.
pub const OS_FAMILY_KEY: &str = "os_family";
/// Dynamic tag key: running proxy version.
pub const VERSION_KEY: &str = "version";
/// Dynamic tag key: local completion status.
pub const STATUS_KEY: &str = "status";
/// Dynamic tag key: remote completion status.
pub const REMOTE_STATUS_KEY: &str = "remote_status";

/// How samples of a measure are aggregated by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Running sum of recorded values.
    Sum,
    /// Histogram over explicit bucket boundaries.
    Distribution(&'static [f64]),
}

/// A registered aggregation of one measure, sliced by a fixed tag-key set.
/// Declarations are handed to the recorder at initialize so the backend
/// learns each measure's aggregation and tag keys.
#[derive(Debug, Clone, Serialize)]
pub struct View {
    pub measure: &'static MeasureDescriptor,
    pub tag_keys: Vec<String>,
    pub aggregation: Aggregation,
}

/// The process view registry: the five views plus the write-once static tag
/// set they were registered with. Constructed as an explicit value so tests
/// stay independent of process-global state.
#[derive(Debug, Clone)]
pub struct ViewRegistry {
    static_tags: TagMap,
    views: Vec<View>,
}

fn validate_tag_key(key: &str) -> Result<(), MonitoringError> {
    if key.is_empty() || key.len() > 255 {
        return Err(MonitoringError::InvalidTagKey(key.to_string()));
    }
    if !key.chars().all(|c| c.is_ascii_graphic()) {
        return Err(MonitoringError::InvalidTagKey(key.to_string()));
    }
    Ok(())
}

impl ViewRegistry {
    /// Build the five views, binding the given static labels as extra tag
    /// keys on every view. Fails as a whole on any invalid key; no partial
    /// registration.
    pub fn new(static_labels: &HashMap<String, String>) -> Result<Self, MonitoringError> {
        for key in static_labels.keys() {
            validate_tag_key(key)?;
        }
        let static_tags: TagMap = static_labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let with_static = |keys: &[&str]| -> Vec<String> {
            static_tags
                .keys()
                .cloned()
                .chain(keys.iter().map(|k| k.to_string()))
                .collect()
        };
        let action_keys = [
            LABELS_KEY,
            OS_FAMILY_KEY,
            VERSION_KEY,
            STATUS_KEY,
            REMOTE_STATUS_KEY,
        ];
        let build_keys = [OS_FAMILY_KEY, VERSION_KEY];
        let build_count_keys = [OS_FAMILY_KEY, VERSION_KEY, STATUS_KEY];

        let views = vec![
            View {
                measure: &ACTION_LATENCY,
                tag_keys: with_static(&action_keys),
                aggregation: Aggregation::Distribution(ACTION_LATENCY_BUCKETS_MS),
            },
            View {
                measure: &ACTION_COUNT,
                tag_keys: with_static(&action_keys),
                aggregation: Aggregation::Sum,
            },
            View {
                measure: &BUILD_CACHE_HIT_RATIO,
                tag_keys: with_static(&build_keys),
                aggregation: Aggregation::Distribution(RATIO_BUCKETS),
            },
            View {
                measure: &BUILD_LATENCY,
                tag_keys: with_static(&build_keys),
                aggregation: Aggregation::Distribution(BUILD_LATENCY_BUCKETS_S),
            },
            View {
                measure: &BUILD_COUNT,
                tag_keys: with_static(&build_count_keys),
                aggregation: Aggregation::Sum,
            },
        ];

        Ok(Self { static_tags, views })
    }

    /// Static tags every exported sample starts from.
    pub fn static_tags(&self) -> &TagMap {
        &self.static_tags
    }

    pub fn views(&self) -> &[View] {
        &self.views
    }
}

static REGISTERED: Mutex<Option<Arc<ViewRegistry>>> = Mutex::new(None);

/// Register the process-wide views exactly once. A second call fails with
/// `AlreadyRegistered` and leaves the first registration untouched; a second
/// registration would desynchronize tag keys from already-registered views.
pub fn setup_views(
    static_labels: &HashMap<String, String>,
) -> Result<Arc<ViewRegistry>, MonitoringError> {
    let mut slot = REGISTERED.lock();
    if slot.is_some() {
        return Err(MonitoringError::AlreadyRegistered);
    }
    let registry = Arc::new(ViewRegistry::new(static_labels)?);
    *slot = Some(Arc::clone(&registry));
    Ok(registry)
}

/// The registry installed by [`setup_views`], if any.
pub fn registered_views() -> Option<Arc<ViewRegistry>> {
    REGISTERED.lock().clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn registry_declares_five_views() {
        let registry = ViewRegistry::new(&HashMap::new()).unwrap();
        assert_eq!(registry.views().len(), 5);
    }

    #[test]
    fn static_labels_become_tag_keys_on_every_view() {
        let registry = ViewRegistry::new(&labels(&[("source", "ci")])).unwrap();
        for view in registry.views() {
            assert!(view.tag_keys.contains(&"source".to_string()));
        }
        assert_eq!(registry.static_tags().get("source").unwrap(), "ci");
    }

    #[test]
    fn action_views_carry_action_tag_keys() {
        let registry = ViewRegistry::new(&HashMap::new()).unwrap();
        let latency = registry
            .views()
            .iter()
            .find(|v| v.measure.name == "rbe/action/latency")
            .unwrap();
        for key in [
            LABELS_KEY,
            OS_FAMILY_KEY,
            VERSION_KEY,
            STATUS_KEY,
            REMOTE_STATUS_KEY,
        ] {
            assert!(latency.tag_keys.contains(&key.to_string()));
        }
        assert_eq!(
            latency.aggregation,
            Aggregation::Distribution(crate::monitoring::measures::ACTION_LATENCY_BUCKETS_MS)
        );
    }

    #[test]
    fn build_count_view_carries_status_key() {
        let registry = ViewRegistry::new(&HashMap::new()).unwrap();
        let build_count = registry
            .views()
            .iter()
            .find(|v| v.measure.name == "rbe/build/count")
            .unwrap();
        assert!(build_count.tag_keys.contains(&STATUS_KEY.to_string()));
        assert!(!build_count.tag_keys.contains(&LABELS_KEY.to_string()));
        assert_eq!(build_count.aggregation, Aggregation::Sum);
    }

    #[test]
    fn invalid_tag_key_fails_whole_registration() {
        let result = ViewRegistry::new(&labels(&[("ok", "v"), ("bad key", "v")]));
        assert!(matches!(result, Err(MonitoringError::InvalidTagKey(_))));
    }

    #[test]
    fn setup_views_is_write_once() {
        let first = setup_views(&labels(&[("source", "ci")])).unwrap();
        assert_eq!(first.static_tags().get("source").unwrap(), "ci");

        let second = setup_views(&labels(&[("source", "dev")]));
        assert!(matches!(second, Err(MonitoringError::AlreadyRegistered)));

        // First registration's tag set is unchanged.
        let installed = registered_views().unwrap();
        assert_eq!(installed.static_tags().get("source").unwrap(), "ci");
    }
}
