//! Measure declarations: the fixed set of named quantities the proxy
//! records, together with their histogram bucket tables.

use serde::{Serialize, Serializer};

/// Unit of a measure, following the conventions of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Dimensionless,
    Milliseconds,
    Seconds,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Dimensionless => "1",
            Unit::Milliseconds => "ms",
            Unit::Seconds => "s",
        }
    }
}

impl Serialize for Unit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// An immutable, process-wide description of one recordable quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MeasureDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub unit: Unit,
}

impl MeasureDescriptor {
    /// A single recorded sample of this measure.
    pub fn m(&'static self, value: f64) -> Measurement {
        Measurement {
            measure: self,
            value,
        }
    }
}

/// One sample: a measure paired with a value. Tags are attached at record
/// time, not here.
#[derive(Debug, Clone, Copy)]
pub struct Measurement {
    pub measure: &'static MeasureDescriptor,
    pub value: f64,
}

/// Number of actions processed by the proxy.
pub static ACTION_COUNT: MeasureDescriptor = MeasureDescriptor {
    name: "rbe/action/count",
    description: "Number of actions processed by the proxy",
    unit: Unit::Dimensionless,
};

/// End-to-end time spent processing an action in the proxy.
pub static ACTION_LATENCY: MeasureDescriptor = MeasureDescriptor {
    name: "rbe/action/latency",
    description: "Time spent processing an action e2e in the proxy",
    unit: Unit::Milliseconds,
};

/// Ratio of cache hits in a build.
pub static BUILD_CACHE_HIT_RATIO: MeasureDescriptor = MeasureDescriptor {
    name: "rbe/build/cache_hit_ratio",
    description: "Ratio of cache hits in a build",
    unit: Unit::Dimensionless,
};

/// Time between the proxy receiving the first and last actions of the build.
pub static BUILD_LATENCY: MeasureDescriptor = MeasureDescriptor {
    name: "rbe/build/latency",
    description: "Time spent between the first and last actions of the build",
    unit: Unit::Seconds,
};

/// Counter for builds.
pub static BUILD_COUNT: MeasureDescriptor = MeasureDescriptor {
    name: "rbe/build/count",
    description: "Counter for builds",
    unit: Unit::Dimensionless,
};

/// Histogram bucket boundaries for action latency, in milliseconds.
pub static ACTION_LATENCY_BUCKETS_MS: &[f64] = &[
    1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 8.0, 10.0, 13.0, 16.0, 20.0, 25.0, 30.0, 40.0, 50.0, 65.0, 80.0,
    100.0, 130.0, 160.0, 200.0, 250.0, 300.0, 400.0, 500.0, 650.0, 800.0, 1000.0, 2000.0, 5000.0,
    10000.0, 20000.0, 50000.0, 100000.0, 200000.0, 500000.0,
];

/// Histogram bucket boundaries for build latency, in seconds.
pub static BUILD_LATENCY_BUCKETS_S: &[f64] = &[
    1.0, 10.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 2400.0, 3000.0, 3600.0, 4200.0, 4800.0, 5400.0,
    6000.0, 6600.0, 7200.0, 9000.0, 10800.0, 12600.0, 14400.0,
];

/// Fixed 0.05-wide buckets spanning 0.05..=1.0 for ratio measures.
pub static RATIO_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.15, 0.20, 0.25, 0.3, 0.35, 0.4, 0.45, 0.5, 0.55, 0.6, 0.65, 0.7, 0.75, 0.8, 0.85,
    0.9, 0.95, 1.0,
];
