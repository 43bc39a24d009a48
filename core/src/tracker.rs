/// Experiment tracking sink.
///
/// The orchestrator receives a tracker explicitly; nothing here is global.
/// `start` records the flattened configuration once, `log` records a scalar
/// at a step.

use crate::config::SdccConfig;

pub trait ExperimentTracker {
    fn start(&mut self, _config: &SdccConfig) {}

    fn log(&mut self, name: &str, value: f64, step: usize);
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullTracker;

impl ExperimentTracker for NullTracker {
    fn log(&mut self, _name: &str, _value: f64, _step: usize) {}
}

/// Forwards every record to the `log` facade at debug level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogTracker;

impl ExperimentTracker for LogTracker {
    fn start(&mut self, config: &SdccConfig) {
        for (key, value) in config.tracked_values() {
            log::debug!("track param {key}={value}");
        }
    }

    fn log(&mut self, name: &str, value: f64, step: usize) {
        log::debug!("track {name}={value:.6} step={step}");
    }
}

/// One scalar record.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedValue {
    pub name: String,
    pub value: f64,
    pub step: usize,
}

/// Keeps everything in memory; used by tests and for post-run inspection.
#[derive(Clone, Debug, Default)]
pub struct MemoryTracker {
    pub params: Vec<(String, String)>,
    pub records: Vec<TrackedValue>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        MemoryTracker::default()
    }

    /// (step, value) pairs recorded under `name`, in logging order.
    pub fn series(&self, name: &str) -> Vec<(usize, f64)> {
        self.records.iter()
            .filter(|r| r.name == name)
            .map(|r| (r.step, r.value))
            .collect()
    }

    pub fn last(&self, name: &str) -> Option<f64> {
        self.records.iter().rev().find(|r| r.name == name).map(|r| r.value)
    }
}

impl ExperimentTracker for MemoryTracker {
    fn start(&mut self, config: &SdccConfig) {
        self.params = config.tracked_values()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
    }

    fn log(&mut self, name: &str, value: f64, step: usize) {
        self.records.push(TrackedValue { name: name.to_string(), value, step });
    }
}
