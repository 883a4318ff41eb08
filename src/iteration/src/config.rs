//! Task configuration for an iterative worker

use serde::{Deserialize, Serialize};

use crate::aggregator::InterruptThreshold;
use crate::error::ConfigError;

pub const DEFAULT_OUTPUT_BATCH_SIZE: usize = 64;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Configuration supplied once at setup. It is never reloaded while the loop runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IterationConfig {
    pub task_id: String,
    /// Interrupt threshold per gate index. Gates without an entry use 1.
    pub gate_thresholds: Vec<u64>,
    /// Gate 0 receives its data once and is replayed locally on later rounds
    pub has_cached_input: bool,
    pub output_batch_size: usize,
    pub channel_capacity: usize,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            task_id: "iteration".to_string(),
            gate_thresholds: Vec::new(),
            has_cached_input: false,
            output_batch_size: DEFAULT_OUTPUT_BATCH_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl IterationConfig {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            ..Default::default()
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|err| ConfigError::Invalid(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_threshold(mut self, gate: usize, threshold: u64) -> Self {
        if self.gate_thresholds.len() <= gate {
            self.gate_thresholds.resize(gate + 1, 1);
        }
        self.gate_thresholds[gate] = threshold;
        self
    }

    pub fn with_cached_input(mut self, cached: bool) -> Self {
        self.has_cached_input = cached;
        self
    }

    pub fn with_output_batch_size(mut self, size: usize) -> Self {
        self.output_batch_size = size;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Interrupt threshold for `gate`, rejecting a configured zero
    pub fn threshold(&self, gate: usize) -> Result<InterruptThreshold, ConfigError> {
        let raw = self.gate_thresholds.get(gate).copied().unwrap_or(1);
        InterruptThreshold::new(gate, raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for gate in 0..self.gate_thresholds.len() {
            self.threshold(gate)?;
        }
        if self.output_batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "channel capacity must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}
