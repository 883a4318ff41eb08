//! Event channel abstraction
//!
//! Multiplexed input gates and buffered output writers. Both carry data records and
//! out-of-band control events on the same physical channels (tokio mpsc).
//!
//! - [`InputGate`]: fans in the physical channels of one logical input
//! - [`Outputs`]: shared handle over the worker's [`RecordWriter`]s
//! - [`ReplayBuffer`]: cached seed input replayed on every round
//! - [`TaskChannels`]: everything a worker reads from and writes to

pub mod base;
pub mod input;
pub mod output;
pub mod replay;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::IterationConfig;
use crate::error::{ConfigError, IterationError};
use crate::event::{ControlEvent, EventKind, StreamData};
use crate::stats::IterationStats;

pub use base::{create_channel, create_channels};
pub use input::InputGate;
pub use output::{Outputs, RecordWriter};
pub use replay::ReplayBuffer;

/// Bound for records flowing through the iteration runtime
pub trait Payload: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Payload for T {}

/// Handler for control events received on a gate
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: ControlEvent) -> Result<(), IterationError>;
}

/// Item handed to a gate reader
#[derive(Debug, Clone, PartialEq)]
pub enum GateItem<R> {
    Record(R),
    /// A control event that interrupts the reader for this round
    Event(ControlEvent),
    /// No more input for this round (all channels closed, or cached input used up)
    EndOfInput,
}

impl<R> GateItem<R> {
    pub fn into_record(self) -> Option<R> {
        match self {
            GateItem::Record(record) => Some(record),
            _ => None,
        }
    }
}

/// Input gates, outputs and optional cached input of one worker
pub struct TaskChannels<R: Payload> {
    task_id: String,
    gates: Vec<InputGate<R>>,
    outputs: Outputs<R>,
    cached: Option<ReplayBuffer<R>>,
    stats: Arc<IterationStats>,
}

impl<R: Payload> TaskChannels<R> {
    pub fn builder(config: &IterationConfig) -> TaskChannelsBuilder<R> {
        TaskChannelsBuilder::new(config)
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn gate_count(&self) -> usize {
        self.gates.len()
    }

    pub fn gate(&self, index: usize) -> Result<&InputGate<R>, ConfigError> {
        let gates = self.gates.len();
        self.gates
            .get(index)
            .ok_or(ConfigError::UnknownGate { gate: index, gates })
    }

    pub fn gate_mut(&mut self, index: usize) -> Result<&mut InputGate<R>, ConfigError> {
        let gates = self.gates.len();
        self.gates
            .get_mut(index)
            .ok_or(ConfigError::UnknownGate { gate: index, gates })
    }

    pub fn outputs(&self) -> &Outputs<R> {
        &self.outputs
    }

    pub fn stats(&self) -> &Arc<IterationStats> {
        &self.stats
    }

    pub fn has_cached_input(&self) -> bool {
        self.cached.is_some()
    }

    pub(crate) fn cached_mut(&mut self) -> Option<&mut ReplayBuffer<R>> {
        self.cached.as_mut()
    }

    /// Register `listener` for every arrival of `kind` on gate `gate`
    pub fn listen(
        &mut self,
        gate: usize,
        kind: EventKind,
        listener: Arc<dyn EventListener>,
    ) -> Result<(), ConfigError> {
        self.gate_mut(gate)?.listen(kind, listener);
        Ok(())
    }

    pub async fn forward_to_all_outputs(&self, event: ControlEvent) -> Result<(), IterationError> {
        self.outputs.forward_to_all_outputs(event).await
    }

    pub async fn read_next(&mut self, gate: usize) -> Result<GateItem<R>, IterationError> {
        self.gate_mut(gate)?.read_next().await
    }

    pub(crate) async fn begin_round(&mut self, round: u64) {
        if let Some(cached) = self.cached.as_mut() {
            cached.begin_round(round).await;
        }
    }
}

/// Builder wiring physical channels into gates and outputs
pub struct TaskChannelsBuilder<R: Payload> {
    config: IterationConfig,
    inputs: Vec<Vec<mpsc::Receiver<StreamData<R>>>>,
    outputs: Vec<mpsc::Sender<StreamData<R>>>,
    seed: Option<mpsc::Receiver<R>>,
}

impl<R: Payload> TaskChannelsBuilder<R> {
    fn new(config: &IterationConfig) -> Self {
        Self {
            config: config.clone(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            seed: None,
        }
    }

    /// Declare gates `0..count` even if some of them get no physical channel
    pub fn gates(mut self, count: usize) -> Self {
        if self.inputs.len() < count {
            self.inputs.resize_with(count, Vec::new);
        }
        self
    }

    /// Attach a physical channel to gate `gate`
    pub fn input(mut self, gate: usize, receiver: mpsc::Receiver<StreamData<R>>) -> Self {
        self = self.gates(gate + 1);
        self.inputs[gate].push(receiver);
        self
    }

    pub fn inputs(
        mut self,
        gate: usize,
        receivers: impl IntoIterator<Item = mpsc::Receiver<StreamData<R>>>,
    ) -> Self {
        for receiver in receivers {
            self = self.input(gate, receiver);
        }
        self
    }

    pub fn output(mut self, sender: mpsc::Sender<StreamData<R>>) -> Self {
        self.outputs.push(sender);
        self
    }

    /// One-shot seed for the cached input of gate 0
    pub fn cached_input(mut self, seed: mpsc::Receiver<R>) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<TaskChannels<R>, ConfigError> {
        self.config.validate()?;
        let task_id = self.config.task_id.clone();
        let stats = Arc::new(IterationStats::new(task_id.as_str()));

        let mut gates = Vec::with_capacity(self.inputs.len());
        for (index, receivers) in self.inputs.into_iter().enumerate() {
            let mut gate = InputGate::with_channels(index, self.config.threshold(index)?, receivers);
            gate.attach_stats(Arc::clone(&stats));
            gates.push(gate);
        }

        let writers = self
            .outputs
            .into_iter()
            .enumerate()
            .map(|(index, sender)| {
                RecordWriter::new(
                    format!("{task_id}/out{index}"),
                    sender,
                    self.config.output_batch_size,
                )
            })
            .collect();

        Ok(TaskChannels {
            task_id,
            gates,
            outputs: Outputs::with_stats(writers, Some(Arc::clone(&stats))),
            cached: self.seed.map(ReplayBuffer::new),
            stats,
        })
    }
}
