//! Control event aggregation for fan-in gates.
//!
//! A gate fed by K physical channels receives K copies of every control signal. The
//! aggregator counts arrivals per event kind and reports consensus on every arrival
//! whose count is a multiple of the gate's interrupt threshold, collapsing the K
//! per-channel signals into one downstream signal.
//!
//! Counting is order-insensitive. Channels feeding the same gate may interleave
//! arbitrarily; only the number of arrivals matters.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::channel::EventListener;
use crate::error::{ConfigError, IterationError};
use crate::event::{ControlEvent, EventKind};

/// "Forward once every N arrivals" for a single gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptThreshold(NonZeroU64);

impl InterruptThreshold {
    pub const ONE: InterruptThreshold = InterruptThreshold(NonZeroU64::MIN);

    pub fn new(gate: usize, raw: u64) -> Result<Self, ConfigError> {
        NonZeroU64::new(raw)
            .map(InterruptThreshold)
            .ok_or(ConfigError::ZeroThreshold { gate })
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }

    /// True when the `count`-th arrival completes a group of arrivals
    pub fn is_reached_by(&self, count: u64) -> bool {
        count % self.0.get() == 0
    }
}

/// Monotonic count of one event kind observed on one gate. Never reset.
#[derive(Debug, Default)]
pub struct EventCounter {
    value: AtomicU64,
}

impl EventCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one arrival and return the count including it
    pub fn increment(&self) -> u64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }
}

/// Outcome of a single arrival
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consensus {
    /// The arrival completed a group; the consensus action must run
    Reached { count: u64 },
    /// The arrival was counted without any further effect
    Absorbed { count: u64 },
}

impl Consensus {
    pub fn is_reached(&self) -> bool {
        matches!(self, Consensus::Reached { .. })
    }

    pub fn count(&self) -> u64 {
        match self {
            Consensus::Reached { count } | Consensus::Absorbed { count } => *count,
        }
    }
}

/// Per-gate counters and threshold
#[derive(Debug)]
pub struct EventAggregator {
    gate: usize,
    threshold: InterruptThreshold,
    counters: [EventCounter; 2],
}

impl EventAggregator {
    pub fn new(gate: usize, threshold: InterruptThreshold) -> Self {
        Self {
            gate,
            threshold,
            counters: [EventCounter::new(), EventCounter::new()],
        }
    }

    pub fn gate(&self) -> usize {
        self.gate
    }

    pub fn threshold(&self) -> InterruptThreshold {
        self.threshold
    }

    pub fn on_arrival(&self, kind: EventKind) -> Consensus {
        let count = self.counters[kind.slot()].increment();
        if self.threshold.is_reached_by(count) {
            Consensus::Reached { count }
        } else {
            Consensus::Absorbed { count }
        }
    }

    pub fn count(&self, kind: EventKind) -> u64 {
        self.counters[kind.slot()].value()
    }
}

/// Adapts an aggregator to the channel layer: counts every arrival of `kind` and runs
/// `action` each time the gate reaches consensus.
pub struct ConsensusListener {
    kind: EventKind,
    aggregator: Arc<EventAggregator>,
    action: Arc<dyn EventListener>,
}

impl ConsensusListener {
    pub fn new(
        kind: EventKind,
        aggregator: Arc<EventAggregator>,
        action: Arc<dyn EventListener>,
    ) -> Self {
        Self {
            kind,
            aggregator,
            action,
        }
    }
}

#[async_trait]
impl EventListener for ConsensusListener {
    async fn on_event(&self, event: ControlEvent) -> Result<(), IterationError> {
        if event.kind() != self.kind {
            return Ok(());
        }
        match self.aggregator.on_arrival(self.kind) {
            Consensus::Reached { count } => {
                tracing::debug!(
                    gate = self.aggregator.gate(),
                    event = %self.kind,
                    count,
                    "gate reached consensus"
                );
                self.action.on_event(event).await
            }
            Consensus::Absorbed { count } => {
                tracing::trace!(
                    gate = self.aggregator.gate(),
                    event = %self.kind,
                    count,
                    threshold = self.aggregator.threshold().get(),
                    "control event absorbed"
                );
                Ok(())
            }
        }
    }
}
