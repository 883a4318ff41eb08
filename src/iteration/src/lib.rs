//! Per-worker runtime for bulk iterations.
//!
//! A worker re-runs its operator once per superstep, aggregates the control events
//! arriving on its input gates and forwards one `EndOfSuperstep` / `Termination` per
//! completed group of arrivals. The loop stops when gate 0 reaches consensus on
//! `Termination`.

pub mod aggregator;
pub mod channel;
pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod operator;
pub mod stats;

pub use aggregator::{Consensus, ConsensusListener, EventAggregator, EventCounter, InterruptThreshold};
pub use channel::{
    create_channel, create_channels, EventListener, GateItem, InputGate, Outputs, Payload,
    RecordWriter, ReplayBuffer, TaskChannels, TaskChannelsBuilder,
};
pub use config::IterationConfig;
pub use driver::{DriverState, IterationDriver, IterationSummary, ITERATION_GATE};
pub use error::{ConfigError, IterationError};
pub use event::{ControlEvent, EventKind, StreamData};
pub use operator::{Operator, OperatorFactory, RoundContext};
pub use stats::{EventAction, EventCounts, IterationStats, IterationStatsSnapshot};
