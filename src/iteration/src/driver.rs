//! Iteration driver - runs one worker's slice of a bulk iteration.
//!
//! The driver re-runs the operator once per superstep until its gate 0 reaches
//! consensus on `Termination`. Before the first round it installs two consensus
//! actions on gate 0:
//! - `EndOfSuperstep`: forward the event to every output
//! - `Termination`: forward the event to every output, then mark the loop terminated
//!
//! A worker with cached input has no upstream that re-sends its input, so nobody else
//! emits the markers a real upstream would. It synthesizes one `EndOfSuperstep` after
//! every round and one `Termination` after the loop exits.
//!
//! The termination flag is only checked at the top of the loop; a `Termination` that
//! reaches consensus in the middle of a round does not cut the round short.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::aggregator::{ConsensusListener, EventAggregator};
use crate::channel::{EventListener, Outputs, Payload, TaskChannels};
use crate::config::IterationConfig;
use crate::error::{ConfigError, IterationError};
use crate::event::{ControlEvent, EventKind};
use crate::operator::{Operator, OperatorFactory, RoundContext};
use crate::stats::{EventAction, IterationStats, IterationStatsSnapshot};

/// Gate whose control events drive the superstep protocol
pub const ITERATION_GATE: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverState {
    Running,
    Terminated,
}

/// Result of a completed iteration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationSummary {
    pub task_id: String,
    pub rounds: u64,
    pub stats: IterationStatsSnapshot,
}

/// Consensus action: forward the aggregated event downstream, optionally terminating
struct PropagateEvent<R> {
    task_id: String,
    outputs: Outputs<R>,
    stats: Arc<IterationStats>,
    terminated: Option<Arc<AtomicBool>>,
}

#[async_trait]
impl<R: Payload> EventListener for PropagateEvent<R> {
    async fn on_event(&self, event: ControlEvent) -> Result<(), IterationError> {
        tracing::info!(task_id = %self.task_id, event = %event.kind(), "propagating control event");
        self.outputs.forward_to_all_outputs(event).await?;
        self.stats.record_event(event.kind(), EventAction::Forwarded);
        if let Some(terminated) = &self.terminated {
            terminated.store(true, Ordering::Release);
        }
        Ok(())
    }
}

pub struct IterationDriver<R: Payload> {
    config: IterationConfig,
    channels: TaskChannels<R>,
    factory: Box<dyn OperatorFactory<R>>,
    operator: Box<dyn Operator<R>>,
    aggregator: Arc<EventAggregator>,
    terminated: Arc<AtomicBool>,
    round: u64,
    finished: bool,
}

impl<R: Payload> IterationDriver<R> {
    /// Validate the configuration, install the consensus actions on gate 0 and create
    /// the operator instance for round 0.
    pub fn new(
        config: IterationConfig,
        mut channels: TaskChannels<R>,
        factory: impl OperatorFactory<R> + 'static,
    ) -> Result<Self, IterationError> {
        config.validate()?;
        let gates = channels.gate_count();
        if gates == 0 {
            return Err(ConfigError::UnknownGate {
                gate: ITERATION_GATE,
                gates,
            }
            .into());
        }
        if config.has_cached_input && !channels.has_cached_input() {
            return Err(ConfigError::MissingCachedInput.into());
        }
        if !config.has_cached_input && channels.has_cached_input() {
            return Err(ConfigError::Invalid(
                "cached input attached but has_cached_input is false".to_string(),
            )
            .into());
        }
        if config.task_id != channels.task_id() {
            return Err(ConfigError::Invalid(format!(
                "driver task {} was given the channels of task {}",
                config.task_id,
                channels.task_id()
            ))
            .into());
        }
        let threshold = config.threshold(ITERATION_GATE)?;
        let gate_threshold = channels.gate(ITERATION_GATE)?.threshold();
        if threshold != gate_threshold {
            return Err(ConfigError::ThresholdMismatch {
                gate: ITERATION_GATE,
                driver: threshold.get(),
                channels: gate_threshold.get(),
            }
            .into());
        }

        let terminated = Arc::new(AtomicBool::new(false));
        let aggregator = Arc::new(EventAggregator::new(ITERATION_GATE, threshold));
        let stats = Arc::clone(channels.stats());

        let end_of_superstep = PropagateEvent {
            task_id: config.task_id.clone(),
            outputs: channels.outputs().clone(),
            stats: Arc::clone(&stats),
            terminated: None,
        };
        channels.listen(
            ITERATION_GATE,
            EventKind::EndOfSuperstep,
            Arc::new(ConsensusListener::new(
                EventKind::EndOfSuperstep,
                Arc::clone(&aggregator),
                Arc::new(end_of_superstep),
            )),
        )?;

        let termination = PropagateEvent {
            task_id: config.task_id.clone(),
            outputs: channels.outputs().clone(),
            stats: Arc::clone(&stats),
            terminated: Some(Arc::clone(&terminated)),
        };
        channels.listen(
            ITERATION_GATE,
            EventKind::Termination,
            Arc::new(ConsensusListener::new(
                EventKind::Termination,
                Arc::clone(&aggregator),
                Arc::new(termination),
            )),
        )?;

        let operator = factory.instantiate();
        stats.record_instantiation();

        tracing::info!(
            task_id = %config.task_id,
            gates,
            outputs = channels.outputs().len(),
            threshold = aggregator.threshold().get(),
            cached_input = config.has_cached_input,
            "iteration driver ready"
        );

        Ok(Self {
            config,
            channels,
            factory: Box::new(factory),
            operator,
            aggregator,
            terminated,
            round: 0,
            finished: false,
        })
    }

    pub fn task_id(&self) -> &str {
        &self.config.task_id
    }

    /// Rounds completed so far
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn state(&self) -> DriverState {
        if self.is_terminated() {
            DriverState::Terminated
        } else {
            DriverState::Running
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Aggregated arrivals of `kind` on gate 0
    pub fn event_count(&self, kind: EventKind) -> u64 {
        self.aggregator.count(kind)
    }

    pub fn stats(&self) -> &Arc<IterationStats> {
        self.channels.stats()
    }

    pub fn channels(&self) -> &TaskChannels<R> {
        &self.channels
    }

    /// Run supersteps until termination. A driver runs once; later calls fail with
    /// [`IterationError::AlreadyFinished`] and emit nothing.
    pub async fn run(&mut self) -> Result<IterationSummary, IterationError> {
        if self.finished {
            return Err(IterationError::AlreadyFinished {
                task_id: self.config.task_id.clone(),
            });
        }
        self.finished = true;

        match self.run_supersteps().await {
            Ok(summary) => Ok(summary),
            Err(err) => {
                tracing::error!(
                    task_id = %self.config.task_id,
                    round = self.round,
                    error = %err,
                    "iteration failed"
                );
                self.stats().record_error(err.kind(), err.to_string());
                Err(err)
            }
        }
    }

    async fn run_supersteps(&mut self) -> Result<IterationSummary, IterationError> {
        while !self.is_terminated() {
            self.run_round().await?;
        }

        if self.config.has_cached_input {
            self.send_additional_event(ControlEvent::Termination).await?;
        }
        self.channels.outputs().flush_all().await?;

        tracing::info!(
            task_id = %self.config.task_id,
            rounds = self.round,
            "iteration terminated"
        );
        Ok(IterationSummary {
            task_id: self.config.task_id.clone(),
            rounds: self.round,
            stats: self.stats().snapshot(),
        })
    }

    async fn run_round(&mut self) -> Result<(), IterationError> {
        let round = self.round;
        tracing::info!(task_id = %self.config.task_id, round, "starting superstep");

        if round > 0 {
            self.operator = self.factory.instantiate();
            self.channels.stats().record_instantiation();
        }
        self.channels.begin_round(round).await;

        let mut ctx = RoundContext::new(round, &mut self.channels);
        self.operator.run(&mut ctx).await?;

        if self.config.has_cached_input {
            self.send_additional_event(ControlEvent::EndOfSuperstep)
                .await?;
        }

        if !self.is_terminated() && self.channels.gate(ITERATION_GATE)?.is_exhausted() {
            return Err(IterationError::InputExhausted {
                gate: ITERATION_GATE,
                round,
            });
        }

        tracing::info!(task_id = %self.config.task_id, round, "finishing superstep");
        self.channels.stats().record_round();
        self.round += 1;
        Ok(())
    }

    async fn send_additional_event(&mut self, event: ControlEvent) -> Result<(), IterationError> {
        tracing::info!(
            task_id = %self.config.task_id,
            event = %event.kind(),
            "sending additional control event"
        );
        self.channels.forward_to_all_outputs(event).await?;
        self.channels
            .stats()
            .record_event(event.kind(), EventAction::Synthesized);
        Ok(())
    }
}
