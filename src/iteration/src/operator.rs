//! Operator invocation unit
//!
//! The worker-local logic of the iteration body. An [`OperatorFactory`] produces a
//! fresh [`Operator`] for every round; the instance runs once, reading the round's
//! input and writing the round's output through a [`RoundContext`].

use std::future::Future;

use async_trait::async_trait;

use crate::channel::{GateItem, Outputs, Payload, TaskChannels};
use crate::error::IterationError;

/// One round of worker-local computation
#[async_trait]
pub trait Operator<R: Payload>: Send {
    /// Run to completion for the current round. Returns once the round's input is
    /// exhausted or an interrupting control event is the next item.
    async fn run(&mut self, ctx: &mut RoundContext<'_, R>) -> Result<(), IterationError>;
}

/// Creates fresh operator instances. The driver calls it once at setup and once before
/// every round after the first.
pub trait OperatorFactory<R: Payload>: Send + Sync {
    fn instantiate(&self) -> Box<dyn Operator<R>>;
}

impl<R, F> OperatorFactory<R> for F
where
    R: Payload,
    F: Fn() -> Box<dyn Operator<R>> + Send + Sync,
{
    fn instantiate(&self) -> Box<dyn Operator<R>> {
        self()
    }
}

/// Channels of the worker as seen by one round of the operator
pub struct RoundContext<'a, R: Payload> {
    round: u64,
    channels: &'a mut TaskChannels<R>,
    outputs: Outputs<R>,
    cached_done: bool,
}

impl<'a, R: Payload> RoundContext<'a, R> {
    pub(crate) fn new(round: u64, channels: &'a mut TaskChannels<R>) -> Self {
        let outputs = channels.outputs().clone();
        Self {
            round,
            channels,
            outputs,
            cached_done: false,
        }
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn task_id(&self) -> &str {
        self.channels.task_id()
    }

    pub fn gate_count(&self) -> usize {
        self.channels.gate_count()
    }

    /// Next item of gate `gate` for this round.
    ///
    /// With cached input, gate 0 serves the replay buffer first. Afterwards only
    /// items already delivered on gate 0 are consumed, so control events addressed to
    /// the worker still reach its listeners, and the round then ends with
    /// [`GateItem::EndOfInput`].
    pub async fn read_next(&mut self, gate: usize) -> Result<GateItem<R>, IterationError> {
        if gate == 0 && self.channels.has_cached_input() {
            return self.read_cached().await;
        }
        self.channels.read_next(gate).await
    }

    /// Next record of gate `gate`, `None` at an interrupting event or end of input
    pub async fn next_record(&mut self, gate: usize) -> Result<Option<R>, IterationError> {
        Ok(self.read_next(gate).await?.into_record())
    }

    /// Emit a record on output `output`
    pub fn emit(
        &self,
        output: usize,
        record: R,
    ) -> impl Future<Output = Result<(), IterationError>> + Send + 'static {
        let outputs = self.outputs.clone();
        async move { outputs.emit(output, record).await }
    }

    /// Emit a record on every output
    pub fn broadcast(
        &self,
        record: R,
    ) -> impl Future<Output = Result<(), IterationError>> + Send + 'static {
        let outputs = self.outputs.clone();
        async move { outputs.broadcast(record).await }
    }

    pub fn outputs(&self) -> &Outputs<R> {
        &self.outputs
    }

    async fn read_cached(&mut self) -> Result<GateItem<R>, IterationError> {
        if !self.cached_done {
            if let Some(cached) = self.channels.cached_mut() {
                if let Some(record) = cached.next().await {
                    self.channels.stats().record_in(1);
                    return Ok(GateItem::Record(record));
                }
            }
            self.cached_done = true;
        }
        let item = self.channels.gate_mut(0)?.read_available().await?;
        Ok(item.unwrap_or(GateItem::EndOfInput))
    }
}
