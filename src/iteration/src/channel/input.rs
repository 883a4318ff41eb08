//! Input gates.
//!
//! A gate merges every physical channel feeding one logical input. Records are handed
//! to the reader as they arrive. Control events are dispatched to the gate's listeners
//! by the reading task, so a listener always runs after the records its channel sent
//! before the event. The reader itself is interrupted (sees the event) only when the
//! gate's count for that kind reaches a multiple of the interrupt threshold; other
//! arrivals are skipped after dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::StreamExt;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::aggregator::InterruptThreshold;
use crate::channel::base::{fan_in_streams, GateInputStream};
use crate::channel::{EventListener, GateItem, Payload};
use crate::error::IterationError;
use crate::event::{ControlEvent, EventKind, StreamData};
use crate::stats::IterationStats;

pub struct InputGate<R: Payload> {
    index: usize,
    streams: GateInputStream<R>,
    channels: usize,
    threshold: InterruptThreshold,
    listeners: HashMap<EventKind, Vec<Arc<dyn EventListener>>>,
    interrupt_counts: [u64; 2],
    exhausted: bool,
    stats: Option<Arc<IterationStats>>,
}

impl<R: Payload> InputGate<R> {
    pub fn new(index: usize, threshold: InterruptThreshold) -> Self {
        Self {
            index,
            streams: fan_in_streams(Vec::new()),
            channels: 0,
            threshold,
            listeners: HashMap::new(),
            interrupt_counts: [0; 2],
            exhausted: false,
            stats: None,
        }
    }

    pub fn with_channels(
        index: usize,
        threshold: InterruptThreshold,
        receivers: Vec<mpsc::Receiver<StreamData<R>>>,
    ) -> Self {
        let mut gate = Self::new(index, threshold);
        for receiver in receivers {
            gate.add_channel(receiver);
        }
        gate
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of physical channels attached since creation
    pub fn channel_count(&self) -> usize {
        self.channels
    }

    pub fn threshold(&self) -> InterruptThreshold {
        self.threshold
    }

    /// True once every physical channel of the gate has closed
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn add_channel(&mut self, receiver: mpsc::Receiver<StreamData<R>>) {
        self.streams.push(ReceiverStream::new(receiver));
        self.channels += 1;
        self.exhausted = false;
    }

    /// Register a listener invoked once per arrival of `kind` on this gate
    pub fn listen(&mut self, kind: EventKind, listener: Arc<dyn EventListener>) {
        self.listeners.entry(kind).or_default().push(listener);
    }

    pub(crate) fn attach_stats(&mut self, stats: Arc<IterationStats>) {
        self.stats = Some(stats);
    }

    /// Block until the next record, an interrupting control event, or end of input
    pub async fn read_next(&mut self) -> Result<GateItem<R>, IterationError> {
        loop {
            let item = self.streams.next().await;
            if let Some(item) = self.accept(item).await? {
                return Ok(item);
            }
        }
    }

    /// Like [`read_next`](Self::read_next) but only consumes items that are already
    /// delivered. Returns `Ok(None)` when the gate has nothing ready.
    pub async fn read_available(&mut self) -> Result<Option<GateItem<R>>, IterationError> {
        loop {
            let Some(item) = self.streams.next().now_or_never() else {
                return Ok(None);
            };
            if let Some(item) = self.accept(item).await? {
                return Ok(Some(item));
            }
        }
    }

    async fn accept(
        &mut self,
        item: Option<StreamData<R>>,
    ) -> Result<Option<GateItem<R>>, IterationError> {
        match item {
            Some(StreamData::Record(record)) => {
                if let Some(stats) = &self.stats {
                    stats.record_in(1);
                }
                Ok(Some(GateItem::Record(record)))
            }
            Some(StreamData::Event(event)) => {
                self.dispatch(event).await?;
                Ok(self.interrupt(event).then_some(GateItem::Event(event)))
            }
            None => {
                if !self.exhausted {
                    tracing::debug!(gate = self.index, "all gate channels closed");
                }
                self.exhausted = true;
                Ok(Some(GateItem::EndOfInput))
            }
        }
    }

    async fn dispatch(&self, event: ControlEvent) -> Result<(), IterationError> {
        if let Some(stats) = &self.stats {
            stats.record_event_received(event.kind());
        }
        let Some(listeners) = self.listeners.get(&event.kind()) else {
            return Ok(());
        };
        for listener in listeners {
            listener.on_event(event).await?;
        }
        Ok(())
    }

    fn interrupt(&mut self, event: ControlEvent) -> bool {
        let slot = event.kind().slot();
        self.interrupt_counts[slot] += 1;
        self.threshold.is_reached_by(self.interrupt_counts[slot])
    }
}
