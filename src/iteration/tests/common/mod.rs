#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use iteration::{IterationError, Operator, OperatorFactory, RoundContext, StreamData};
use tokio::sync::mpsc;

/// Forwards every record of gate 0 to all outputs and remembers the round it ran in
pub struct ForwardRecords {
    rounds: Arc<Mutex<Vec<u64>>>,
}

#[async_trait]
impl Operator<u64> for ForwardRecords {
    async fn run(&mut self, ctx: &mut RoundContext<'_, u64>) -> Result<(), IterationError> {
        self.rounds.lock().expect("rounds lock").push(ctx.round());
        while let Some(record) = ctx.next_record(0).await? {
            ctx.broadcast(record).await?;
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct ForwardFactory {
    pub instantiations: Arc<AtomicUsize>,
    pub rounds: Arc<Mutex<Vec<u64>>>,
}

impl ForwardFactory {
    pub fn instantiations(&self) -> usize {
        self.instantiations.load(Ordering::SeqCst)
    }

    pub fn rounds(&self) -> Vec<u64> {
        self.rounds.lock().expect("rounds lock").clone()
    }
}

impl OperatorFactory<u64> for ForwardFactory {
    fn instantiate(&self) -> Box<dyn Operator<u64>> {
        self.instantiations.fetch_add(1, Ordering::SeqCst);
        Box::new(ForwardRecords {
            rounds: Arc::clone(&self.rounds),
        })
    }
}

/// Send a sequence of items on one physical channel
pub async fn send_all(sender: &mpsc::Sender<StreamData<u64>>, items: Vec<StreamData<u64>>) {
    for item in items {
        sender.send(item).await.expect("send to gate");
    }
}

/// Everything currently buffered in a receiver
pub fn drain(receiver: &mut mpsc::Receiver<StreamData<u64>>) -> Vec<StreamData<u64>> {
    let mut items = Vec::new();
    while let Ok(item) = receiver.try_recv() {
        items.push(item);
    }
    items
}

pub fn records(items: &[StreamData<u64>]) -> Vec<u64> {
    items.iter().filter_map(|item| item.as_record().copied()).collect()
}

pub fn events(items: &[StreamData<u64>]) -> Vec<iteration::ControlEvent> {
    items.iter().filter_map(|item| item.as_event()).collect()
}

pub fn r(value: u64) -> StreamData<u64> {
    StreamData::record(value)
}

pub fn eos() -> StreamData<u64> {
    StreamData::end_of_superstep()
}

pub fn term() -> StreamData<u64> {
    StreamData::termination()
}
