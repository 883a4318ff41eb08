//! Physical channel helpers shared by gates and writers

use futures::stream::SelectAll;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::event::StreamData;

/// Combined input stream built from every physical channel of a gate
pub(crate) type GateInputStream<R> = SelectAll<ReceiverStream<StreamData<R>>>;

/// Convert a list of mpsc receivers into a single SelectAll stream
pub(crate) fn fan_in_streams<R>(inputs: Vec<mpsc::Receiver<StreamData<R>>>) -> GateInputStream<R>
where
    R: Send + 'static,
{
    let mut streams = SelectAll::new();
    for receiver in inputs {
        streams.push(ReceiverStream::new(receiver));
    }
    streams
}

/// Create one physical channel
pub fn create_channel<R>(
    capacity: usize,
) -> (mpsc::Sender<StreamData<R>>, mpsc::Receiver<StreamData<R>>) {
    mpsc::channel(capacity.max(1))
}

/// Create `count` physical channels, e.g. one per upstream instance of a fan-in gate
pub fn create_channels<R>(
    count: usize,
    capacity: usize,
) -> (
    Vec<mpsc::Sender<StreamData<R>>>,
    Vec<mpsc::Receiver<StreamData<R>>>,
) {
    let mut senders = Vec::with_capacity(count);
    let mut receivers = Vec::with_capacity(count);
    for _ in 0..count {
        let (sender, receiver) = create_channel(capacity);
        senders.push(sender);
        receivers.push(receiver);
    }
    (senders, receivers)
}
