//! Output writers.
//!
//! Records are buffered per output channel and flushed in batches. Publishing a control
//! event flushes the buffer first, so the event marks the end of an epoch in the output
//! stream: downstream observes it strictly after every record emitted before it.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::channel::Payload;
use crate::error::{ConfigError, IterationError};
use crate::event::{ControlEvent, StreamData};
use crate::stats::IterationStats;

/// Buffered writer for one physical output channel
pub struct RecordWriter<R> {
    name: String,
    sender: mpsc::Sender<StreamData<R>>,
    buffer: Vec<R>,
    batch_size: usize,
}

impl<R: Payload> RecordWriter<R> {
    pub fn new(name: impl Into<String>, sender: mpsc::Sender<StreamData<R>>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            name: name.into(),
            sender,
            buffer: Vec::with_capacity(batch_size),
            batch_size,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Buffer a record, flushing when the batch is full. Returns the number of records
    /// written to the channel.
    pub async fn emit(&mut self, record: R) -> Result<usize, IterationError> {
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            return self.flush().await;
        }
        Ok(0)
    }

    pub async fn flush(&mut self) -> Result<usize, IterationError> {
        let flushed = self.buffer.len();
        for record in self.buffer.drain(..) {
            self.sender
                .send(StreamData::Record(record))
                .await
                .map_err(|_| IterationError::channel_closed(self.name.as_str()))?;
        }
        Ok(flushed)
    }

    /// Flush buffered records, then append the event
    pub async fn publish_event(&mut self, event: ControlEvent) -> Result<usize, IterationError> {
        let flushed = self.flush().await?;
        self.sender
            .send(StreamData::Event(event))
            .await
            .map_err(|_| IterationError::channel_closed(self.name.as_str()))?;
        Ok(flushed)
    }
}

struct OutputSet<R> {
    writers: Vec<RecordWriter<R>>,
    stats: Option<Arc<IterationStats>>,
}

impl<R> OutputSet<R> {
    fn record_out(&self, records: usize) {
        if records == 0 {
            return;
        }
        if let Some(stats) = &self.stats {
            stats.record_out(records as u64);
        }
    }
}

/// Shared handle over every output writer of a worker.
///
/// The operator and the consensus actions write through clones of the same handle.
/// Every operation holds the lock for its whole duration, so no record can slip between
/// the flush and the event of a forward.
pub struct Outputs<R> {
    inner: Arc<Mutex<OutputSet<R>>>,
    count: usize,
}

impl<R> Clone for Outputs<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            count: self.count,
        }
    }
}

impl<R: Payload> Outputs<R> {
    pub fn new(writers: Vec<RecordWriter<R>>) -> Self {
        Self::with_stats(writers, None)
    }

    pub(crate) fn with_stats(writers: Vec<RecordWriter<R>>, stats: Option<Arc<IterationStats>>) -> Self {
        let count = writers.len();
        Self {
            inner: Arc::new(Mutex::new(OutputSet { writers, stats })),
            count,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub async fn emit(&self, output: usize, record: R) -> Result<(), IterationError> {
        let mut guard = self.inner.lock().await;
        let outputs = guard.writers.len();
        let writer = guard
            .writers
            .get_mut(output)
            .ok_or(ConfigError::UnknownOutput { output, outputs })?;
        let written = writer.emit(record).await?;
        guard.record_out(written);
        Ok(())
    }

    /// Emit a record on every output channel
    pub async fn broadcast(&self, record: R) -> Result<(), IterationError> {
        let mut guard = self.inner.lock().await;
        let mut written = 0;
        if let Some((last, rest)) = guard.writers.split_last_mut() {
            for writer in rest {
                written += writer.emit(record.clone()).await?;
            }
            written += last.emit(record).await?;
        }
        guard.record_out(written);
        Ok(())
    }

    pub async fn flush_all(&self) -> Result<(), IterationError> {
        let mut guard = self.inner.lock().await;
        let mut written = 0;
        for writer in guard.writers.iter_mut() {
            written += writer.flush().await?;
        }
        guard.record_out(written);
        Ok(())
    }

    /// Flush every output channel, then append `event` to each of them
    pub async fn forward_to_all_outputs(&self, event: ControlEvent) -> Result<(), IterationError> {
        let mut guard = self.inner.lock().await;
        let mut written = 0;
        for writer in guard.writers.iter_mut() {
            written += writer.publish_event(event).await?;
        }
        guard.record_out(written);
        Ok(())
    }

    /// Records buffered but not yet written, per output
    pub async fn buffered(&self) -> Vec<usize> {
        let guard = self.inner.lock().await;
        guard.writers.iter().map(RecordWriter::buffered).collect()
    }
}
