//! Replay buffer for cached input.
//!
//! A worker at the source of a feedback loop reads its seed once. The first round
//! caches every record while handing it to the operator; later rounds replay the cache
//! in the same order.

use tokio::sync::mpsc;

use crate::channel::Payload;

pub struct ReplayBuffer<R> {
    seed: Option<mpsc::Receiver<R>>,
    records: Vec<R>,
    cursor: usize,
}

impl<R: Payload> ReplayBuffer<R> {
    pub fn new(seed: mpsc::Receiver<R>) -> Self {
        Self {
            seed: Some(seed),
            records: Vec::new(),
            cursor: 0,
        }
    }

    /// True once the seed is fully consumed
    pub fn is_sealed(&self) -> bool {
        self.seed.is_none()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Prepare for round `round`. Later rounds finish any seed records the first round
    /// left unread before rewinding.
    pub async fn begin_round(&mut self, round: u64) {
        if round == 0 {
            return;
        }
        if let Some(mut seed) = self.seed.take() {
            while let Some(record) = seed.recv().await {
                self.records.push(record);
            }
        }
        self.cursor = 0;
    }

    /// Next record of the current round, `None` once the round's input is used up
    pub async fn next(&mut self) -> Option<R> {
        if let Some(seed) = self.seed.as_mut() {
            match seed.recv().await {
                Some(record) => {
                    self.records.push(record.clone());
                    self.cursor = self.records.len();
                    return Some(record);
                }
                None => {
                    self.seed = None;
                    return None;
                }
            }
        }
        let record = self.records.get(self.cursor).cloned();
        if record.is_some() {
            self.cursor += 1;
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_round_caches_and_later_rounds_replay() {
        let (tx, rx) = mpsc::channel(8);
        for value in [3u32, 1, 2] {
            tx.send(value).await.unwrap();
        }
        drop(tx);

        let mut buffer = ReplayBuffer::new(rx);
        buffer.begin_round(0).await;
        let mut first = Vec::new();
        while let Some(record) = buffer.next().await {
            first.push(record);
        }
        assert_eq!(first, vec![3, 1, 2]);
        assert!(buffer.is_sealed());

        for round in 1..3 {
            buffer.begin_round(round).await;
            let mut replayed = Vec::new();
            while let Some(record) = buffer.next().await {
                replayed.push(record);
            }
            assert_eq!(replayed, first);
        }
    }

    #[tokio::test]
    async fn unread_seed_is_completed_before_replay() {
        let (tx, rx) = mpsc::channel(8);
        for value in [5u32, 6, 7] {
            tx.send(value).await.unwrap();
        }
        drop(tx);

        let mut buffer = ReplayBuffer::new(rx);
        assert_eq!(buffer.next().await, Some(5));

        buffer.begin_round(1).await;
        assert!(buffer.is_sealed());
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.next().await, Some(5));
        assert_eq!(buffer.next().await, Some(6));
        assert_eq!(buffer.next().await, Some(7));
        assert_eq!(buffer.next().await, None);
    }
}
