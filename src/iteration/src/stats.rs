use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::event::EventKind;

static ITERATION_ROUNDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "iteration_rounds_total",
        "Supersteps completed by iteration workers",
        &["task_id"]
    )
    .expect("create iteration rounds counter vec")
});

static ITERATION_RECORDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "iteration_records_total",
        "Records read or written by iteration workers",
        &["task_id", "direction"]
    )
    .expect("create iteration records counter vec")
});

static ITERATION_CONTROL_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "iteration_control_events_total",
        "Control events received, forwarded or synthesized by iteration workers",
        &["task_id", "event", "action"]
    )
    .expect("create iteration control events counter vec")
});

static ITERATION_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "iteration_errors_total",
        "Fatal errors observed by iteration workers",
        &["task_id", "kind"]
    )
    .expect("create iteration errors counter vec")
});

/// What happened to a control event at this worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Received,
    /// Forwarded by a consensus action
    Forwarded,
    /// Produced by the worker itself (cached input)
    Synthesized,
}

impl EventAction {
    fn slot(self) -> usize {
        match self {
            EventAction::Received => 0,
            EventAction::Forwarded => 1,
            EventAction::Synthesized => 2,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            EventAction::Received => "received",
            EventAction::Forwarded => "forwarded",
            EventAction::Synthesized => "synthesized",
        }
    }
}

#[derive(Debug)]
pub struct IterationStats {
    task_id: Arc<str>,
    rounds_completed: AtomicU64,
    instantiations: AtomicU64,
    records_in: AtomicU64,
    records_out: AtomicU64,
    // indexed by [EventKind slot][EventAction slot]
    events: [[AtomicU64; 3]; 2],
    error_count: AtomicU64,
    last_error: RwLock<Option<Arc<str>>>,
}

impl IterationStats {
    pub fn new(task_id: impl Into<Arc<str>>) -> Self {
        Self {
            task_id: task_id.into(),
            rounds_completed: AtomicU64::new(0),
            instantiations: AtomicU64::new(0),
            records_in: AtomicU64::new(0),
            records_out: AtomicU64::new(0),
            events: Default::default(),
            error_count: AtomicU64::new(0),
            last_error: RwLock::new(None),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn record_round(&self) {
        self.rounds_completed.fetch_add(1, Ordering::Relaxed);
        ITERATION_ROUNDS_TOTAL
            .with_label_values(&[self.task_id.as_ref()])
            .inc();
    }

    pub fn record_instantiation(&self) {
        self.instantiations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_in(&self, records: u64) {
        self.records_in.fetch_add(records, Ordering::Relaxed);
        ITERATION_RECORDS_TOTAL
            .with_label_values(&[self.task_id.as_ref(), "in"])
            .inc_by(records);
    }

    pub fn record_out(&self, records: u64) {
        self.records_out.fetch_add(records, Ordering::Relaxed);
        ITERATION_RECORDS_TOTAL
            .with_label_values(&[self.task_id.as_ref(), "out"])
            .inc_by(records);
    }

    pub fn record_event_received(&self, kind: EventKind) {
        self.record_event(kind, EventAction::Received);
    }

    pub fn record_event(&self, kind: EventKind, action: EventAction) {
        self.events[kind.slot()][action.slot()].fetch_add(1, Ordering::Relaxed);
        ITERATION_CONTROL_EVENTS_TOTAL
            .with_label_values(&[self.task_id.as_ref(), kind.as_str(), action.as_str()])
            .inc();
    }

    pub fn events(&self, kind: EventKind, action: EventAction) -> u64 {
        self.events[kind.slot()][action.slot()].load(Ordering::Relaxed)
    }

    pub fn record_error(&self, kind: &str, message: impl Into<String>) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        ITERATION_ERRORS_TOTAL
            .with_label_values(&[self.task_id.as_ref(), kind])
            .inc();
        let message: String = message.into();
        let mut guard = self
            .last_error
            .write()
            .expect("IterationStats error lock poisoned");
        *guard = Some(Arc::<str>::from(message));
    }

    pub fn snapshot(&self) -> IterationStatsSnapshot {
        let last_error = self
            .last_error
            .read()
            .expect("IterationStats error lock poisoned")
            .as_deref()
            .map(ToString::to_string);
        let events = |kind: EventKind| EventCounts {
            received: self.events(kind, EventAction::Received),
            forwarded: self.events(kind, EventAction::Forwarded),
            synthesized: self.events(kind, EventAction::Synthesized),
        };
        IterationStatsSnapshot {
            rounds_completed: self.rounds_completed.load(Ordering::Relaxed),
            instantiations: self.instantiations.load(Ordering::Relaxed),
            records_in: self.records_in.load(Ordering::Relaxed),
            records_out: self.records_out.load(Ordering::Relaxed),
            end_of_superstep: events(EventKind::EndOfSuperstep),
            termination: events(EventKind::Termination),
            error_count: self.error_count.load(Ordering::Relaxed),
            last_error,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventCounts {
    pub received: u64,
    pub forwarded: u64,
    pub synthesized: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IterationStatsSnapshot {
    pub rounds_completed: u64,
    pub instantiations: u64,
    pub records_in: u64,
    pub records_out: u64,
    pub end_of_superstep: EventCounts,
    pub termination: EventCounts,
    pub error_count: u64,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_activity() {
        let stats = IterationStats::new("stats_test");
        stats.record_round();
        stats.record_instantiation();
        stats.record_in(4);
        stats.record_out(3);
        stats.record_event_received(EventKind::EndOfSuperstep);
        stats.record_event(EventKind::EndOfSuperstep, EventAction::Forwarded);
        stats.record_event(EventKind::Termination, EventAction::Synthesized);
        stats.record_error("operator", "boom");

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.rounds_completed, 1);
        assert_eq!(snapshot.instantiations, 1);
        assert_eq!(snapshot.records_in, 4);
        assert_eq!(snapshot.records_out, 3);
        assert_eq!(
            snapshot.end_of_superstep,
            EventCounts {
                received: 1,
                forwarded: 1,
                synthesized: 0
            }
        );
        assert_eq!(snapshot.termination.synthesized, 1);
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.last_error.as_deref(), Some("boom"));
    }
}
