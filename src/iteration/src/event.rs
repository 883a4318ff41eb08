//! Stream data types exchanged between iteration workers
//!
//! Records and control events share the same physical channel. Control events act as
//! epoch markers: a consumer observes them only after every record sent before them.

use serde::{Deserialize, Serialize};

/// Kind of a control event, used as the key for listeners and counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    EndOfSuperstep,
    Termination,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::EndOfSuperstep, EventKind::Termination];

    pub(crate) fn slot(self) -> usize {
        match self {
            EventKind::EndOfSuperstep => 0,
            EventKind::Termination => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::EndOfSuperstep => "end_of_superstep",
            EventKind::Termination => "termination",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Out-of-band control events carried in-band with records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlEvent {
    /// One round of the iteration body finished producing records on this flow
    EndOfSuperstep,
    /// The iteration converged and every worker must stop
    Termination,
}

impl ControlEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ControlEvent::EndOfSuperstep => EventKind::EndOfSuperstep,
            ControlEvent::Termination => EventKind::Termination,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ControlEvent::Termination)
    }
}

impl From<EventKind> for ControlEvent {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::EndOfSuperstep => ControlEvent::EndOfSuperstep,
            EventKind::Termination => ControlEvent::Termination,
        }
    }
}

/// Item carried by a physical channel
#[derive(Debug, Clone, PartialEq)]
pub enum StreamData<R> {
    /// Ordinary data record
    Record(R),
    /// Control event interleaved with the records
    Event(ControlEvent),
}

impl<R> StreamData<R> {
    pub fn record(record: R) -> Self {
        StreamData::Record(record)
    }

    pub fn event(event: ControlEvent) -> Self {
        StreamData::Event(event)
    }

    pub fn end_of_superstep() -> Self {
        StreamData::Event(ControlEvent::EndOfSuperstep)
    }

    pub fn termination() -> Self {
        StreamData::Event(ControlEvent::Termination)
    }

    pub fn is_record(&self) -> bool {
        matches!(self, StreamData::Record(_))
    }

    pub fn is_event(&self) -> bool {
        matches!(self, StreamData::Event(_))
    }

    pub fn as_record(&self) -> Option<&R> {
        match self {
            StreamData::Record(record) => Some(record),
            StreamData::Event(_) => None,
        }
    }

    pub fn as_event(&self) -> Option<ControlEvent> {
        match self {
            StreamData::Event(event) => Some(*event),
            StreamData::Record(_) => None,
        }
    }

    pub fn into_record(self) -> Option<R> {
        match self {
            StreamData::Record(record) => Some(record),
            StreamData::Event(_) => None,
        }
    }
}
