use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bevy_ecs::prelude::Resource;

use crate::ecs::VehicleId;
use crate::registry::RequestId;

pub const ONE_SEC_MS: u64 = 1000;

/// Everything the dispatch core reacts to, in tie-break priority order:
/// at equal timestamps, execution events settle before a dispatch pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventKind {
    SimulationStarted,
    RequestSubmitted,
    TaskAdvance,
    MoveStep,
    ServeComplete,
    DispatchRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventSubject {
    Vehicle(VehicleId),
    Request(RequestId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub timestamp: u64,
    pub kind: EventKind,
    pub subject: Option<EventSubject>,
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering to make BinaryHeap a min-heap by timestamp,
        // then by kind and subject so equal-time pops are deterministic.
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| other.kind.cmp(&self.kind))
            .then_with(|| other.subject.cmp(&self.subject))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The event currently being processed; inserted by the runner before each step.
#[derive(Debug, Clone, Copy, Resource)]
pub struct CurrentEvent(pub Event);

#[derive(Debug, Default, Resource)]
pub struct SimulationClock {
    now: u64,
    events: BinaryHeap<Event>,
}

impl SimulationClock {
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn schedule_at(&mut self, timestamp: u64, kind: EventKind, subject: Option<EventSubject>) {
        debug_assert!(
            timestamp >= self.now,
            "event timestamp must be >= current time"
        );
        self.events.push(Event {
            timestamp,
            kind,
            subject,
        });
    }

    pub fn schedule_in(&mut self, delay_ms: u64, kind: EventKind, subject: Option<EventSubject>) {
        self.schedule_at(self.now + delay_ms, kind, subject);
    }

    pub fn pop_next(&mut self) -> Option<Event> {
        let event = self.events.pop()?;
        self.now = event.timestamp;
        Some(event)
    }

    pub fn next_event_time(&self) -> Option<u64> {
        self.events.peek().map(|e| e.timestamp)
    }

    pub fn pending_event_count(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
