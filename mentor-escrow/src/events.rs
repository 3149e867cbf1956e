//! Event Log - Append-only audit trail of state changes
//!
//! Every successful mutation in the engine appends one or more events
//! here. The log never gates correctness; it only records what happened
//! so UIs and auditors can replay or follow it.

use crate::{
    config::EventLogConfig,
    models::{now, Amount, Principal, SessionId, Timestamp},
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Kinds of recorded events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    MentorRegistered,
    AvailabilityUpdated,
    SessionBooked,
    SessionCompleted,
    PaymentReleased,
    EarningsWithdrawn,
}

/// Immutable event record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Position in the log, starting at 0
    pub sequence: u64,
    pub kind: EventKind,
    pub mentor: Principal,
    pub mentee: Option<Principal>,
    pub session_id: Option<SessionId>,
    pub amount: Option<Amount>,
    pub details: serde_json::Value,
    pub timestamp: Timestamp,
}

impl LedgerEvent {
    /// Check whether the principal took part in this event
    pub fn involves(&self, principal: &Principal) -> bool {
        &self.mentor == principal || self.mentee.as_ref() == Some(principal)
    }
}

/// Event about to be appended; the log assigns sequence and timestamp
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub kind: EventKind,
    pub mentor: Principal,
    pub mentee: Option<Principal>,
    pub session_id: Option<SessionId>,
    pub amount: Option<Amount>,
    pub details: serde_json::Value,
}

impl NewEvent {
    pub fn new(kind: EventKind, mentor: Principal) -> Self {
        Self {
            kind,
            mentor,
            mentee: None,
            session_id: None,
            amount: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn mentee(mut self, mentee: Principal) -> Self {
        self.mentee = Some(mentee);
        self
    }

    pub fn session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn amount(mut self, amount: Amount) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Selects events by kind and/or participant
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub kind: Option<EventKind>,
    pub participant: Option<Principal>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn kind(kind: EventKind) -> Self {
        Self {
            kind: Some(kind),
            participant: None,
        }
    }

    pub fn participant(principal: Principal) -> Self {
        Self {
            kind: None,
            participant: Some(principal),
        }
    }

    pub fn matches(&self, event: &LedgerEvent) -> bool {
        self.kind.map_or(true, |kind| event.kind == kind)
            && self
                .participant
                .as_ref()
                .map_or(true, |principal| event.involves(principal))
    }
}

/// A page of matching events plus the offset to resume from
#[derive(Debug, Clone)]
pub struct EventPage {
    pub events: Vec<LedgerEvent>,
    pub next_offset: u64,
}

/// Append-only event log
pub struct EventLog {
    events: RwLock<Vec<LedgerEvent>>,
    feed: broadcast::Sender<LedgerEvent>,
}

impl EventLog {
    pub fn new(config: EventLogConfig) -> Self {
        let (feed, _) = broadcast::channel(config.channel_capacity);
        Self {
            events: RwLock::new(Vec::new()),
            feed,
        }
    }

    /// Append an event and publish it to live subscribers
    pub async fn append(&self, event: NewEvent) -> LedgerEvent {
        let mut events = self.events.write().await;
        let recorded = LedgerEvent {
            sequence: events.len() as u64,
            kind: event.kind,
            mentor: event.mentor,
            mentee: event.mentee,
            session_id: event.session_id,
            amount: event.amount,
            details: event.details,
            timestamp: now(),
        };
        events.push(recorded.clone());

        // No subscribers is not an error
        let _ = self.feed.send(recorded.clone());

        debug!("Appended event {} ({:?})", recorded.sequence, recorded.kind);
        recorded
    }

    /// Read matching events starting at `from`; pass `next_offset` back to resume
    pub async fn read(&self, filter: &EventFilter, from: u64) -> EventPage {
        let events = self.events.read().await;
        let start = (from as usize).min(events.len());
        EventPage {
            events: events[start..]
                .iter()
                .filter(|event| filter.matches(event))
                .cloned()
                .collect(),
            next_offset: events.len() as u64,
        }
    }

    /// Follow events as they are appended
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.feed.subscribe()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(EventLogConfig::default())
    }
}
