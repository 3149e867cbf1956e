//! Session Ledger - Books and completes paid mentorship sessions
//!
//! Booking locks the mentor record so rate and availability cannot change
//! underneath it, then assigns the next id under the counter lock.
//! Completion locks the session, then the mentor, and moves the escrowed
//! payment into the mentor's balance in the same step.
//!
//! Lock order: session -> mentor -> counter -> vault / session map.

use crate::{
    config::LedgerConfig,
    error::EscrowError,
    events::{EventKind, EventLog, NewEvent},
    models::{now, Amount, Principal, Session, SessionDetails, SessionId},
    registry::MentorRegistry,
    vault::EscrowVault,
    EscrowResult,
};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Shared handle to a single session record
type SessionRecord = Arc<Mutex<Session>>;

/// Ledger of all booked sessions
pub struct SessionLedger {
    config: LedgerConfig,
    sessions: RwLock<HashMap<SessionId, SessionRecord>>,
    /// Highest assigned session id
    counter: Mutex<SessionId>,
    registry: Arc<MentorRegistry>,
    vault: Arc<EscrowVault>,
    events: Arc<EventLog>,
}

impl SessionLedger {
    pub fn new(
        config: LedgerConfig,
        registry: Arc<MentorRegistry>,
        vault: Arc<EscrowVault>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            counter: Mutex::new(0),
            registry,
            vault,
            events,
        }
    }

    /// Book a session with a mentor, escrowing exactly `duration * hourly_rate`
    pub async fn book_session(
        &self,
        caller: &Principal,
        mentor_address: &Principal,
        duration: u64,
        funds_supplied: Amount,
    ) -> EscrowResult<SessionId> {
        let record = self.registry.record(mentor_address).await.ok_or_else(|| {
            EscrowError::not_found(format!("Mentor {} not found", mentor_address))
        })?;
        let mentor = record.lock().await;

        if !mentor.is_available {
            return Err(EscrowError::MentorUnavailable(mentor_address.clone()));
        }
        self.validate_duration(duration)?;
        if caller == mentor_address {
            warn!("Rejected self-booking by {}", caller);
            return Err(EscrowError::SelfBooking(caller.clone()));
        }

        let payment = mentor.quote(duration)?;
        if funds_supplied < payment {
            return Err(EscrowError::InsufficientFunds {
                required: payment,
                supplied: funds_supplied,
            });
        }
        if funds_supplied > payment {
            return Err(EscrowError::ExcessFunds {
                required: payment,
                supplied: funds_supplied,
            });
        }

        // Narrow critical section: the id is only consumed once the booking is in place
        let mut counter = self.counter.lock().await;
        let session_id = *counter + 1;
        let session = Session::new(
            session_id,
            mentor_address.clone(),
            caller.clone(),
            duration,
            payment,
        );

        self.vault.hold(session_id, payment).await?;
        self.sessions
            .write()
            .await
            .insert(session_id, Arc::new(Mutex::new(session.clone())));
        *counter = session_id;

        self.events
            .append(
                NewEvent::new(EventKind::SessionBooked, session.mentor.clone())
                    .mentee(session.mentee.clone())
                    .session(session_id)
                    .amount(payment)
                    .details(serde_json::json!({
                        "start_time": session.start_time,
                        "duration": duration
                    })),
            )
            .await;
        drop(counter);

        info!(
            "Booked session {} ({} -> {}, {}h, payment {})",
            session_id, caller, mentor_address, duration, payment
        );

        Ok(session_id)
    }

    /// Mark a session completed and release its payment to the mentor
    pub async fn complete_session(
        &self,
        caller: &Principal,
        session_id: SessionId,
    ) -> EscrowResult<()> {
        let record = self.record(session_id).await?;
        let mut session = record.lock().await;

        if &session.mentor != caller {
            warn!(
                "Rejected completion of session {} by {}",
                session_id, caller
            );
            return Err(EscrowError::unauthorized(format!(
                "Only the mentor can complete session {}",
                session_id
            )));
        }
        if !session.state.can_complete() {
            return Err(EscrowError::AlreadyCompleted(session_id));
        }

        let mentor_record = self.registry.record(&session.mentor).await.ok_or_else(|| {
            EscrowError::internal(format!(
                "Mentor {} of session {} is missing",
                session.mentor, session_id
            ))
        })?;
        let mut mentor = mentor_record.lock().await;

        let released = self.vault.release(session_id).await?;
        if let Err(err) = mentor.credit(released) {
            self.vault.restore(session_id, released).await;
            return Err(err);
        }
        let completed_at = now();
        session.mark_completed(completed_at)?;

        self.events
            .append(
                NewEvent::new(EventKind::SessionCompleted, session.mentor.clone())
                    .mentee(session.mentee.clone())
                    .session(session_id)
                    .details(serde_json::json!({ "timestamp": completed_at })),
            )
            .await;
        self.events
            .append(
                NewEvent::new(EventKind::PaymentReleased, session.mentor.clone())
                    .session(session_id)
                    .amount(released),
            )
            .await;

        info!(
            "Completed session {}; released {} to {}",
            session_id, released, session.mentor
        );

        Ok(())
    }

    /// Snapshot of a session
    pub async fn get_session_details(&self, session_id: SessionId) -> EscrowResult<SessionDetails> {
        let details = self.record(session_id).await?.lock().await.details();
        debug!("Read session {}", session_id);
        Ok(details)
    }

    /// Highest assigned session id, 0 if none
    pub async fn session_counter(&self) -> SessionId {
        *self.counter.lock().await
    }

    /// Sessions where the principal is mentor or mentee, ordered by id
    pub async fn sessions_for(&self, principal: &Principal) -> Vec<SessionDetails> {
        let records: Vec<SessionRecord> = self.sessions.read().await.values().cloned().collect();

        let mut sessions = Vec::new();
        for record in records {
            let session = record.lock().await;
            if session.involves(principal) {
                sessions.push(session.details());
            }
        }
        sessions.sort_by_key(|session| session.id);
        sessions
    }

    async fn record(&self, session_id: SessionId) -> EscrowResult<SessionRecord> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or_else(|| EscrowError::not_found(format!("Session {} not found", session_id)))
    }

    fn validate_duration(&self, duration: u64) -> EscrowResult<()> {
        if duration == 0 {
            return Err(EscrowError::invalid_duration(
                "Duration must be greater than 0",
            ));
        }

        if let Some(max) = self.config.max_session_hours {
            if duration > max {
                return Err(EscrowError::invalid_duration(format!(
                    "Duration {}h exceeds maximum {}h",
                    duration, max
                )));
            }
        }

        Ok(())
    }
}
