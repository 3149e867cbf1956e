//! Core data models for the escrow engine
//!
//! Mentor and session records, their read-only snapshots, and the
//! session state machine.

use crate::{error::EscrowError, EscrowResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Monetary amount in the smallest currency unit
pub type Amount = u64;

/// Sequential session identifier, starting at 1
pub type SessionId = u64;

/// Seconds since the Unix epoch
pub type Timestamp = i64;

/// Current time as seconds since the Unix epoch
pub fn now() -> Timestamp {
    Utc::now().timestamp()
}

/// Opaque, pre-authenticated caller identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Principal {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Session state machine enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Payment held in escrow, awaiting completion
    Booked,
    /// Payment released to the mentor's balance
    Completed,
}

impl SessionState {
    /// Check if this state allows completion
    pub fn can_complete(&self) -> bool {
        matches!(self, Self::Booked)
    }
}

/// Mentor record keyed by principal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mentor {
    pub address: Principal,
    pub expertise: String,
    pub hourly_rate: Amount,
    pub is_available: bool,
    pub balance: Amount,
    pub registered_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Mentor {
    /// Create a new mentor; newly registered mentors are available
    pub fn new(address: Principal, expertise: String, hourly_rate: Amount) -> Self {
        let at = now();
        Self {
            address,
            expertise,
            hourly_rate,
            is_available: true,
            balance: 0,
            registered_at: at,
            updated_at: at,
        }
    }

    /// Overwrite the profile from a re-registration, keeping balance and availability
    pub fn update_profile(&mut self, expertise: String, hourly_rate: Amount) {
        self.expertise = expertise;
        self.hourly_rate = hourly_rate;
        self.updated_at = now();
    }

    /// Price of a session of `duration` hours at the current rate
    pub fn quote(&self, duration: u64) -> EscrowResult<Amount> {
        duration.checked_mul(self.hourly_rate).ok_or_else(|| {
            EscrowError::amount_overflow(format!(
                "{} hours at rate {} exceeds representable amount",
                duration, self.hourly_rate
            ))
        })
    }

    /// Add released session funds to the withdrawable balance
    pub fn credit(&mut self, amount: Amount) -> EscrowResult<()> {
        self.balance = self.balance.checked_add(amount).ok_or_else(|| {
            EscrowError::amount_overflow(format!("balance of {} would overflow", self.address))
        })?;
        self.updated_at = now();
        Ok(())
    }

    /// Drain the whole balance, returning the drained amount
    pub fn debit_all(&mut self) -> Amount {
        let amount = self.balance;
        self.balance = 0;
        self.updated_at = now();
        amount
    }

    /// Undo `debit_all` after a failed payout
    pub fn restore_balance(&mut self, amount: Amount) {
        self.balance = amount;
        self.updated_at = now();
    }

    pub fn details(&self) -> MentorDetails {
        MentorDetails {
            expertise: self.expertise.clone(),
            hourly_rate: self.hourly_rate,
            is_available: self.is_available,
            balance: self.balance,
        }
    }
}

/// Read-only mentor snapshot returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentorDetails {
    pub expertise: String,
    pub hourly_rate: Amount,
    pub is_available: bool,
    pub balance: Amount,
}

/// A booked mentorship session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub mentor: Principal,
    pub mentee: Principal,
    pub start_time: Timestamp,
    /// Hours
    pub duration: u64,
    /// Fixed at booking; later rate changes do not affect it
    pub payment: Amount,
    pub state: SessionState,
    pub completed_at: Option<Timestamp>,
}

impl Session {
    pub fn new(
        id: SessionId,
        mentor: Principal,
        mentee: Principal,
        duration: u64,
        payment: Amount,
    ) -> Self {
        Self {
            id,
            mentor,
            mentee,
            start_time: now(),
            duration,
            payment,
            state: SessionState::Booked,
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed
    }

    /// Check whether the principal is the mentor or the mentee
    pub fn involves(&self, principal: &Principal) -> bool {
        &self.mentor == principal || &self.mentee == principal
    }

    /// Validate and apply the single Booked -> Completed transition
    pub fn mark_completed(&mut self, at: Timestamp) -> EscrowResult<()> {
        if !self.state.can_complete() {
            return Err(EscrowError::AlreadyCompleted(self.id));
        }
        self.state = SessionState::Completed;
        self.completed_at = Some(at);
        Ok(())
    }

    pub fn details(&self) -> SessionDetails {
        SessionDetails {
            id: self.id,
            mentor: self.mentor.clone(),
            mentee: self.mentee.clone(),
            start_time: self.start_time,
            duration: self.duration,
            payment: self.payment,
            is_completed: self.is_completed(),
        }
    }
}

/// Read-only session snapshot returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDetails {
    pub id: SessionId,
    pub mentor: Principal,
    pub mentee: Principal,
    pub start_time: Timestamp,
    pub duration: u64,
    pub payment: Amount,
    pub is_completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_mentor_is_available_with_empty_balance() {
        let mentor = Mentor::new("alice".into(), "Rust".to_string(), 10);
        assert!(mentor.is_available);
        assert_eq!(mentor.balance, 0);
    }

    #[test]
    fn test_quote_overflow() {
        let mentor = Mentor::new("alice".into(), "Rust".to_string(), u64::MAX);
        assert!(matches!(mentor.quote(2), Err(EscrowError::AmountOverflow(_))));
        assert_eq!(mentor.quote(1).unwrap(), u64::MAX);
    }

    #[test]
    fn test_session_completes_once() {
        let mut session = Session::new(1, "alice".into(), "bob".into(), 3, 30);
        assert!(!session.is_completed());

        session.mark_completed(now()).unwrap();
        assert!(session.is_completed());

        match session.mark_completed(now()) {
            Err(EscrowError::AlreadyCompleted(id)) => assert_eq!(id, 1),
            other => panic!("Expected AlreadyCompleted, got {:?}", other),
        }
    }

    #[test]
    fn test_session_involves_participants_only() {
        let session = Session::new(1, "alice".into(), "bob".into(), 1, 10);
        assert!(session.involves(&"alice".into()));
        assert!(session.involves(&"bob".into()));
        assert!(!session.involves(&"carol".into()));
    }
}
