//! Error types for the escrow engine
//!
//! Every failure is synchronous and local. Validation always runs before
//! mutation, so an error never leaves a partially applied change behind.

use crate::models::{Amount, Principal, SessionId};
use thiserror::Error;
use uuid::Uuid;

/// Main error type for escrow operations
#[derive(Error, Debug)]
pub enum EscrowError {
    /// Unknown mentor or session
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller has no mentor record where one is required
    #[error("Principal {0} is not a registered mentor")]
    NotRegistered(Principal),

    /// Mentor exists but is not accepting bookings
    #[error("Mentor {0} is not available")]
    MentorUnavailable(Principal),

    /// Session duration is zero or above the configured cap
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// Mentee and mentor are the same principal
    #[error("Principal {0} cannot book a session with themselves")]
    SelfBooking(Principal),

    /// Supplied funds do not cover the session payment
    #[error("Insufficient funds: required {required}, supplied {supplied}")]
    InsufficientFunds { required: Amount, supplied: Amount },

    /// Supplied funds exceed the session payment
    #[error("Excess funds: required {required}, supplied {supplied}")]
    ExcessFunds { required: Amount, supplied: Amount },

    /// Wrong caller for a mentor-only action
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Session has already been marked completed
    #[error("Session {0} is already completed")]
    AlreadyCompleted(SessionId),

    /// Mentor balance is zero
    #[error("Mentor {0} has nothing to withdraw")]
    NothingToWithdraw(Principal),

    /// Outbound fund movement could not be completed
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Payout was handed to the gateway but not answered in time
    #[error("Transfer {transfer_id} of {amount} is still pending")]
    TransferPending { transfer_id: Uuid, amount: Amount },

    /// Monetary arithmetic left the representable range
    #[error("Amount overflow: {0}")]
    AmountOverflow(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// General internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EscrowError {
    /// Create a not found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid duration error
    pub fn invalid_duration<S: Into<String>>(msg: S) -> Self {
        Self::InvalidDuration(msg.into())
    }

    /// Create an unauthorized error
    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Create a transfer failure
    pub fn transfer_failed<S: Into<String>>(msg: S) -> Self {
        Self::TransferFailed(msg.into())
    }

    /// Create an amount overflow error
    pub fn amount_overflow<S: Into<String>>(msg: S) -> Self {
        Self::AmountOverflow(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<config::ConfigError> for EscrowError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
