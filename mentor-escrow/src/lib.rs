//! Escrow and session-lifecycle engine for a paid mentorship marketplace
//!
//! This crate implements the bookkeeping behind mentor sessions:
//! - Mentor registry with profiles and withdrawable balances
//! - Session ledger that books and completes paid sessions
//! - Escrow vault that holds session payments until completion
//! - Append-only event log for external observers

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod models;
pub mod registry;
pub mod vault;

pub use crate::config::EngineConfig;
pub use engine::MentorEscrow;
pub use error::EscrowError;
pub use events::{EventFilter, EventKind, LedgerEvent};
pub use models::{Amount, MentorDetails, Principal, SessionDetails, SessionId};
pub use vault::{LedgerGateway, PayoutGateway, TransferReceipt, VaultSnapshot};

/// Result type alias for escrow operations
pub type EscrowResult<T> = Result<T, EscrowError>;
