//! Mentor Escrow - High-level API for the marketplace engine
//!
//! Wires the registry, ledger, vault and event log together and exposes
//! the caller-facing operations. Every operation takes the authenticated
//! caller explicitly; the engine never infers identity.

use crate::{
    config::EngineConfig,
    events::{EventFilter, EventLog, EventPage, LedgerEvent},
    ledger::SessionLedger,
    models::{Amount, MentorDetails, Principal, SessionDetails, SessionId},
    registry::MentorRegistry,
    vault::{EscrowVault, LedgerGateway, PayoutGateway, TransferReceipt, VaultSnapshot},
    EscrowResult,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Main engine that coordinates all components
pub struct MentorEscrow {
    operator: Principal,
    registry: Arc<MentorRegistry>,
    ledger: Arc<SessionLedger>,
    vault: Arc<EscrowVault>,
    events: Arc<EventLog>,
}

impl MentorEscrow {
    /// Create an engine that pays out through an in-memory `LedgerGateway`
    pub fn new(config: EngineConfig) -> EscrowResult<Self> {
        Self::with_gateway(config, Arc::new(LedgerGateway::new()))
    }

    /// Create an engine with a custom payout rail
    pub fn with_gateway(
        config: EngineConfig,
        gateway: Arc<dyn PayoutGateway>,
    ) -> EscrowResult<Self> {
        config.validate()?;
        info!("Initializing mentor escrow engine");

        let events = Arc::new(EventLog::new(config.events));
        let registry = Arc::new(MentorRegistry::new(events.clone()));
        let vault = Arc::new(EscrowVault::new(
            config.vault,
            registry.clone(),
            events.clone(),
            gateway,
        ));
        let ledger = Arc::new(SessionLedger::new(
            config.ledger,
            registry.clone(),
            vault.clone(),
            events.clone(),
        ));

        info!("Mentor escrow engine initialized (operator {})", config.operator);

        Ok(Self {
            operator: Principal::new(config.operator),
            registry,
            ledger,
            vault,
            events,
        })
    }

    /// Marketplace operator principal
    pub fn owner(&self) -> &Principal {
        &self.operator
    }

    pub async fn register_mentor(
        &self,
        caller: &Principal,
        expertise: impl Into<String>,
        hourly_rate: Amount,
    ) -> EscrowResult<()> {
        self.registry
            .register_mentor(caller, expertise.into(), hourly_rate)
            .await
            .map(|_| ())
    }

    pub async fn update_availability(
        &self,
        caller: &Principal,
        is_available: bool,
    ) -> EscrowResult<()> {
        self.registry.update_availability(caller, is_available).await
    }

    pub async fn book_session(
        &self,
        caller: &Principal,
        mentor_address: &Principal,
        duration: u64,
        funds_supplied: Amount,
    ) -> EscrowResult<SessionId> {
        self.ledger
            .book_session(caller, mentor_address, duration, funds_supplied)
            .await
    }

    pub async fn complete_session(
        &self,
        caller: &Principal,
        session_id: SessionId,
    ) -> EscrowResult<()> {
        self.ledger.complete_session(caller, session_id).await
    }

    pub async fn withdraw_earnings(&self, caller: &Principal) -> EscrowResult<TransferReceipt> {
        self.vault.withdraw_earnings(caller).await
    }

    pub async fn get_mentor_details(&self, address: &Principal) -> EscrowResult<MentorDetails> {
        self.registry.get_mentor_details(address).await
    }

    pub async fn get_session_details(&self, session_id: SessionId) -> EscrowResult<SessionDetails> {
        self.ledger.get_session_details(session_id).await
    }

    pub async fn list_mentor_addresses(&self) -> Vec<Principal> {
        self.registry.list_mentor_addresses().await
    }

    pub async fn session_counter(&self) -> SessionId {
        self.ledger.session_counter().await
    }

    /// Sessions where the principal is mentor or mentee
    pub async fn sessions_for(&self, principal: &Principal) -> Vec<SessionDetails> {
        self.ledger.sessions_for(principal).await
    }

    /// Funds currently escrowed for a session
    pub async fn escrowed_for(&self, session_id: SessionId) -> Amount {
        self.vault.held_for(session_id).await
    }

    /// Vault totals for auditing fund conservation
    pub async fn vault_snapshot(&self) -> EscrowResult<VaultSnapshot> {
        self.vault.snapshot().await
    }

    /// Read recorded events from `from` onwards
    pub async fn events(&self, filter: &EventFilter, from: u64) -> EventPage {
        self.events.read(filter, from).await
    }

    /// Follow events as they are recorded
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EscrowError;

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.events.channel_capacity = 0;

        assert!(matches!(
            MentorEscrow::new(config),
            Err(EscrowError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_owner_from_config() {
        let config = EngineConfig {
            operator: "market".to_string(),
            ..EngineConfig::default()
        };
        let engine = MentorEscrow::new(config).unwrap();
        assert_eq!(engine.owner().as_str(), "market");
        assert_eq!(engine.session_counter().await, 0);
        assert!(engine.list_mentor_addresses().await.is_empty());
    }
}
