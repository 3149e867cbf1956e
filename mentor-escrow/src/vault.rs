//! Escrow Vault - Holds session payments and pays out mentor earnings
//!
//! Funds enter the vault when a session is booked and stay earmarked for
//! that session until it completes, at which point they move into the
//! mentor's balance. Withdrawals drain a balance into a pending payout
//! that is settled by the `PayoutGateway`'s answer: a receipt marks it
//! withdrawn, a definite failure returns it to the mentor's balance.

use crate::{
    config::VaultConfig,
    error::EscrowError,
    events::{EventKind, EventLog, NewEvent},
    models::{Amount, Principal, SessionId},
    registry::MentorRegistry,
    EscrowResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Proof of a completed outbound transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub id: Uuid,
    pub recipient: Principal,
    pub amount: Amount,
    pub transferred_at: DateTime<Utc>,
}

/// Rail that moves withdrawn funds out of the engine
///
/// `Err` must mean the transfer definitely did not happen; the vault
/// returns the funds to the mentor's balance on it. A call is never
/// cancelled by the vault, however long it takes to answer.
#[async_trait]
pub trait PayoutGateway: Send + Sync {
    async fn transfer(
        &self,
        transfer_id: Uuid,
        recipient: &Principal,
        amount: Amount,
    ) -> anyhow::Result<TransferReceipt>;
}

/// In-memory gateway that records every payout
#[derive(Default)]
pub struct LedgerGateway {
    receipts: RwLock<Vec<TransferReceipt>>,
}

impl LedgerGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total paid out to a recipient
    pub async fn paid_to(&self, recipient: &Principal) -> Amount {
        self.receipts
            .read()
            .await
            .iter()
            .filter(|receipt| &receipt.recipient == recipient)
            .map(|receipt| receipt.amount)
            .sum()
    }
}

#[async_trait]
impl PayoutGateway for LedgerGateway {
    async fn transfer(
        &self,
        transfer_id: Uuid,
        recipient: &Principal,
        amount: Amount,
    ) -> anyhow::Result<TransferReceipt> {
        let receipt = TransferReceipt {
            id: transfer_id,
            recipient: recipient.clone(),
            amount,
            transferred_at: Utc::now(),
        };
        self.receipts.write().await.push(receipt.clone());
        Ok(receipt)
    }
}

/// Point-in-time view of vault totals
///
/// Taken with every mentor record and the vault state locked, so
/// `held + balances + pending == deposited - withdrawn` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSnapshot {
    /// Funds earmarked for sessions not yet completed
    pub held: Amount,
    /// Funds credited to mentor balances
    pub balances: Amount,
    /// Funds debited for payouts the gateway has not answered yet
    pub pending: Amount,
    /// Funds ever accepted at booking
    pub deposited: Amount,
    /// Funds ever paid out
    pub withdrawn: Amount,
}

impl VaultSnapshot {
    pub fn is_conserved(&self) -> bool {
        self.held
            .checked_add(self.balances)
            .and_then(|sum| sum.checked_add(self.pending))
            == self.deposited.checked_sub(self.withdrawn)
    }
}

#[derive(Debug, Clone)]
struct PendingPayout {
    recipient: Principal,
    amount: Amount,
}

#[derive(Debug, Default)]
struct VaultState {
    holds: HashMap<SessionId, Amount>,
    pending: HashMap<Uuid, PendingPayout>,
    deposited: Amount,
    withdrawn: Amount,
}

/// Escrow vault tracking held session funds and payouts
pub struct EscrowVault {
    config: VaultConfig,
    state: Mutex<VaultState>,
    registry: Arc<MentorRegistry>,
    events: Arc<EventLog>,
    gateway: Arc<dyn PayoutGateway>,
}

impl EscrowVault {
    pub fn new(
        config: VaultConfig,
        registry: Arc<MentorRegistry>,
        events: Arc<EventLog>,
        gateway: Arc<dyn PayoutGateway>,
    ) -> Self {
        Self {
            config,
            state: Mutex::new(VaultState::default()),
            registry,
            events,
            gateway,
        }
    }

    /// Accept booking funds and earmark them for a session
    pub(crate) async fn hold(&self, session_id: SessionId, amount: Amount) -> EscrowResult<()> {
        let mut state = self.state.lock().await;
        if state.holds.contains_key(&session_id) {
            return Err(EscrowError::internal(format!(
                "Session {} already has escrowed funds",
                session_id
            )));
        }
        let deposited = state
            .deposited
            .checked_add(amount)
            .ok_or_else(|| EscrowError::amount_overflow("total deposited funds"))?;

        state.deposited = deposited;
        state.holds.insert(session_id, amount);
        Ok(())
    }

    /// Remove a session's earmark and return the released amount
    pub(crate) async fn release(&self, session_id: SessionId) -> EscrowResult<Amount> {
        self.state
            .lock()
            .await
            .holds
            .remove(&session_id)
            .ok_or_else(|| {
                EscrowError::internal(format!("No escrowed funds for session {}", session_id))
            })
    }

    /// Put back a hold taken out by `release` when the rest of the step failed
    pub(crate) async fn restore(&self, session_id: SessionId, amount: Amount) {
        self.state.lock().await.holds.insert(session_id, amount);
    }

    /// Funds currently held for a session, 0 once released
    pub async fn held_for(&self, session_id: SessionId) -> Amount {
        self.state
            .lock()
            .await
            .holds
            .get(&session_id)
            .copied()
            .unwrap_or(0)
    }

    /// Pay out the caller's entire balance
    ///
    /// The balance moves into a pending payout under the mentor's lock; the
    /// gateway call runs outside it in its own task. If the gateway has not
    /// answered within `transfer_timeout_ms` the caller gets
    /// `TransferPending` and the payout settles whenever the answer arrives.
    pub async fn withdraw_earnings(
        self: &Arc<Self>,
        caller: &Principal,
    ) -> EscrowResult<TransferReceipt> {
        let record = self
            .registry
            .record(caller)
            .await
            .ok_or_else(|| EscrowError::NotRegistered(caller.clone()))?;

        let transfer_id = Uuid::new_v4();
        let amount = {
            let mut mentor = record.lock().await;
            if mentor.balance == 0 {
                return Err(EscrowError::NothingToWithdraw(caller.clone()));
            }
            let amount = mentor.debit_all();
            self.state.lock().await.pending.insert(
                transfer_id,
                PendingPayout {
                    recipient: caller.clone(),
                    amount,
                },
            );
            amount
        };

        let vault = Arc::clone(self);
        let recipient = caller.clone();
        let mut payout = tokio::spawn(async move {
            let outcome = vault.gateway.transfer(transfer_id, &recipient, amount).await;
            vault.settle_payout(transfer_id, outcome).await
        });

        let wait = Duration::from_millis(self.config.transfer_timeout_ms);
        match tokio::time::timeout(wait, &mut payout).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => Err(EscrowError::internal(format!(
                "Payout task {} aborted: {}",
                transfer_id, err
            ))),
            Err(_) => {
                warn!(
                    "Payout {} of {} to {} still pending after {}ms",
                    transfer_id, amount, caller, self.config.transfer_timeout_ms
                );
                Err(EscrowError::TransferPending {
                    transfer_id,
                    amount,
                })
            }
        }
    }

    /// Apply the gateway's answer to a pending payout
    async fn settle_payout(
        &self,
        transfer_id: Uuid,
        outcome: anyhow::Result<TransferReceipt>,
    ) -> EscrowResult<TransferReceipt> {
        let payout = self
            .state
            .lock()
            .await
            .pending
            .get(&transfer_id)
            .cloned()
            .ok_or_else(|| {
                EscrowError::internal(format!("Payout {} is not pending", transfer_id))
            })?;

        match outcome {
            Ok(receipt) => {
                {
                    let mut state = self.state.lock().await;
                    state.pending.remove(&transfer_id);
                    state.withdrawn += payout.amount;
                }

                self.events
                    .append(
                        NewEvent::new(EventKind::EarningsWithdrawn, payout.recipient.clone())
                            .amount(payout.amount)
                            .details(serde_json::json!({ "transfer_id": transfer_id })),
                    )
                    .await;

                info!("Mentor {} withdrew {}", payout.recipient, payout.amount);
                Ok(receipt)
            }
            Err(err) => {
                let record = self.registry.record(&payout.recipient).await.ok_or_else(|| {
                    EscrowError::internal(format!("Mentor {} is missing", payout.recipient))
                })?;

                let mut mentor = record.lock().await;
                mentor.credit(payout.amount)?;
                self.state.lock().await.pending.remove(&transfer_id);

                warn!(
                    "Payout {} of {} to {} failed, balance restored: {}",
                    transfer_id, payout.amount, payout.recipient, err
                );
                Err(EscrowError::transfer_failed(err.to_string()))
            }
        }
    }

    /// Consistent totals across holds, balances and payouts
    pub async fn snapshot(&self) -> EscrowResult<VaultSnapshot> {
        let mentors = self.registry.lock_all().await;
        let state = self.state.lock().await;

        Ok(VaultSnapshot {
            held: state.holds.values().sum(),
            balances: mentors.total_balances()?,
            pending: state.pending.values().map(|payout| payout.amount).sum(),
            deposited: state.deposited,
            withdrawn: state.withdrawn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventFilter;

    struct RejectingGateway;

    #[async_trait]
    impl PayoutGateway for RejectingGateway {
        async fn transfer(
            &self,
            _transfer_id: Uuid,
            _recipient: &Principal,
            _amount: Amount,
        ) -> anyhow::Result<TransferReceipt> {
            anyhow::bail!("recipient account closed")
        }
    }

    /// Commits the payout immediately but acknowledges a minute later
    struct SlowAckGateway {
        ledger: LedgerGateway,
    }

    #[async_trait]
    impl PayoutGateway for SlowAckGateway {
        async fn transfer(
            &self,
            transfer_id: Uuid,
            recipient: &Principal,
            amount: Amount,
        ) -> anyhow::Result<TransferReceipt> {
            let receipt = self.ledger.transfer(transfer_id, recipient, amount).await?;
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(receipt)
        }
    }

    /// Rejects the payout a minute after it was requested
    struct SlowRejectGateway;

    #[async_trait]
    impl PayoutGateway for SlowRejectGateway {
        async fn transfer(
            &self,
            _transfer_id: Uuid,
            _recipient: &Principal,
            _amount: Amount,
        ) -> anyhow::Result<TransferReceipt> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            anyhow::bail!("rail rejected payout")
        }
    }

    fn vault_with(
        gateway: Arc<dyn PayoutGateway>,
        timeout_ms: u64,
    ) -> (Arc<EscrowVault>, Arc<MentorRegistry>, Arc<EventLog>) {
        let events = Arc::new(EventLog::default());
        let registry = Arc::new(MentorRegistry::new(events.clone()));
        let vault = Arc::new(EscrowVault::new(
            VaultConfig {
                transfer_timeout_ms: timeout_ms,
            },
            registry.clone(),
            events.clone(),
            gateway,
        ));
        (vault, registry, events)
    }

    /// Register a mentor and move `amount` through a hold into their balance
    async fn fund_mentor(
        vault: &EscrowVault,
        registry: &MentorRegistry,
        mentor: &Principal,
        session_id: SessionId,
        amount: Amount,
    ) {
        registry
            .register_mentor(mentor, "Rust".to_string(), 10)
            .await
            .unwrap();
        vault.hold(session_id, amount).await.unwrap();
        let released = vault.release(session_id).await.unwrap();
        registry
            .record(mentor)
            .await
            .unwrap()
            .lock()
            .await
            .credit(released)
            .unwrap();
    }

    #[tokio::test]
    async fn test_hold_and_release() {
        let (vault, _, _) = vault_with(Arc::new(LedgerGateway::new()), 1000);

        vault.hold(1, 30).await.unwrap();
        assert_eq!(vault.held_for(1).await, 30);
        assert!(matches!(vault.hold(1, 30).await, Err(EscrowError::Internal(_))));

        assert_eq!(vault.release(1).await.unwrap(), 30);
        assert_eq!(vault.held_for(1).await, 0);
        assert!(matches!(vault.release(1).await, Err(EscrowError::Internal(_))));
    }

    #[tokio::test]
    async fn test_withdraw_pays_out_full_balance() {
        let gateway = Arc::new(LedgerGateway::new());
        let (vault, registry, events) = vault_with(gateway.clone(), 1000);
        let alice = Principal::from("alice");
        fund_mentor(&vault, &registry, &alice, 1, 30).await;

        let receipt = vault.withdraw_earnings(&alice).await.unwrap();

        assert_eq!(receipt.amount, 30);
        assert_eq!(gateway.paid_to(&alice).await, 30);
        assert_eq!(registry.get_mentor_details(&alice).await.unwrap().balance, 0);

        let snapshot = vault.snapshot().await.unwrap();
        assert_eq!(snapshot.withdrawn, 30);
        assert_eq!(snapshot.pending, 0);
        assert!(snapshot.is_conserved());

        let withdrawals = events
            .read(&EventFilter::kind(EventKind::EarningsWithdrawn), 0)
            .await;
        assert_eq!(withdrawals.events.len(), 1);
        assert_eq!(withdrawals.events[0].amount, Some(30));
    }

    #[tokio::test]
    async fn test_withdraw_requires_registration_and_balance() {
        let (vault, registry, _) = vault_with(Arc::new(LedgerGateway::new()), 1000);

        let result = vault.withdraw_earnings(&"bob".into()).await;
        assert!(matches!(result, Err(EscrowError::NotRegistered(_))));

        registry
            .register_mentor(&"bob".into(), "Go".to_string(), 5)
            .await
            .unwrap();
        let result = vault.withdraw_earnings(&"bob".into()).await;
        assert!(matches!(result, Err(EscrowError::NothingToWithdraw(_))));
    }

    #[tokio::test]
    async fn test_rejected_transfer_restores_balance() {
        let (vault, registry, events) = vault_with(Arc::new(RejectingGateway), 1000);
        let alice = Principal::from("alice");
        fund_mentor(&vault, &registry, &alice, 1, 30).await;

        match vault.withdraw_earnings(&alice).await {
            Err(EscrowError::TransferFailed(msg)) => assert!(msg.contains("account closed")),
            other => panic!("Expected TransferFailed, got {:?}", other),
        }

        assert_eq!(registry.get_mentor_details(&alice).await.unwrap().balance, 30);
        let snapshot = vault.snapshot().await.unwrap();
        assert_eq!(snapshot.withdrawn, 0);
        assert_eq!(snapshot.pending, 0);
        assert!(snapshot.is_conserved());
        let withdrawals = events
            .read(&EventFilter::kind(EventKind::EarningsWithdrawn), 0)
            .await;
        assert!(withdrawals.events.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_acknowledgement_pays_out_once() {
        let gateway = Arc::new(SlowAckGateway {
            ledger: LedgerGateway::new(),
        });
        let (vault, registry, events) = vault_with(gateway.clone(), 50);
        let alice = Principal::from("alice");
        fund_mentor(&vault, &registry, &alice, 1, 30).await;

        match vault.withdraw_earnings(&alice).await {
            Err(EscrowError::TransferPending { amount, .. }) => assert_eq!(amount, 30),
            other => panic!("Expected TransferPending, got {:?}", other),
        }

        // The debited funds are pending, not back in the balance
        assert_eq!(registry.get_mentor_details(&alice).await.unwrap().balance, 0);
        let result = vault.withdraw_earnings(&alice).await;
        assert!(matches!(result, Err(EscrowError::NothingToWithdraw(_))));

        let snapshot = vault.snapshot().await.unwrap();
        assert_eq!(snapshot.pending, 30);
        assert_eq!(snapshot.withdrawn, 0);
        assert!(snapshot.is_conserved());

        tokio::time::sleep(Duration::from_secs(61)).await;

        let snapshot = vault.snapshot().await.unwrap();
        assert_eq!(snapshot.pending, 0);
        assert_eq!(snapshot.withdrawn, 30);
        assert!(snapshot.is_conserved());
        assert_eq!(gateway.ledger.paid_to(&alice).await, 30);
        assert_eq!(registry.get_mentor_details(&alice).await.unwrap().balance, 0);

        let withdrawals = events
            .read(&EventFilter::kind(EventKind::EarningsWithdrawn), 0)
            .await;
        assert_eq!(withdrawals.events.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_rejection_restores_balance_later() {
        let (vault, registry, _) = vault_with(Arc::new(SlowRejectGateway), 50);
        let alice = Principal::from("alice");
        fund_mentor(&vault, &registry, &alice, 1, 12).await;

        let result = vault.withdraw_earnings(&alice).await;
        assert!(matches!(result, Err(EscrowError::TransferPending { .. })));
        assert_eq!(registry.get_mentor_details(&alice).await.unwrap().balance, 0);

        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(registry.get_mentor_details(&alice).await.unwrap().balance, 12);
        let snapshot = vault.snapshot().await.unwrap();
        assert_eq!(snapshot.pending, 0);
        assert_eq!(snapshot.withdrawn, 0);
        assert!(snapshot.is_conserved());
    }
}
