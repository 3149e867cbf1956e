//! Mentor Registry - Mentor profiles and withdrawable balances
//!
//! Each mentor record sits behind its own lock so that operations on
//! different mentors never contend. The outer map lock is only held long
//! enough to find or insert a record.

use crate::{
    error::EscrowError,
    events::{EventKind, EventLog, NewEvent},
    models::{Amount, Mentor, MentorDetails, Principal},
    EscrowResult,
};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, RwLockReadGuard};
use tracing::{debug, info};

/// Shared handle to a single mentor record
pub type MentorRecord = Arc<Mutex<Mentor>>;

/// All mentor records held at once, see `MentorRegistry::lock_all`
pub(crate) struct LockedMentors<'a> {
    _map: RwLockReadGuard<'a, HashMap<Principal, MentorRecord>>,
    mentors: Vec<OwnedMutexGuard<Mentor>>,
}

impl LockedMentors<'_> {
    /// Sum of all withdrawable balances
    pub(crate) fn total_balances(&self) -> EscrowResult<Amount> {
        self.mentors.iter().try_fold(0 as Amount, |total, mentor| {
            total
                .checked_add(mentor.balance)
                .ok_or_else(|| EscrowError::amount_overflow("total mentor balances"))
        })
    }
}

/// Registry of mentors keyed by principal
pub struct MentorRegistry {
    mentors: RwLock<HashMap<Principal, MentorRecord>>,
    events: Arc<EventLog>,
}

impl MentorRegistry {
    pub fn new(events: Arc<EventLog>) -> Self {
        Self {
            mentors: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Create or update the caller's mentor record
    ///
    /// Re-registration overwrites expertise and rate but keeps the balance
    /// and the current availability.
    pub async fn register_mentor(
        &self,
        caller: &Principal,
        expertise: String,
        hourly_rate: Amount,
    ) -> EscrowResult<MentorDetails> {
        if let Some(record) = self.record(caller).await {
            let mut mentor = record.lock().await;
            mentor.update_profile(expertise, hourly_rate);
            self.append_registration(&mentor, false).await;

            info!("Updated mentor {} (rate {})", caller, hourly_rate);
            return Ok(mentor.details());
        }

        let mut mentors = self.mentors.write().await;
        let (mut mentor, created) = match mentors.get(caller).cloned() {
            // Registered concurrently between the read and write lock
            Some(record) => {
                drop(mentors);
                (record.lock_owned().await, false)
            }
            None => {
                let record = Arc::new(Mutex::new(Mentor::new(
                    caller.clone(),
                    expertise.clone(),
                    hourly_rate,
                )));
                mentors.insert(caller.clone(), record.clone());
                // Fresh record, so this never waits; nothing observes it unannounced
                let mentor = record.lock_owned().await;
                drop(mentors);
                (mentor, true)
            }
        };

        if !created {
            mentor.update_profile(expertise, hourly_rate);
        }
        self.append_registration(&mentor, created).await;

        info!(
            "Registered mentor {} (rate {}, new: {})",
            caller, hourly_rate, created
        );

        Ok(mentor.details())
    }

    /// Set the caller's availability flag
    pub async fn update_availability(
        &self,
        caller: &Principal,
        is_available: bool,
    ) -> EscrowResult<()> {
        let record = self
            .record(caller)
            .await
            .ok_or_else(|| EscrowError::NotRegistered(caller.clone()))?;

        let mut mentor = record.lock().await;
        mentor.is_available = is_available;
        mentor.updated_at = crate::models::now();

        self.events
            .append(
                NewEvent::new(EventKind::AvailabilityUpdated, caller.clone())
                    .details(serde_json::json!({ "is_available": is_available })),
            )
            .await;

        info!("Mentor {} availability set to {}", caller, is_available);

        Ok(())
    }

    /// Snapshot of a mentor's profile and balance
    pub async fn get_mentor_details(&self, address: &Principal) -> EscrowResult<MentorDetails> {
        let record = self
            .record(address)
            .await
            .ok_or_else(|| EscrowError::not_found(format!("Mentor {} not found", address)))?;

        let details = record.lock().await.details();
        debug!("Read mentor {}", address);
        Ok(details)
    }

    /// All registered mentor addresses, sorted
    pub async fn list_mentor_addresses(&self) -> Vec<Principal> {
        let mut addresses: Vec<Principal> = self.mentors.read().await.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Lock every mentor record, in address order
    ///
    /// The map stays read-locked until the result is dropped, so no mentor
    /// can be added in the meantime.
    pub(crate) async fn lock_all(&self) -> LockedMentors<'_> {
        let map = self.mentors.read().await;
        let mut records: Vec<(&Principal, &MentorRecord)> = map.iter().collect();
        records.sort_by(|a, b| a.0.cmp(b.0));

        let mut mentors = Vec::with_capacity(records.len());
        for (_, record) in records {
            mentors.push(record.clone().lock_owned().await);
        }

        LockedMentors { _map: map, mentors }
    }

    /// Look up the lockable record for a mentor
    pub(crate) async fn record(&self, address: &Principal) -> Option<MentorRecord> {
        self.mentors.read().await.get(address).cloned()
    }

    async fn append_registration(&self, mentor: &Mentor, created: bool) {
        self.events
            .append(
                NewEvent::new(EventKind::MentorRegistered, mentor.address.clone()).details(
                    serde_json::json!({
                        "expertise": mentor.expertise,
                        "hourly_rate": mentor.hourly_rate,
                        "created": created
                    }),
                ),
            )
            .await;
    }
}
