//! Contract store port and in-memory implementation.
//!
//! The `(influencer, campaign)` uniqueness check happens inside the insert;
//! the conflict result is the authoritative business-rule error that becomes
//! a `ContractError` event.

use crate::domain::Contract;
use partnerflow_core::envelope::MessageId;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

/// Store-level failures.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The underlying store failed.
    #[error("contract store failure: {0}")]
    Unavailable(String),
}

/// What an insert attempt found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The contract was inserted.
    Inserted,
    /// An active contract for this `(influencer, campaign)` pair exists.
    DuplicateActive,
    /// A contract with this id already exists; nothing was written.
    AlreadyExists,
}

/// Port for contract persistence.
pub trait ContractStore: Send + Sync {
    /// Insert unless the id exists or the `(influencer, campaign)` pair has
    /// an active contract.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] when the store fails.
    fn insert(
        &self,
        contract: Contract,
    ) -> Pin<Box<dyn Future<Output = Result<InsertOutcome, StoreError>> + Send + '_>>;

    /// Whether a command message has been fully processed.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] when the store fails.
    fn was_processed(
        &self,
        message_id: MessageId,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + '_>>;

    /// Record that a command message has been fully processed.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] when the store fails.
    fn mark_processed(
        &self,
        message_id: MessageId,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Fetch a contract by id.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] when the store fails.
    fn get(
        &self,
        contract_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Contract>, StoreError>> + Send + '_>>;
}

/// In-memory [`ContractStore`].
#[derive(Default)]
pub struct InMemoryContractStore {
    by_id: Mutex<HashMap<Uuid, Contract>>,
    active_pairs: Mutex<HashSet<(String, Uuid)>>,
    processed: Mutex<HashSet<MessageId>>,
}

impl InMemoryContractStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored contracts.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.lock().expect("store mutex poisoned").len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContractStore for InMemoryContractStore {
    #[allow(clippy::expect_used)]
    fn insert(
        &self,
        contract: Contract,
    ) -> Pin<Box<dyn Future<Output = Result<InsertOutcome, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut by_id = self.by_id.lock().expect("store mutex poisoned");
            let mut pairs = self.active_pairs.lock().expect("store mutex poisoned");

            if by_id.contains_key(&contract.id) {
                return Ok(InsertOutcome::AlreadyExists);
            }
            let pair = (contract.influencer.id.clone(), contract.campaign.id);
            if pairs.contains(&pair) {
                return Ok(InsertOutcome::DuplicateActive);
            }
            pairs.insert(pair);
            by_id.insert(contract.id, contract);
            Ok(InsertOutcome::Inserted)
        })
    }

    #[allow(clippy::expect_used)]
    fn was_processed(
        &self,
        message_id: MessageId,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + '_>> {
        Box::pin(async move {
            Ok(self
                .processed
                .lock()
                .expect("store mutex poisoned")
                .contains(&message_id))
        })
    }

    #[allow(clippy::expect_used)]
    fn mark_processed(
        &self,
        message_id: MessageId,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.processed
                .lock()
                .expect("store mutex poisoned")
                .insert(message_id);
            Ok(())
        })
    }

    #[allow(clippy::expect_used)]
    fn get(
        &self,
        contract_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Contract>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            Ok(self
                .by_id
                .lock()
                .expect("store mutex poisoned")
                .get(&contract_id)
                .cloned())
        })
    }
}
