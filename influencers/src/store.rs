//! Influencer store port and in-memory implementation.
//!
//! Domain persistence is external to the orchestrator core; the port exists
//! so a real store can be wired without touching the worker. The store owns
//! two idempotency facts: which influencer ids exist, and which command
//! message ids have been fully processed (applied **and** announced).

use crate::domain::Influencer;
use partnerflow_core::envelope::MessageId;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use thiserror::Error;

/// Store-level failures.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The underlying store failed.
    #[error("influencer store failure: {0}")]
    Unavailable(String),
}

/// What an insert attempt found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The influencer was inserted.
    Inserted,
    /// An influencer with this id already exists; nothing was written.
    AlreadyExists,
}

/// Port for influencer persistence.
pub trait InfluencerStore: Send + Sync {
    /// Insert unless an influencer with the same id exists.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] when the store fails.
    fn insert(
        &self,
        influencer: Influencer,
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

    /// Record that a command message has been fully processed (entity
    /// applied and event announced).
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] when the store fails.
    fn mark_processed(
        &self,
        message_id: MessageId,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Fetch an influencer by id.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] when the store fails.
    fn get(
        &self,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Influencer>, StoreError>> + Send + '_>>;
}

/// In-memory [`InfluencerStore`].
#[derive(Default)]
pub struct InMemoryInfluencerStore {
    by_id: Mutex<HashMap<String, Influencer>>,
    processed: Mutex<HashSet<MessageId>>,
}

impl InMemoryInfluencerStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored influencers.
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

impl InfluencerStore for InMemoryInfluencerStore {
    #[allow(clippy::expect_used)]
    fn insert(
        &self,
        influencer: Influencer,
    ) -> Pin<Box<dyn Future<Output = Result<InsertOutcome, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut by_id = self.by_id.lock().expect("store mutex poisoned");
            if by_id.contains_key(&influencer.id) {
                return Ok(InsertOutcome::AlreadyExists);
            }
            by_id.insert(influencer.id.clone(), influencer);
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
        id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Influencer>, StoreError>> + Send + '_>> {
        let id = id.to_string();
        Box::pin(async move {
            Ok(self
                .by_id
                .lock()
                .expect("store mutex poisoned")
                .get(&id)
                .cloned())
        })
    }
}
