//! Campaign store port and in-memory implementation.
//!
//! The unique-name check happens inside the insert, so the conflict result
//! is the authoritative business-rule error — there is no separate
//! validate-then-insert window.

use crate::domain::{Campaign, CampaignStatus};
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
    #[error("campaign store failure: {0}")]
    Unavailable(String),
}

/// What an insert attempt found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The campaign was inserted.
    Inserted,
    /// A live campaign with the same name exists; nothing was written.
    NameConflict,
    /// A campaign with this id already exists; nothing was written.
    AlreadyExists,
}

/// What a delete attempt found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The campaign was marked deleted.
    Deleted,
    /// No live campaign with this id was found.
    NotFound,
}

/// Port for campaign persistence.
pub trait CampaignStore: Send + Sync {
    /// Insert unless the id exists or a live campaign holds the same name.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] when the store fails.
    fn insert(
        &self,
        campaign: Campaign,
    ) -> Pin<Box<dyn Future<Output = Result<InsertOutcome, StoreError>> + Send + '_>>;

    /// Mark a campaign deleted.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] when the store fails.
    fn delete(
        &self,
        campaign_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<DeleteOutcome, StoreError>> + Send + '_>>;

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

    /// Fetch a campaign by id.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] when the store fails.
    fn get(
        &self,
        campaign_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Campaign>, StoreError>> + Send + '_>>;
}

/// In-memory [`CampaignStore`].
#[derive(Default)]
pub struct InMemoryCampaignStore {
    by_id: Mutex<HashMap<Uuid, Campaign>>,
    processed: Mutex<HashSet<MessageId>>,
}

impl InMemoryCampaignStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored campaigns, deleted included.
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

impl CampaignStore for InMemoryCampaignStore {
    #[allow(clippy::expect_used)]
    fn insert(
        &self,
        campaign: Campaign,
    ) -> Pin<Box<dyn Future<Output = Result<InsertOutcome, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut by_id = self.by_id.lock().expect("store mutex poisoned");
            if by_id.contains_key(&campaign.id) {
                return Ok(InsertOutcome::AlreadyExists);
            }
            let name_taken = by_id
                .values()
                .any(|c| c.status != CampaignStatus::Deleted && c.name == campaign.name);
            if name_taken {
                return Ok(InsertOutcome::NameConflict);
            }
            by_id.insert(campaign.id, campaign);
            Ok(InsertOutcome::Inserted)
        })
    }

    #[allow(clippy::expect_used)]
    fn delete(
        &self,
        campaign_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<DeleteOutcome, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut by_id = self.by_id.lock().expect("store mutex poisoned");
            match by_id.get_mut(&campaign_id) {
                Some(campaign) if campaign.status != CampaignStatus::Deleted => {
                    campaign.status = CampaignStatus::Deleted;
                    Ok(DeleteOutcome::Deleted)
                },
                _ => Ok(DeleteOutcome::NotFound),
            }
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
        campaign_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Campaign>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            Ok(self
                .by_id
                .lock()
                .expect("store mutex poisoned")
                .get(&campaign_id)
                .cloned())
        })
    }
}
