//! Command dispatcher port.
//!
//! The coordinator appends its log entry first and then hands the outbound
//! command to a [`CommandDispatcher`]. Two implementations exist: a direct
//! bus publisher with bounded retry (`partnerflow-runtime`), and a
//! transactional outbox that persists the command and drains it to the bus
//! from a relay (`partnerflow-postgres`).

use crate::envelope::Envelope;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from command dispatch.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The command could not be handed off after bounded retries.
    #[error("dispatch to '{topic}' failed: {reason}")]
    Failed {
        /// Destination topic.
        topic: String,
        /// Reason for the failure.
        reason: String,
    },
}

/// Port for handing an outbound command to the bus, directly or via outbox.
pub trait CommandDispatcher: Send + Sync {
    /// Dispatch an envelope to a topic.
    ///
    /// Resolution means the command is durably on its way: either accepted
    /// by the broker or persisted in an outbox a relay will drain. It does
    /// **not** mean the destination processed it.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Failed`] after bounded retries are exhausted.
    fn dispatch(
        &self,
        topic: &str,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>>;
}
