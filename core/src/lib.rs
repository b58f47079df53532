//! # PartnerFlow Core
//!
//! Core message catalog and port traits for the PartnerFlow saga
//! orchestrator.
//!
//! PartnerFlow coordinates a business workflow across three independent
//! services — Influencers, Campaigns, and Contracts — linked by an
//! asynchronous message bus. This crate defines everything the services and
//! the coordinator agree on:
//!
//! - **Envelope**: the wire frame every command and event travels in
//!   ([`envelope`])
//! - **Message catalog**: the commands and events exchanged between
//!   services ([`commands`], [`events`]), and the per-topic codec enums
//!   that make routing a compile-time-checked `match` ([`topics`])
//! - **Ports**: the bus ([`bus`]), the saga log ([`saga_log`]), and the
//!   command dispatcher ([`dispatcher`]) as traits, so adapters
//!   (Redpanda, Postgres, in-memory test doubles) plug in underneath
//! - **Value types**: decimal money, periods, commission and contract
//!   kinds ([`money`])
//!
//! # Architecture Principles
//!
//! - Explicit ports at every seam; no hidden global registries
//! - At-least-once delivery plus idempotency, never exactly-once claims
//! - Correlation ids minted once at admission and preserved unchanged
//! - Errors that cross the bus are explicit events, not silence
//!
//! # Example
//!
//! ```
//! use partnerflow_core::envelope::{CorrelationId, Envelope};
//! use partnerflow_core::events::InfluencerRegistered;
//! use chrono::Utc;
//!
//! # fn example() -> Result<(), partnerflow_core::envelope::CodecError> {
//! let event = InfluencerRegistered {
//!     influencer_id: "inf-1".to_string(),
//!     name: "Ana".to_string(),
//!     email: "ana@x.io".to_string(),
//!     categories: vec!["moda".to_string()],
//!     registered_at: Utc::now(),
//! };
//!
//! let envelope = Envelope::enclose(&event, CorrelationId::new(), "influencers", Utc::now())?;
//! let decoded: InfluencerRegistered = envelope.open()?;
//! assert_eq!(decoded.influencer_id, "inf-1");
//! # Ok(())
//! # }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use uuid::Uuid;

pub mod bus;
pub mod clock;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod events;
pub mod money;
pub mod saga_log;
pub mod topics;
