//! # PartnerFlow Testing
//!
//! Testing utilities and in-memory adapters for the PartnerFlow saga
//! orchestrator.
//!
//! This crate provides:
//! - [`mocks::InMemoryMessageBus`]: a broker double with shared-subscription
//!   load balancing, bounded redelivery, and dead-letter capture
//! - [`mocks::InMemorySagaLog`]: a saga log with the same uniqueness
//!   semantics as the Postgres store
//! - [`mocks::FixedClock`]: deterministic time
//! - [`mocks::CapturingDispatcher`]: records dispatched commands for
//!   assertions
//!
//! ## Example
//!
//! ```ignore
//! use partnerflow_testing::mocks::{InMemoryMessageBus, InMemorySagaLog, test_clock};
//!
//! #[tokio::test]
//! async fn saga_completes() {
//!     let bus = Arc::new(InMemoryMessageBus::new());
//!     let log = Arc::new(InMemorySagaLog::new());
//!     // ... wire workers and coordinator against the doubles ...
//!     bus.quiesce().await;
//!     assert!(log.has_entry(correlation, 3, "End").await.unwrap());
//! }
//! ```

pub mod mocks;

pub use mocks::{
    CapturingDispatcher, FixedClock, InMemoryMessageBus, InMemorySagaLog, test_clock,
};
