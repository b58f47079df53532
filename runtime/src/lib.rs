//! # PartnerFlow Runtime
//!
//! Runtime support shared by the service workers and the saga coordinator.
//!
//! ## Components
//!
//! - [`retry`]: bounded exponential backoff with jitter for transient
//!   failures
//! - [`keyed`]: per-key async mutexes — the coordinator's per-correlation
//!   serialization primitive
//! - [`dispatch`]: a [`CommandDispatcher`](partnerflow_core::dispatcher::CommandDispatcher)
//!   that publishes directly to the bus with bounded retry
//! - [`shutdown`]: a cooperative shutdown signal consumers poll between
//!   deliveries

pub mod dispatch;
pub mod keyed;
pub mod retry;
pub mod shutdown;

pub use dispatch::BusDispatcher;
pub use keyed::KeyedMutex;
pub use retry::{RetryPolicy, retry_while, retry_with_backoff};
pub use shutdown::{Shutdown, ShutdownSignal};
