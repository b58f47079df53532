//! Admission front (BFF) for PartnerFlow.
//!
//! Accepts influencer registrations over HTTP, mints the saga's correlation
//! id, publishes the initial `CreateInfluencer` command, and answers
//! `202 Accepted` — the outcome is asynchronous and discoverable through
//! the live tail or the saga log.
//!
//! # Surface
//!
//! - `POST /influencers` — validate, enqueue, `202` with the correlation id
//! - `GET /health` — service identity
//! - `GET /stream` — long-lived newline-delimited JSON tail of contract
//!   creations, replaying the last-known snapshot on connect

pub mod error;
pub mod handlers;
pub mod state;
pub mod stream;

pub use error::AppError;
pub use state::AppState;
pub use stream::{ContractTailHandler, StreamHub};

use axum::Router;
use axum::routing::{get, post};

/// Logical service name stamped on outbound envelopes and health responses.
pub const SERVICE_NAME: &str = "bff";

/// Build the HTTP router over the given state.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/influencers", post(handlers::create_influencer))
        .route("/health", get(handlers::health))
        .route("/stream", get(handlers::stream))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
