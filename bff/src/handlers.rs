//! HTTP handlers: intake, health, and the live tail.

use crate::error::AppError;
use crate::state::AppState;
use crate::SERVICE_NAME;
use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use partnerflow_core::commands::{CreateInfluencer, PlatformProfile};
use partnerflow_core::envelope::{CorrelationId, Envelope};
use partnerflow_core::events::ContractCreated;
use partnerflow_core::topics;
use serde::{Deserialize, Serialize};

/// `POST /influencers` request body.
///
/// Field names match the external contract (`id_influencer`), not the
/// internal command.
#[derive(Debug, Deserialize)]
pub struct CreateInfluencerRequest {
    /// Caller-assigned influencer id.
    pub id_influencer: String,
    /// Display name.
    pub name: String,
    /// Contact email.
    pub email: String,
    /// Content categories; at least one required.
    pub categories: Vec<String>,
    /// Declared platform presences.
    #[serde(default)]
    pub platforms: Vec<PlatformProfile>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Longer biography.
    #[serde(default)]
    pub biography: Option<String>,
    /// Personal or agency website.
    #[serde(default)]
    pub website: Option<String>,
    /// Contact phone.
    #[serde(default)]
    pub phone: Option<String>,
}

/// `POST /influencers` response body.
#[derive(Debug, Serialize)]
pub struct CreateInfluencerResponse {
    /// Always true for 202 responses.
    pub accepted: bool,
    /// Correlation id of the saga this request triggered.
    pub correlation_id: CorrelationId,
    /// Human-readable note.
    pub message: String,
}

/// `GET /health` response body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Liveness indicator.
    pub status: &'static str,
    /// Service identity.
    pub service: &'static str,
    /// Crate version.
    pub version: &'static str,
}

fn validate(request: &CreateInfluencerRequest) -> Result<(), AppError> {
    if request.id_influencer.trim().is_empty() {
        return Err(AppError::bad_request("id_influencer is required"));
    }
    if request.name.trim().is_empty() {
        return Err(AppError::bad_request("name is required"));
    }
    if !request.email.contains('@') {
        return Err(AppError::bad_request("email is invalid"));
    }
    if request.categories.is_empty() {
        return Err(AppError::bad_request("categories must not be empty"));
    }
    Ok(())
}

/// Accept an influencer registration and enqueue the trigger command.
///
/// Mints the correlation id that will identify the whole saga; the request
/// is asynchronous and answers `202 Accepted` once the command is on the
/// bus.
///
/// # Errors
///
/// `400` on validation failure, `500` when the bus refuses the command.
pub async fn create_influencer(
    State(state): State<AppState>,
    Json(request): Json<CreateInfluencerRequest>,
) -> Result<(StatusCode, Json<CreateInfluencerResponse>), AppError> {
    validate(&request)?;

    let command = CreateInfluencer {
        influencer_id: request.id_influencer,
        name: request.name,
        email: request.email,
        categories: request.categories,
        platforms: request.platforms,
        description: request.description,
        biography: request.biography,
        website: request.website,
        phone: request.phone,
    };

    let correlation_id = CorrelationId::new();
    let envelope = Envelope::enclose(&command, correlation_id, SERVICE_NAME, state.clock.now())
        .map_err(|e| AppError::internal(format!("failed to encode command: {e}")))?;

    state
        .bus
        .publish(topics::CREATE_INFLUENCER, &envelope)
        .await
        .map_err(|e| AppError::internal(format!("failed to enqueue command: {e}")))?;

    tracing::info!(
        correlation_id = %correlation_id,
        influencer_id = %command.influencer_id,
        "registration accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateInfluencerResponse {
            accepted: true,
            correlation_id,
            message: "registration accepted for processing".to_string(),
        }),
    ))
}

/// Service identity for load balancers and monitors.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "up",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn ndjson_line(event: &ContractCreated) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(mut line) => {
            line.push('\n');
            Some(line)
        },
        Err(e) => {
            tracing::error!(error = %e, "failed to encode tail event");
            None
        },
    }
}

/// Long-lived newline-delimited JSON stream of contract creations.
///
/// Replays the most recent snapshot on connect, then forwards live events.
/// The connection stays open until the client goes away.
pub async fn stream(State(state): State<AppState>) -> Response {
    let snapshot = state.hub.last().await;
    let mut rx = state.hub.subscribe();

    let body = async_stream::stream! {
        if let Some(event) = snapshot
            && let Some(line) = ndjson_line(&event)
        {
            yield Ok::<_, std::convert::Infallible>(line);
        }

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(line) = ndjson_line(&event) {
                        yield Ok(line);
                    }
                },
                // A slow client missed events; the next one resyncs it.
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "tail client lagged");
                },
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(body),
    )
        .into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{StreamHub, router};
    use axum_test::TestServer;
    use chrono::Utc;
    use partnerflow_core::bus::MessageBus;
    use partnerflow_core::clock::SystemClock;
    use partnerflow_testing::mocks::InMemoryMessageBus;
    use std::sync::Arc;

    fn test_state(bus: Arc<InMemoryMessageBus>) -> AppState {
        AppState::new(
            bus as Arc<dyn MessageBus>,
            Arc::new(SystemClock),
            Arc::new(StreamHub::new()),
        )
    }

    #[tokio::test]
    async fn valid_registration_is_accepted() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let server = TestServer::new(router(test_state(Arc::clone(&bus)))).unwrap();

        let response = server
            .post("/influencers")
            .json(&serde_json::json!({
                "id_influencer": "inf-1",
                "name": "Ana",
                "email": "ana@x.io",
                "categories": ["moda", "lifestyle"]
            }))
            .await;

        response.assert_status(StatusCode::ACCEPTED);
        let body: serde_json::Value = response.json();
        assert_eq!(body["accepted"], serde_json::json!(true));
        assert!(body["correlation_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn missing_required_field_is_rejected() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let server = TestServer::new(router(test_state(bus))).unwrap();

        let response = server
            .post("/influencers")
            .json(&serde_json::json!({
                "id_influencer": "inf-1",
                "name": "Ana",
                "email": "ana@x.io",
                "categories": []
            }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_email_is_rejected() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let server = TestServer::new(router(test_state(bus))).unwrap();

        let response = server
            .post("/influencers")
            .json(&serde_json::json!({
                "id_influencer": "inf-1",
                "name": "Ana",
                "email": "nope",
                "categories": ["moda"]
            }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_reports_identity() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let server = TestServer::new(router(test_state(bus))).unwrap();

        let response = server.get("/health").await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["status"], serde_json::json!("up"));
        assert_eq!(body["service"], serde_json::json!("bff"));
    }

    #[tokio::test]
    async fn accepted_command_reaches_the_bus_with_fresh_correlation() {
        use partnerflow_core::bus::{DeliveryHandler, Disposition, SubscriptionSpec};
        use partnerflow_core::envelope::Envelope;
        use std::future::Future;
        use std::pin::Pin;
        use std::sync::Mutex;

        struct Capture(Arc<Mutex<Vec<Envelope>>>);

        impl DeliveryHandler for Capture {
            fn handle(
                &self,
                envelope: Envelope,
            ) -> Pin<Box<dyn Future<Output = Disposition> + Send + '_>> {
                self.0.lock().unwrap().push(envelope);
                Box::pin(async { Disposition::Ack })
            }
        }

        let bus = Arc::new(InMemoryMessageBus::new());
        let captured = Arc::new(Mutex::new(Vec::new()));
        let _sub = bus
            .subscribe(
                SubscriptionSpec::new(topics::CREATE_INFLUENCER, "capture"),
                Arc::new(Capture(Arc::clone(&captured))),
            )
            .await
            .unwrap();

        let server = TestServer::new(router(test_state(Arc::clone(&bus)))).unwrap();
        server
            .post("/influencers")
            .json(&serde_json::json!({
                "id_influencer": "inf-1",
                "name": "Ana",
                "email": "ana@x.io",
                "categories": ["moda"]
            }))
            .await
            .assert_status(StatusCode::ACCEPTED);

        bus.quiesce().await;
        let captured = captured.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].kind, "CreateInfluencer");
        assert_eq!(captured[0].source_service, "bff");
    }
}
