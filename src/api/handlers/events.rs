//! HTTP bridge onto the inbound event channel

use axum::{extract::State, http::StatusCode, Json};
use tracing::warn;

use super::{api_error, ApiResult};
use crate::api::{state::AppState, types::EventAccepted};
use crate::domain::{BusMessage, PeerOffer, ScreenshotsRequested};
use crate::services::DeliveryOutcome;

async fn forward(state: &AppState, message: BusMessage) -> ApiResult<(StatusCode, Json<EventAccepted>)> {
    let topic = message.topic();
    let outcome = state.bus.deliver(message).await.map_err(|e| {
        warn!(%topic, "Event bus closed: {}", e);
        api_error(StatusCode::SERVICE_UNAVAILABLE, "Event intake is shutting down")
    })?;

    match outcome {
        DeliveryOutcome::Redeliver(reason) => Err(api_error(StatusCode::SERVICE_UNAVAILABLE, reason)),
        DeliveryOutcome::Processed => Ok((
            StatusCode::ACCEPTED,
            Json(EventAccepted {
                topic: topic.to_string(),
                outcome: "processed".to_string(),
            }),
        )),
        DeliveryOutcome::Rejected(reason) => Ok((
            StatusCode::ACCEPTED,
            Json(EventAccepted {
                topic: topic.to_string(),
                outcome: format!("rejected: {reason}"),
            }),
        )),
    }
}

/// POST /api/events/screenshots-requested
pub async fn screenshots_requested(
    State(state): State<AppState>,
    Json(event): Json<ScreenshotsRequested>,
) -> ApiResult<(StatusCode, Json<EventAccepted>)> {
    forward(&state, BusMessage::ScreenshotsRequested(event)).await
}

/// POST /api/events/peer-available
pub async fn peer_available(
    State(state): State<AppState>,
    Json(offer): Json<PeerOffer>,
) -> ApiResult<(StatusCode, Json<EventAccepted>)> {
    forward(&state, BusMessage::PeerAvailable(offer)).await
}
