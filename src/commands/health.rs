use crate::market::types::{FeedConnectionState, FeedStatusSnapshot};
use crate::{error::AppError, state::AppState};
use serde::Serialize;
use std::time::Instant;
use tokio::sync::RwLock;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_ms: u128,
    pub feed: FeedConnectionState,
}

pub async fn build_health_response(
    started_at: Instant,
    feed_status: &RwLock<FeedStatusSnapshot>,
) -> HealthResponse {
    let feed = feed_status.read().await.state;
    let status = match feed {
        FeedConnectionState::Exhausted => "degraded",
        _ => "ok",
    };

    HealthResponse {
        status,
        uptime_ms: started_at.elapsed().as_millis(),
        feed,
    }
}

pub async fn health(state: &AppState) -> Result<HealthResponse, AppError> {
    Ok(build_health_response(state.started_at, &state.feed_status).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_reports_ok_status_and_feed_state() {
        let feed_status = RwLock::new(FeedStatusSnapshot::stopped(String::new(), None));

        let response = build_health_response(Instant::now(), &feed_status).await;

        assert_eq!(response.status, "ok");
        assert_eq!(response.feed, FeedConnectionState::Stopped);
        assert!(response.uptime_ms <= 1_000);
    }

    #[tokio::test]
    async fn exhausted_feed_is_degraded() {
        let mut snapshot = FeedStatusSnapshot::stopped("wss://example.invalid/ws".to_string(), None);
        snapshot.state = FeedConnectionState::Exhausted;
        let feed_status = RwLock::new(snapshot);

        let response = build_health_response(Instant::now(), &feed_status).await;

        assert_eq!(response.status, "degraded");
        assert_eq!(response.feed, FeedConnectionState::Exhausted);
    }
}
