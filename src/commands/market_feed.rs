use crate::error::AppError;
use crate::market::config::{CandleInterval, HyperliquidNetwork, MarketFeedConfig, StartMarketFeedArgs};
use crate::market::coordinator::MarketCoordinator;
use crate::market::pipeline::run_market_feed;
use crate::market::types::{FeedConnectionState, FeedStatusSnapshot, SeriesSnapshot};
use crate::state::{AppState, MarketFeedHandle};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarketFeedSession {
    pub network: HyperliquidNetwork,
    pub ws_url: String,
    pub info_url: String,
    pub symbols: Vec<String>,
    pub interval: CandleInterval,
    pub history_window_ms: i64,
    pub subscriptions: usize,
}

impl MarketFeedSession {
    fn from_config(config: &MarketFeedConfig) -> Self {
        Self {
            network: config.network,
            ws_url: config.ws_url.clone(),
            info_url: config.info_url.clone(),
            symbols: config.symbols.clone(),
            interval: config.interval,
            history_window_ms: config.history_window_ms,
            subscriptions: config.subscriptions().len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MarketFeedStopResult {
    pub stopped: bool,
}

async fn shutdown_handle(handle: MarketFeedHandle) {
    handle.cancellation_token.cancel();
    match handle.join_handle.await {
        Ok(exit) => info!(exit = ?exit, "market feed task finished"),
        Err(join_error) => warn!(error = %join_error, "market feed task failed"),
    }
}

/// Starts the feed, replacing a running one. Every start builds fresh series
/// so a changed interval or symbol set is reseeded from history.
pub async fn start_market_feed(
    state: &AppState,
    args: Option<StartMarketFeedArgs>,
) -> Result<MarketFeedSession, AppError> {
    let config = args.unwrap_or_default().normalize()?;

    let existing_handle = {
        let mut feed_slot = state.market_feed.lock().await;
        feed_slot.take()
    };
    if let Some(handle) = existing_handle {
        shutdown_handle(handle).await;
    }

    let cancellation_token = CancellationToken::new();
    let coordinator = Arc::new(MarketCoordinator::new(
        &config.symbols,
        config.interval,
        state.events.clone(),
    ));

    let join_handle = tokio::spawn(run_market_feed(
        config.clone(),
        Arc::clone(&coordinator),
        Arc::clone(&state.feed_status),
        state.events.clone(),
        cancellation_token.clone(),
    ));

    {
        let mut feed_slot = state.market_feed.lock().await;
        *feed_slot = Some(MarketFeedHandle {
            cancellation_token,
            join_handle,
            coordinator,
        });
    }

    info!(
        network = ?config.network,
        symbols = ?config.symbols,
        interval = config.interval.as_str(),
        "market feed started"
    );
    Ok(MarketFeedSession::from_config(&config))
}

pub async fn stop_market_feed(state: &AppState) -> Result<MarketFeedStopResult, AppError> {
    let existing_handle = {
        let mut feed_slot = state.market_feed.lock().await;
        feed_slot.take()
    };

    let stopped = if let Some(handle) = existing_handle {
        shutdown_handle(handle).await;
        true
    } else {
        false
    };

    {
        let mut writable = state.feed_status.write().await;
        *writable = FeedStatusSnapshot {
            state: FeedConnectionState::Stopped,
            reason: Some("feed stopped by command".to_string()),
            ..writable.clone()
        };
    }

    Ok(MarketFeedStopResult { stopped })
}

pub async fn market_feed_status(state: &AppState) -> Result<FeedStatusSnapshot, AppError> {
    let snapshot = state.feed_status.read().await.clone();
    Ok(snapshot)
}

pub async fn market_series(state: &AppState, symbol: &str) -> Result<SeriesSnapshot, AppError> {
    let feed_slot = state.market_feed.lock().await;
    let handle = feed_slot.as_ref().ok_or(AppError::FeedNotRunning)?;
    handle.coordinator.series_snapshot(symbol)
}

pub async fn market_symbols(state: &AppState) -> Result<Vec<String>, AppError> {
    let feed_slot = state.market_feed.lock().await;
    let handle = feed_slot.as_ref().ok_or(AppError::FeedNotRunning)?;
    Ok(handle.coordinator.symbols().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn unreachable_args(symbols: &[&str], interval: CandleInterval) -> StartMarketFeedArgs {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("loopback listener should bind");
        let address = listener.local_addr().expect("listener should have an address");
        drop(listener);

        StartMarketFeedArgs {
            ws_url: Some(format!("ws://{address}/ws")),
            info_url: Some(format!("http://{address}/info")),
            symbols: Some(symbols.iter().map(|symbol| symbol.to_string()).collect()),
            interval: Some(interval),
            reconnect_enabled: Some(false),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn start_exposes_session_series_and_symbols() {
        let state = AppState::new();
        let session = start_market_feed(&state, Some(unreachable_args(&[" BTC", "kPEPE "], CandleInterval::M5).await))
            .await
            .expect("feed should start");

        assert_eq!(session.symbols, vec!["BTC", "kPEPE"]);
        assert_eq!(session.interval, CandleInterval::M5);
        assert_eq!(session.subscriptions, 4);

        let symbols = market_symbols(&state).await.expect("feed is running");
        assert_eq!(symbols, vec!["BTC", "kPEPE"]);

        let series = market_series(&state, "kPEPE").await.expect("kPEPE is tracked");
        assert_eq!(series.symbol, "kPEPE");
        assert_eq!(series.interval, CandleInterval::M5);
        assert!(matches!(
            market_series(&state, "DOGE").await,
            Err(AppError::UnknownSymbol(_))
        ));

        let stop = stop_market_feed(&state).await.expect("stop should succeed");
        assert!(stop.stopped);
    }

    #[tokio::test]
    async fn restart_replaces_running_feed() {
        let state = AppState::new();
        start_market_feed(&state, Some(unreachable_args(&["BTC"], CandleInterval::M1).await))
            .await
            .expect("first start should succeed");
        let session = start_market_feed(&state, Some(unreachable_args(&["SOL"], CandleInterval::H1).await))
            .await
            .expect("restart should succeed");

        assert_eq!(session.interval, CandleInterval::H1);
        assert_eq!(
            market_symbols(&state).await.expect("feed is running"),
            vec!["SOL"]
        );
        let series = market_series(&state, "SOL").await.expect("SOL is tracked");
        assert_eq!(series.interval, CandleInterval::H1);

        stop_market_feed(&state).await.expect("stop should succeed");
    }

    #[tokio::test]
    async fn stop_without_feed_reports_not_stopped() {
        let state = AppState::new();

        let stop = stop_market_feed(&state).await.expect("stop should succeed");
        assert!(!stop.stopped);

        let status = market_feed_status(&state).await.expect("status is always readable");
        assert_eq!(status.state, FeedConnectionState::Stopped);
        assert!(matches!(
            market_series(&state, "BTC").await,
            Err(AppError::FeedNotRunning)
        ));
        assert!(matches!(
            market_symbols(&state).await,
            Err(AppError::FeedNotRunning)
        ));
    }

    #[tokio::test]
    async fn invalid_args_are_rejected_before_anything_starts() {
        let state = AppState::new();
        let result = start_market_feed(
            &state,
            Some(StartMarketFeedArgs {
                symbols: Some(vec!["BAD-SYMBOL".to_string()]),
                ..Default::default()
            }),
        )
        .await;

        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
        assert!(state.market_feed.lock().await.is_none());
    }
}
