pub mod commands;
pub mod config;
pub mod error;
pub mod market;
pub mod state;

use commands::{
    health::health,
    market_feed::{market_feed_status, market_series, start_market_feed, stop_market_feed},
};
use error::AppError;
use market::render::{RenderAction, RenderMirror};
use market::types::MarketEvent;
use state::AppState;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

pub fn run() -> Result<(), AppError> {
    config::load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = config::start_args_from_env();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let state = Arc::new(AppState::new());
        let renderer = tokio::spawn(mirror_market_events(
            Arc::clone(&state),
            state.subscribe_events(),
        ));

        let session = start_market_feed(&state, Some(args)).await?;
        info!(
            ws_url = %session.ws_url,
            info_url = %session.info_url,
            symbols = ?session.symbols,
            interval = session.interval.as_str(),
            "candle stream running; press ctrl-c to stop"
        );

        tokio::signal::ctrl_c().await?;
        info!("shutdown requested");

        let stop = stop_market_feed(&state).await?;
        let status = market_feed_status(&state).await?;
        let report = health(&state).await?;
        info!(
            stopped = stop.stopped,
            frames = status.frames_received,
            raw_frames = status.raw_frames,
            uptime_ms = report.uptime_ms as u64,
            "candle stream stopped"
        );

        renderer.abort();
        Ok::<(), AppError>(())
    })
}

/// Stand-in renderer: keeps a mirror of every series in step with the event
/// bus and bulk-replaces a series from a fresh snapshot when it drifts.
async fn mirror_market_events(state: Arc<AppState>, mut events: broadcast::Receiver<MarketEvent>) {
    let mut mirror = RenderMirror::default();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "renderer lagged behind market events");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        if let MarketEvent::MarketStatus(status) = &event {
            info!(
                state = ?status.state,
                attempt = status.reconnect_attempt,
                reason = status.reason.as_deref().unwrap_or("-"),
                "feed status"
            );
        }

        match mirror.apply(&event) {
            RenderAction::Replaced { symbol, len } => {
                info!(symbol = %symbol, bars = len, "series replaced");
            }
            RenderAction::Patched { symbol, len } => {
                debug!(symbol = %symbol, bars = len, "series patched");
            }
            RenderAction::Resync {
                symbol,
                expected,
                found,
            } => {
                warn!(symbol = %symbol, expected, found, "series length drifted; resyncing");
                match market_series(&state, &symbol).await {
                    Ok(snapshot) => {
                        mirror.replace(&symbol, snapshot.candles);
                    }
                    Err(error) => warn!(symbol = %symbol, error = %error, "resync failed"),
                }
            }
            RenderAction::Status => {}
        }
    }
}
