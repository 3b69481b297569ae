use crate::market::config::MarketFeedConfig;
use crate::market::coordinator::MarketCoordinator;
use crate::market::feed::{run_live_feed, FeedExit, LiveFeedConfig};
use crate::market::now_unix_ms;
use crate::market::types::{FeedConnectionState, FeedStatusSnapshot, MarketEvent};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Full feed lifecycle: seed every symbol from history, then start the live
/// connection and the router behind a bounded queue. Returns once the feed is
/// cancelled or permanently down.
pub async fn run_market_feed(
    config: MarketFeedConfig,
    coordinator: Arc<MarketCoordinator>,
    status_store: Arc<RwLock<FeedStatusSnapshot>>,
    events: broadcast::Sender<MarketEvent>,
    cancel_token: CancellationToken,
) -> FeedExit {
    let http_client = Client::new();

    publish_status(
        &status_store,
        &events,
        FeedStatusSnapshot {
            state: FeedConnectionState::Connecting,
            url: config.ws_url.clone(),
            reconnect_attempt: 0,
            subscriptions: config.subscriptions().len(),
            frames_received: 0,
            raw_frames: 0,
            last_frame_at_ms: None,
            reason: Some("loading candle history".to_string()),
        },
    )
    .await;

    let seeded = tokio::select! {
        _ = cancel_token.cancelled() => None,
        total = coordinator.bootstrap(
            &http_client,
            &config.info_url,
            config.history_window_ms,
            now_unix_ms(),
        ) => Some(total),
    };
    let Some(seeded_bars) = seeded else {
        publish_final_status(&status_store, &events, "feed stopped during history load").await;
        return FeedExit::Cancelled;
    };
    info!(
        symbols = coordinator.symbols().len(),
        interval = config.interval.as_str(),
        bars = seeded_bars,
        "history bootstrap complete"
    );

    let (envelope_sender, envelope_receiver) = mpsc::channel(config.queue_capacity);
    let router_handle = tokio::spawn(
        Arc::clone(&coordinator).run_router(envelope_receiver, cancel_token.child_token()),
    );

    let exit = run_live_feed(
        LiveFeedConfig::from(&config),
        envelope_sender,
        Arc::clone(&status_store),
        events.clone(),
        cancel_token.clone(),
    )
    .await;

    match router_handle.await {
        Ok(routed) => debug!(routed, "router finished"),
        Err(join_error) => error!(error = %join_error, "router task failed"),
    }

    match exit {
        FeedExit::Cancelled => {
            publish_final_status(&status_store, &events, "feed stopped").await;
        }
        FeedExit::SinkClosed => {
            publish_final_status(&status_store, &events, "envelope router stopped").await;
        }
        FeedExit::Exhausted { .. } | FeedExit::ReconnectDisabled => {}
    }
    exit
}

async fn publish_status(
    status_store: &Arc<RwLock<FeedStatusSnapshot>>,
    events: &broadcast::Sender<MarketEvent>,
    snapshot: FeedStatusSnapshot,
) {
    {
        let mut writable = status_store.write().await;
        *writable = snapshot.clone();
    }

    if events.send(MarketEvent::MarketStatus(snapshot)).is_err() {
        debug!("no market status subscribers");
    }
}

async fn publish_final_status(
    status_store: &Arc<RwLock<FeedStatusSnapshot>>,
    events: &broadcast::Sender<MarketEvent>,
    reason: &str,
) {
    let snapshot = {
        let readable = status_store.read().await;
        FeedStatusSnapshot {
            state: FeedConnectionState::Stopped,
            reason: Some(reason.to_string()),
            ..readable.clone()
        }
    };
    publish_status(status_store, events, snapshot).await;
}
