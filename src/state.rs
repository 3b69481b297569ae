use crate::market::coordinator::MarketCoordinator;
use crate::market::feed::FeedExit;
use crate::market::types::{FeedStatusSnapshot, MarketEvent};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const EVENT_BUS_CAPACITY: usize = 4_096;

pub struct MarketFeedHandle {
    pub cancellation_token: CancellationToken,
    pub join_handle: JoinHandle<FeedExit>,
    pub coordinator: Arc<MarketCoordinator>,
}

pub struct AppState {
    pub started_at: Instant,
    pub market_feed: Mutex<Option<MarketFeedHandle>>,
    pub feed_status: Arc<RwLock<FeedStatusSnapshot>>,
    pub events: broadcast::Sender<MarketEvent>,
}

impl AppState {
    pub fn new() -> Self {
        let feed_status = FeedStatusSnapshot::stopped(String::new(), Some("feed idle".to_string()));
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);

        Self {
            started_at: Instant::now(),
            market_feed: Mutex::new(None),
            feed_status: Arc::new(RwLock::new(feed_status)),
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<MarketEvent> {
        self.events.subscribe()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
