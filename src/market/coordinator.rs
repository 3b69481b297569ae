use crate::error::AppError;
use crate::market::config::CandleInterval;
use crate::market::hyperliquid::fetch_history;
use crate::market::series::{CandleApplyOutcome, SeriesReconciler, TradeFoldOutcome};
use crate::market::types::{
    normalize, CandlePayload, CandleRecord, CandleUpdate, CandlesBootstrap, FeedEnvelope,
    MarketEvent, SeriesSnapshot, TradeWire,
};
use futures_util::future::join_all;
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Candles { applied: usize, ignored: usize },
    Trades { symbol: String, outcome: TradeFoldOutcome },
    UntrackedSymbol(String),
    Informational,
    Raw,
}

/// Fans live envelopes out to one reconciler per tracked symbol and publishes
/// renderer events after every successful merge.
#[derive(Debug)]
pub struct MarketCoordinator {
    interval: CandleInterval,
    symbols: Vec<String>,
    series: HashMap<String, Arc<Mutex<SeriesReconciler>>>,
    events: broadcast::Sender<MarketEvent>,
}

impl MarketCoordinator {
    pub fn new(
        symbols: &[String],
        interval: CandleInterval,
        events: broadcast::Sender<MarketEvent>,
    ) -> Self {
        let series = symbols
            .iter()
            .map(|symbol| {
                (
                    symbol.clone(),
                    Arc::new(Mutex::new(SeriesReconciler::new(symbol.clone()))),
                )
            })
            .collect();

        Self {
            interval,
            symbols: symbols.to_vec(),
            series,
            events,
        }
    }

    pub fn interval(&self) -> CandleInterval {
        self.interval
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn is_tracked(&self, symbol: &str) -> bool {
        self.series.contains_key(symbol)
    }

    /// Wholesale replacement of one symbol's series, followed by a bootstrap event.
    pub fn seed(&self, symbol: &str, records: Vec<CandleRecord>) -> Result<usize, AppError> {
        let reconciler = self
            .series
            .get(symbol)
            .ok_or_else(|| AppError::UnknownSymbol(symbol.to_string()))?;

        let candles = {
            let mut writable = reconciler.lock();
            writable.seed(records);
            writable.bars().to_vec()
        };
        let len = candles.len();

        self.emit(MarketEvent::CandlesBootstrap(CandlesBootstrap {
            symbol: symbol.to_string(),
            interval: self.interval,
            candles,
        }));
        Ok(len)
    }

    /// Fetches every symbol's history concurrently and seeds each one. Must run
    /// before any live envelope is routed.
    pub async fn bootstrap(
        &self,
        client: &Client,
        info_url: &str,
        history_window_ms: i64,
        now_ms: i64,
    ) -> usize {
        let start_time = now_ms.saturating_sub(history_window_ms);
        let fetches = self.symbols.iter().map(|symbol| {
            fetch_history(client, info_url, symbol, self.interval, start_time, now_ms)
        });
        let histories = join_all(fetches).await;

        let mut total = 0_usize;
        for (symbol, records) in self.symbols.iter().zip(histories) {
            match self.seed(symbol, records) {
                Ok(len) => {
                    info!(symbol = %symbol, interval = self.interval.as_str(), bars = len, "series seeded");
                    total += len;
                }
                Err(error) => warn!(symbol = %symbol, error = %error, "failed to seed series"),
            }
        }
        total
    }

    pub fn route(&self, envelope: FeedEnvelope) -> RouteOutcome {
        match envelope {
            FeedEnvelope::Candle(payload) => self.route_candles(payload),
            FeedEnvelope::Trades(trades) => self.route_trades(&trades),
            FeedEnvelope::SubscriptionResponse(ack) => {
                debug!(
                    method = %ack.method,
                    coin = ack.subscription.as_ref().map(|subscription| subscription.coin()).unwrap_or("-"),
                    "subscription acknowledged"
                );
                RouteOutcome::Informational
            }
            FeedEnvelope::Pong => RouteOutcome::Informational,
            FeedEnvelope::Raw(_) => RouteOutcome::Raw,
        }
    }

    fn route_candles(&self, payload: CandlePayload) -> RouteOutcome {
        let (payload_symbol, rows) = payload.into_parts();
        let mut applied = 0_usize;
        let mut ignored = 0_usize;

        for slot in rows {
            let row = match slot.into_raw() {
                Ok(row) => row,
                Err(error) => {
                    warn!(error = %error, "skipping malformed live candle");
                    ignored += 1;
                    continue;
                }
            };
            let Some(symbol) = row
                .symbol()
                .map(str::to_string)
                .or_else(|| payload_symbol.clone())
                .map(|symbol| symbol.trim().to_string())
            else {
                debug!(timestamp = row.timestamp(), "candle row without symbol");
                ignored += 1;
                continue;
            };

            let Some(reconciler) = self.series.get(&symbol) else {
                debug!(symbol = %symbol, "ignoring candle for untracked symbol");
                ignored += 1;
                continue;
            };

            let record = match normalize(row) {
                Ok(record) => record,
                Err(error) => {
                    warn!(symbol = %symbol, error = %error, "skipping malformed live candle");
                    ignored += 1;
                    continue;
                }
            };

            let outcome = reconciler.lock().apply_candle_update(record);
            match outcome {
                CandleApplyOutcome::Appended { len } | CandleApplyOutcome::Replaced { len } => {
                    applied += 1;
                    self.emit(MarketEvent::CandleUpdate(CandleUpdate {
                        symbol,
                        interval: self.interval,
                        candle: record,
                        len,
                    }));
                }
                CandleApplyOutcome::Stale { .. } => ignored += 1,
            }
        }

        RouteOutcome::Candles { applied, ignored }
    }

    fn route_trades(&self, trades: &[TradeWire]) -> RouteOutcome {
        let Some(first) = trades.first() else {
            return RouteOutcome::Informational;
        };
        let symbol = first.coin.trim().to_string();

        let Some(reconciler) = self.series.get(&symbol) else {
            debug!(symbol = %symbol, "ignoring trades for untracked symbol");
            return RouteOutcome::UntrackedSymbol(symbol);
        };

        let (outcome, current, len) = {
            let mut writable = reconciler.lock();
            let outcome = writable.apply_trades(trades);
            (outcome, writable.current().copied(), writable.len())
        };

        match (outcome, current) {
            (TradeFoldOutcome::Folded { folded, .. }, Some(candle)) if folded > 0 => {
                self.emit(MarketEvent::CandleUpdate(CandleUpdate {
                    symbol: symbol.clone(),
                    interval: self.interval,
                    candle,
                    len,
                }));
            }
            (TradeFoldOutcome::NoCurrentBar { dropped }, _) => {
                debug!(symbol = %symbol, dropped, "no current bar; dropping trades");
            }
            _ => {}
        }

        RouteOutcome::Trades { symbol, outcome }
    }

    /// Routes envelopes in arrival order until the queue closes or `cancel_token`
    /// fires. Nothing is routed once cancellation is observed.
    pub async fn run_router(
        self: Arc<Self>,
        mut receiver: mpsc::Receiver<FeedEnvelope>,
        cancel_token: CancellationToken,
    ) -> u64 {
        let mut routed = 0_u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                next = receiver.recv() => next,
            };
            let Some(envelope) = next else {
                break;
            };
            if cancel_token.is_cancelled() {
                break;
            }

            self.route(envelope);
            routed += 1;
        }
        receiver.close();
        routed
    }

    pub fn series_snapshot(&self, symbol: &str) -> Result<SeriesSnapshot, AppError> {
        let key = symbol.trim().to_string();
        let reconciler = self
            .series
            .get(&key)
            .ok_or(AppError::UnknownSymbol(key.clone()))?;
        let snapshot = reconciler.lock().snapshot(self.interval);
        Ok(snapshot)
    }

    pub fn snapshot_all(&self) -> Vec<SeriesSnapshot> {
        self.symbols
            .iter()
            .filter_map(|symbol| self.series.get(symbol))
            .map(|reconciler| reconciler.lock().snapshot(self.interval))
            .collect()
    }

    fn emit(&self, event: MarketEvent) {
        let name = event.name();
        if self.events.send(event).is_err() {
            debug!(event = name, "no market event subscribers");
        }
    }
}
