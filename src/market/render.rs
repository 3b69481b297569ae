use crate::market::types::{CandleRecord, MarketEvent};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderAction {
    Replaced { symbol: String, len: usize },
    Patched { symbol: String, len: usize },
    Resync { symbol: String, expected: usize, found: usize },
    Status,
}

/// Renderer-side copy of every series, kept in step with the event bus.
/// Bootstrap events replace a series, updates upsert one candle, and any
/// length jump asks the caller to bulk-replace from a fresh snapshot.
#[derive(Debug, Default)]
pub struct RenderMirror {
    series: HashMap<String, Vec<CandleRecord>>,
}

impl RenderMirror {
    pub fn candles(&self, symbol: &str) -> &[CandleRecord] {
        self.series
            .get(symbol)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn replace(&mut self, symbol: &str, candles: Vec<CandleRecord>) -> RenderAction {
        let len = candles.len();
        self.series.insert(symbol.to_string(), candles);
        RenderAction::Replaced {
            symbol: symbol.to_string(),
            len,
        }
    }

    pub fn apply(&mut self, event: &MarketEvent) -> RenderAction {
        match event {
            MarketEvent::CandlesBootstrap(bootstrap) => {
                self.replace(&bootstrap.symbol, bootstrap.candles.clone())
            }
            MarketEvent::CandleUpdate(update) => {
                let local = self.series.entry(update.symbol.clone()).or_default();
                let same_bar = local
                    .last()
                    .map(|last| last.timestamp == update.candle.timestamp)
                    .unwrap_or(false);

                if update.len == local.len() && same_bar {
                    if let Some(last) = local.last_mut() {
                        *last = update.candle;
                    }
                } else if update.len == local.len() + 1 && !same_bar {
                    local.push(update.candle);
                } else {
                    return RenderAction::Resync {
                        symbol: update.symbol.clone(),
                        expected: local.len(),
                        found: update.len,
                    };
                }

                RenderAction::Patched {
                    symbol: update.symbol.clone(),
                    len: local.len(),
                }
            }
            MarketEvent::MarketStatus(_) => RenderAction::Status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::config::CandleInterval;
    use crate::market::types::{CandleUpdate, CandlesBootstrap, FeedStatusSnapshot};

    fn bar(timestamp: i64, close: f64) -> CandleRecord {
        CandleRecord {
            timestamp,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    fn update(timestamp: i64, close: f64, len: usize) -> MarketEvent {
        MarketEvent::CandleUpdate(CandleUpdate {
            symbol: "BTC".to_string(),
            interval: CandleInterval::M1,
            candle: bar(timestamp, close),
            len,
        })
    }

    fn mirror() -> RenderMirror {
        let mut mirror = RenderMirror::default();
        mirror.apply(&MarketEvent::CandlesBootstrap(CandlesBootstrap {
            symbol: "BTC".to_string(),
            interval: CandleInterval::M1,
            candles: vec![bar(100, 1.0), bar(200, 2.0)],
        }));
        mirror
    }

    #[test]
    fn patches_same_bar_and_appends_next_bar() {
        let mut mirror = mirror();

        assert_eq!(
            mirror.apply(&update(200, 5.0, 2)),
            RenderAction::Patched {
                symbol: "BTC".to_string(),
                len: 2
            }
        );
        assert_eq!(mirror.candles("BTC")[1].close, 5.0);

        mirror.apply(&update(300, 6.0, 3));
        assert_eq!(mirror.candles("BTC").len(), 3);
        assert_eq!(mirror.candles("BTC")[2].timestamp, 300);
    }

    #[test]
    fn unexpected_length_requests_resync_without_touching_the_copy() {
        let mut mirror = mirror();

        assert_eq!(
            mirror.apply(&update(500, 9.0, 7)),
            RenderAction::Resync {
                symbol: "BTC".to_string(),
                expected: 2,
                found: 7
            }
        );
        assert_eq!(mirror.candles("BTC").len(), 2);

        mirror.replace("BTC", vec![bar(500, 9.0)]);
        assert_eq!(mirror.candles("BTC"), &[bar(500, 9.0)]);
    }

    #[test]
    fn status_events_leave_series_alone() {
        let mut mirror = mirror();
        let action = mirror.apply(&MarketEvent::MarketStatus(FeedStatusSnapshot::stopped(
            String::new(),
            None,
        )));

        assert_eq!(action, RenderAction::Status);
        assert!(mirror.candles("ETH").is_empty());
    }
}
