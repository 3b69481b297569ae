use crate::market::config::CandleInterval;
use crate::market::types::{CandleRecord, SeriesSnapshot, Trade, TradeWire};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CandleApplyOutcome {
    Appended { len: usize },
    Replaced { len: usize },
    Stale { timestamp: i64, last: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeFoldOutcome {
    Folded { folded: usize, skipped: usize },
    NoCurrentBar { dropped: usize },
}

/// Owns the ordered bar sequence of one symbol. The in-progress bar is always
/// the last element, so there is no separate copy to keep in sync.
#[derive(Debug, Clone)]
pub struct SeriesReconciler {
    symbol: String,
    bars: Vec<CandleRecord>,
}

impl SeriesReconciler {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bars: Vec::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[CandleRecord] {
        &self.bars
    }

    pub fn current(&self) -> Option<&CandleRecord> {
        self.bars.last()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Replaces all prior state with `records`. Callers pass time-ordered data.
    pub fn seed(&mut self, records: Vec<CandleRecord>) {
        self.bars = records;
    }

    /// Merges one candle-channel bar. An equal timestamp overwrites the last bar,
    /// including any trade folds applied to it since.
    pub fn apply_candle_update(&mut self, record: CandleRecord) -> CandleApplyOutcome {
        let Some(last) = self.bars.last().map(|bar| bar.timestamp) else {
            self.bars.push(record);
            return CandleApplyOutcome::Appended { len: 1 };
        };

        if record.timestamp == last {
            if let Some(current) = self.bars.last_mut() {
                *current = record;
            }
            return CandleApplyOutcome::Replaced {
                len: self.bars.len(),
            };
        }

        if record.timestamp < last {
            warn!(
                symbol = %self.symbol,
                timestamp = record.timestamp,
                last,
                "dropping candle update older than the current bar"
            );
            return CandleApplyOutcome::Stale {
                timestamp: record.timestamp,
                last,
            };
        }

        self.bars.push(record);
        CandleApplyOutcome::Appended {
            len: self.bars.len(),
        }
    }

    /// Folds one trade into the current bar. Returns false when there is no bar.
    pub fn apply_trade(&mut self, price: f64, size: f64) -> bool {
        match self.bars.last_mut() {
            Some(current) => {
                current.apply_trade(price, size);
                true
            }
            None => false,
        }
    }

    /// Folds a trade batch in delivery order. Malformed ticks are skipped one by one.
    pub fn apply_trades(&mut self, trades: &[TradeWire]) -> TradeFoldOutcome {
        if self.bars.is_empty() {
            return TradeFoldOutcome::NoCurrentBar {
                dropped: trades.len(),
            };
        }

        let mut folded = 0_usize;
        let mut skipped = 0_usize;
        for wire in trades {
            match Trade::try_from(wire) {
                Ok(trade) => {
                    if self.apply_trade(trade.price, trade.size) {
                        folded += 1;
                    }
                }
                Err(error) => {
                    skipped += 1;
                    warn!(
                        symbol = %self.symbol,
                        tid = wire.tid,
                        error = %error,
                        "skipping malformed trade"
                    );
                }
            }
        }

        TradeFoldOutcome::Folded { folded, skipped }
    }

    pub fn snapshot(&self, interval: CandleInterval) -> SeriesSnapshot {
        SeriesSnapshot {
            symbol: self.symbol.clone(),
            interval,
            candles: self.bars.clone(),
            current: self.current().copied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(timestamp: i64, close: f64) -> CandleRecord {
        CandleRecord {
            timestamp,
            open: close - 1.0,
            high: close + 0.5,
            low: close - 1.5,
            close,
            volume: 4.0,
        }
    }

    fn trade(px: &str, sz: &str) -> TradeWire {
        TradeWire {
            coin: "BTC".to_string(),
            side: "B".to_string(),
            px: px.to_string(),
            sz: sz.to_string(),
            time: 0,
            tid: 0,
        }
    }

    fn seeded() -> SeriesReconciler {
        let mut series = SeriesReconciler::new("BTC");
        series.seed(vec![bar(100, 10.0), bar(200, 11.0), bar(300, 12.0)]);
        series
    }

    #[test]
    fn seed_replaces_state_and_sets_current() {
        let mut series = seeded();
        assert_eq!(series.len(), 3);
        assert_eq!(series.current().map(|bar| bar.timestamp), Some(300));

        series.seed(vec![bar(500, 1.0)]);
        assert_eq!(series.bars(), &[bar(500, 1.0)]);

        series.seed(Vec::new());
        assert!(series.is_empty());
        assert!(series.current().is_none());
    }

    #[test]
    fn update_on_empty_series_appends() {
        let mut series = SeriesReconciler::new("ETH");
        let outcome = series.apply_candle_update(bar(100, 10.0));

        assert_eq!(outcome, CandleApplyOutcome::Appended { len: 1 });
        assert_eq!(series.current(), Some(&bar(100, 10.0)));
    }

    #[test]
    fn greater_timestamp_grows_by_exactly_one() {
        let mut series = seeded();
        let outcome = series.apply_candle_update(bar(400, 13.0));

        assert_eq!(outcome, CandleApplyOutcome::Appended { len: 4 });
        assert_eq!(series.len(), 4);
        assert_eq!(series.current().map(|bar| bar.timestamp), Some(400));
    }

    #[test]
    fn equal_timestamp_replaces_last_bar_in_place() {
        let mut series = seeded();
        let mut first = bar(300, 18.0);
        first.volume = 7.0;
        let mut second = bar(300, 20.0);
        second.high = 21.0;
        second.low = 9.0;
        second.volume = 9.0;

        series.apply_candle_update(first);
        let outcome = series.apply_candle_update(second);

        assert_eq!(outcome, CandleApplyOutcome::Replaced { len: 3 });
        assert_eq!(series.len(), 3);
        assert_eq!(series.bars()[2], second);
        assert_eq!(series.current(), Some(&second));
    }

    #[test]
    fn older_timestamp_is_dropped() {
        let mut series = seeded();
        let before = series.bars().to_vec();

        let outcome = series.apply_candle_update(bar(200, 99.0));

        assert_eq!(
            outcome,
            CandleApplyOutcome::Stale {
                timestamp: 200,
                last: 300
            }
        );
        assert_eq!(series.bars(), before.as_slice());
    }

    #[test]
    fn trade_folds_into_last_bar_only() {
        let mut series = seeded();
        let before = *series.current().expect("seeded series has a current bar");

        assert!(series.apply_trade(15.0, 2.0));

        let current = *series.current().expect("current bar should remain");
        assert_eq!(current.timestamp, 300);
        assert_eq!(current.open, before.open);
        assert_eq!(current.close, 15.0);
        assert_eq!(current.high, 15.0);
        assert_eq!(current.low, before.low.min(15.0));
        assert_eq!(current.volume, before.volume + 2.0);
        assert_eq!(series.bars()[2], current);
        assert_eq!(series.bars()[0], bar(100, 10.0));
        assert_eq!(series.bars()[1], bar(200, 11.0));
    }

    #[test]
    fn trade_sequence_tracks_extremes_last_price_and_volume_sum() {
        let mut series = seeded();
        let before = *series.current().expect("seeded series has a current bar");
        let prices = [12.2, 9.0, 14.0, 11.1];
        let sizes = [0.5, 1.5, 0.25, 2.0];

        for (price, size) in prices.iter().zip(sizes.iter()) {
            series.apply_trade(*price, *size);
        }

        let current = series.current().expect("current bar should remain");
        let max_price = prices.iter().copied().fold(before.high, f64::max);
        let min_price = prices.iter().copied().fold(before.low, f64::min);
        assert_eq!(current.high, max_price);
        assert_eq!(current.low, min_price);
        assert_eq!(current.close, 11.1);
        assert_eq!(current.volume, before.volume + sizes.iter().sum::<f64>());
    }

    #[test]
    fn trade_without_current_bar_is_a_no_op() {
        let mut series = SeriesReconciler::new("SOL");

        assert!(!series.apply_trade(15.0, 2.0));
        assert_eq!(
            series.apply_trades(&[trade("15", "2")]),
            TradeFoldOutcome::NoCurrentBar { dropped: 1 }
        );
        assert!(series.is_empty());
    }

    #[test]
    fn trade_batch_skips_malformed_ticks_and_keeps_folding() {
        let mut series = seeded();
        let outcome = series.apply_trades(&[trade("13", "1"), trade("abc", "1"), trade("11", "0.5")]);

        assert_eq!(
            outcome,
            TradeFoldOutcome::Folded {
                folded: 2,
                skipped: 1
            }
        );
        let current = series.current().expect("current bar should remain");
        assert_eq!(current.close, 11.0);
        assert_eq!(current.high, 13.0);
        assert_eq!(current.volume, 5.5);
    }

    #[test]
    fn reference_scenario_trade_then_replace_then_append() {
        let mut series = seeded();

        series.apply_trade(15.0, 2.0);
        let folded = *series.current().expect("current bar should remain");
        assert_eq!(folded.close, 15.0);
        assert_eq!(folded.high, 15.0);
        assert_eq!(folded.volume, 6.0);

        let replacement = bar(300, 20.0);
        series.apply_candle_update(replacement);
        assert_eq!(series.len(), 3);
        assert_eq!(series.bars()[2], replacement);

        series.apply_candle_update(bar(400, 21.0));
        assert_eq!(series.len(), 4);
        assert_eq!(series.current().map(|bar| bar.timestamp), Some(400));
    }

    #[test]
    fn snapshot_mirrors_bars_and_current() {
        let series = seeded();
        let snapshot = series.snapshot(CandleInterval::M1);

        assert_eq!(snapshot.symbol, "BTC");
        assert_eq!(snapshot.candles.len(), 3);
        assert_eq!(snapshot.current, Some(bar(300, 12.0)));
    }
}
