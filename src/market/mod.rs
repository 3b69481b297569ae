use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;
pub mod coordinator;
pub mod feed;
pub mod hyperliquid;
pub mod pipeline;
pub mod render;
pub mod series;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;

pub const MARKET_STATUS_EVENT: &str = "market_status";
pub const CANDLE_UPDATE_EVENT: &str = "candle_update";
pub const CANDLES_BOOTSTRAP_EVENT: &str = "candles_bootstrap";

pub(crate) fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}
