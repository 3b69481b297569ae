use crate::market::config::{CandleInterval, HyperliquidNetwork, StartMarketFeedArgs};
use std::str::FromStr;
use tracing::warn;

pub const ENV_NETWORK: &str = "HL_NETWORK";
pub const ENV_WS_URL: &str = "HL_WS_URL";
pub const ENV_INFO_URL: &str = "HL_INFO_URL";
pub const ENV_SYMBOLS: &str = "HL_SYMBOLS";
pub const ENV_INTERVAL: &str = "HL_INTERVAL";
pub const ENV_HISTORY_WINDOW_MS: &str = "HL_HISTORY_WINDOW_MS";
pub const ENV_RECONNECT: &str = "HL_RECONNECT";
pub const ENV_RECONNECT_BASE_MS: &str = "HL_RECONNECT_BASE_MS";
pub const ENV_RECONNECT_MAX_MS: &str = "HL_RECONNECT_MAX_MS";
pub const ENV_MAX_RECONNECT_ATTEMPTS: &str = "HL_MAX_RECONNECT_ATTEMPTS";
pub const ENV_HEARTBEAT_MS: &str = "HL_HEARTBEAT_MS";
pub const ENV_QUEUE_CAPACITY: &str = "HL_QUEUE_CAPACITY";

/// Loads `.env` into the process environment when the file exists.
pub fn load_dotenv() {
    let _ = dotenv::dotenv();
}

/// Reads start args from the process environment. Range validation is left
/// to [`StartMarketFeedArgs::normalize`].
pub fn start_args_from_env() -> StartMarketFeedArgs {
    args_from_lookup(|key| std::env::var(key).ok())
}

pub fn args_from_lookup<F>(lookup: F) -> StartMarketFeedArgs
where
    F: Fn(&str) -> Option<String>,
{
    let text = |key: &str| {
        lookup(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    StartMarketFeedArgs {
        network: text(ENV_NETWORK).and_then(|value| match HyperliquidNetwork::parse_str(&value) {
            Ok(network) => Some(network),
            Err(error) => {
                warn!(key = ENV_NETWORK, error = %error, "ignoring invalid env value");
                None
            }
        }),
        ws_url: text(ENV_WS_URL),
        info_url: text(ENV_INFO_URL),
        symbols: text(ENV_SYMBOLS).map(|value| {
            value
                .split(',')
                .map(|symbol| symbol.trim().to_string())
                .filter(|symbol| !symbol.is_empty())
                .collect()
        }),
        interval: text(ENV_INTERVAL).and_then(|value| match CandleInterval::parse_str(&value) {
            Ok(interval) => Some(interval),
            Err(error) => {
                warn!(key = ENV_INTERVAL, error = %error, "ignoring invalid env value");
                None
            }
        }),
        history_window_ms: parsed(ENV_HISTORY_WINDOW_MS, text(ENV_HISTORY_WINDOW_MS)),
        reconnect_enabled: text(ENV_RECONNECT).and_then(|value| parse_flag(ENV_RECONNECT, &value)),
        reconnect_base_delay_ms: parsed(ENV_RECONNECT_BASE_MS, text(ENV_RECONNECT_BASE_MS)),
        reconnect_max_delay_ms: parsed(ENV_RECONNECT_MAX_MS, text(ENV_RECONNECT_MAX_MS)),
        max_reconnect_attempts: parsed(
            ENV_MAX_RECONNECT_ATTEMPTS,
            text(ENV_MAX_RECONNECT_ATTEMPTS),
        ),
        heartbeat_interval_ms: parsed(ENV_HEARTBEAT_MS, text(ENV_HEARTBEAT_MS)),
        queue_capacity: parsed(ENV_QUEUE_CAPACITY, text(ENV_QUEUE_CAPACITY)),
    }
}

fn parsed<T: FromStr>(key: &str, value: Option<String>) -> Option<T> {
    let value = value?;
    match value.parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key, value = %value, "ignoring unparseable env value");
            None
        }
    }
}

fn parse_flag(key: &str, value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(key, value, "ignoring unparseable env flag");
            None
        }
    }
}
