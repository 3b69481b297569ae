use crate::error::AppError;
use crate::market::hyperliquid::{
    MAINNET_INFO_URL, MAINNET_WS_URL, TESTNET_INFO_URL, TESTNET_WS_URL,
};
use crate::market::types::Subscription;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SYMBOLS: [&str; 4] = ["BTC", "ETH", "SOL", "AVAX"];
pub const DEFAULT_NETWORK: HyperliquidNetwork = HyperliquidNetwork::Mainnet;
pub const DEFAULT_INTERVAL: CandleInterval = CandleInterval::M1;
pub const DEFAULT_HISTORY_WINDOW_MS: i64 = 24 * 60 * 60 * 1_000;
pub const DEFAULT_RECONNECT_ENABLED: bool = true;
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 10_000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 50_000;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1_024;
pub const MIN_HISTORY_WINDOW_MS: i64 = 60_000;
pub const MAX_HISTORY_WINDOW_MS: i64 = 31 * 24 * 60 * 60 * 1_000;
pub const MIN_RECONNECT_DELAY_MS: u64 = 1;
pub const MAX_RECONNECT_DELAY_MS: u64 = 300_000;
pub const MAX_RECONNECT_ATTEMPTS: u32 = 1_000;
pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 5_000;
pub const MAX_HEARTBEAT_INTERVAL_MS: u64 = 120_000;
pub const MIN_QUEUE_CAPACITY: usize = 16;
pub const MAX_QUEUE_CAPACITY: usize = 65_536;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HyperliquidNetwork {
    Mainnet,
    Testnet,
}

impl HyperliquidNetwork {
    pub fn parse_str(value: &str) -> Result<Self, AppError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            other => Err(AppError::InvalidArgument(format!(
                "unknown network '{other}', expected mainnet or testnet"
            ))),
        }
    }

    pub fn ws_url(self) -> &'static str {
        match self {
            Self::Mainnet => MAINNET_WS_URL,
            Self::Testnet => TESTNET_WS_URL,
        }
    }

    pub fn info_url(self) -> &'static str {
        match self {
            Self::Mainnet => MAINNET_INFO_URL,
            Self::Testnet => TESTNET_INFO_URL,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CandleInterval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "8h")]
    H8,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "3d")]
    D3,
    #[serde(rename = "1w")]
    W1,
    #[serde(rename = "1M")]
    Mo1,
}

impl CandleInterval {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::H8 => "8h",
            Self::H12 => "12h",
            Self::D1 => "1d",
            Self::D3 => "3d",
            Self::W1 => "1w",
            Self::Mo1 => "1M",
        }
    }

    // "1M" (month) and "1m" (minute) differ only by case, so matching is exact.
    pub fn parse_str(value: &str) -> Result<Self, AppError> {
        let interval = match value.trim() {
            "1m" => Self::M1,
            "3m" => Self::M3,
            "5m" => Self::M5,
            "15m" => Self::M15,
            "30m" => Self::M30,
            "1h" => Self::H1,
            "2h" => Self::H2,
            "4h" => Self::H4,
            "8h" => Self::H8,
            "12h" => Self::H12,
            "1d" => Self::D1,
            "3d" => Self::D3,
            "1w" => Self::W1,
            "1M" => Self::Mo1,
            other => {
                return Err(AppError::InvalidArgument(format!(
                    "unsupported candle interval '{other}'"
                )))
            }
        };
        Ok(interval)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartMarketFeedArgs {
    pub network: Option<HyperliquidNetwork>,
    pub ws_url: Option<String>,
    pub info_url: Option<String>,
    pub symbols: Option<Vec<String>>,
    pub interval: Option<CandleInterval>,
    pub history_window_ms: Option<i64>,
    pub reconnect_enabled: Option<bool>,
    pub reconnect_base_delay_ms: Option<u64>,
    pub reconnect_max_delay_ms: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
    pub heartbeat_interval_ms: Option<u64>,
    pub queue_capacity: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct MarketFeedConfig {
    pub network: HyperliquidNetwork,
    pub ws_url: String,
    pub info_url: String,
    pub symbols: Vec<String>,
    pub interval: CandleInterval,
    pub history_window_ms: i64,
    pub reconnect_enabled: bool,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval_ms: u64,
    pub queue_capacity: usize,
}

impl MarketFeedConfig {
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.symbols
            .iter()
            .flat_map(|symbol| {
                [
                    Subscription::Candle {
                        coin: symbol.clone(),
                        interval: self.interval,
                    },
                    Subscription::Trades {
                        coin: symbol.clone(),
                    },
                ]
            })
            .collect()
    }
}

impl StartMarketFeedArgs {
    pub fn normalize(self) -> Result<MarketFeedConfig, AppError> {
        let network = self.network.unwrap_or(DEFAULT_NETWORK);

        let ws_url = normalize_url(self.ws_url, network.ws_url(), &["ws://", "wss://"], "wsUrl")?;
        let info_url = normalize_url(
            self.info_url,
            network.info_url(),
            &["http://", "https://"],
            "infoUrl",
        )?;

        let symbols = normalize_symbols(self.symbols)?;

        let interval = self.interval.unwrap_or(DEFAULT_INTERVAL);
        let history_window_ms = self.history_window_ms.unwrap_or(DEFAULT_HISTORY_WINDOW_MS);
        if !(MIN_HISTORY_WINDOW_MS..=MAX_HISTORY_WINDOW_MS).contains(&history_window_ms) {
            return Err(AppError::InvalidArgument(format!(
                "historyWindowMs must be between {MIN_HISTORY_WINDOW_MS} and {MAX_HISTORY_WINDOW_MS}"
            )));
        }

        let reconnect_enabled = self.reconnect_enabled.unwrap_or(DEFAULT_RECONNECT_ENABLED);
        let reconnect_base_delay_ms = self
            .reconnect_base_delay_ms
            .unwrap_or(DEFAULT_RECONNECT_BASE_DELAY_MS);
        let reconnect_max_delay_ms = self
            .reconnect_max_delay_ms
            .unwrap_or(DEFAULT_RECONNECT_MAX_DELAY_MS);
        if !(MIN_RECONNECT_DELAY_MS..=MAX_RECONNECT_DELAY_MS).contains(&reconnect_base_delay_ms)
            || !(MIN_RECONNECT_DELAY_MS..=MAX_RECONNECT_DELAY_MS)
                .contains(&reconnect_max_delay_ms)
        {
            return Err(AppError::InvalidArgument(format!(
                "reconnect delays must be between {MIN_RECONNECT_DELAY_MS} and {MAX_RECONNECT_DELAY_MS}"
            )));
        }
        if reconnect_max_delay_ms < reconnect_base_delay_ms {
            return Err(AppError::InvalidArgument(
                "reconnectMaxDelayMs must not be lower than reconnectBaseDelayMs".to_string(),
            ));
        }

        let max_reconnect_attempts = self
            .max_reconnect_attempts
            .unwrap_or(DEFAULT_MAX_RECONNECT_ATTEMPTS);
        if max_reconnect_attempts > MAX_RECONNECT_ATTEMPTS {
            return Err(AppError::InvalidArgument(format!(
                "maxReconnectAttempts must not exceed {MAX_RECONNECT_ATTEMPTS}"
            )));
        }

        let heartbeat_interval_ms = self
            .heartbeat_interval_ms
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);
        if !(MIN_HEARTBEAT_INTERVAL_MS..=MAX_HEARTBEAT_INTERVAL_MS).contains(&heartbeat_interval_ms)
        {
            return Err(AppError::InvalidArgument(format!(
                "heartbeatIntervalMs must be between {MIN_HEARTBEAT_INTERVAL_MS} and {MAX_HEARTBEAT_INTERVAL_MS}"
            )));
        }

        let queue_capacity = self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY);
        if !(MIN_QUEUE_CAPACITY..=MAX_QUEUE_CAPACITY).contains(&queue_capacity) {
            return Err(AppError::InvalidArgument(format!(
                "queueCapacity must be between {MIN_QUEUE_CAPACITY} and {MAX_QUEUE_CAPACITY}"
            )));
        }

        Ok(MarketFeedConfig {
            network,
            ws_url,
            info_url,
            symbols,
            interval,
            history_window_ms,
            reconnect_enabled,
            reconnect_base_delay_ms,
            reconnect_max_delay_ms,
            max_reconnect_attempts,
            heartbeat_interval_ms,
            queue_capacity,
        })
    }
}

fn normalize_url(
    value: Option<String>,
    default: &str,
    schemes: &[&str],
    field: &str,
) -> Result<String, AppError> {
    let url = value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .unwrap_or_else(|| default.to_string());

    if !schemes.iter().any(|scheme| url.starts_with(scheme)) {
        return Err(AppError::InvalidArgument(format!(
            "{field} must start with one of {}",
            schemes.join(", ")
        )));
    }
    Ok(url)
}

fn normalize_symbols(symbols: Option<Vec<String>>) -> Result<Vec<String>, AppError> {
    let raw = symbols.unwrap_or_else(|| DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect());

    let mut normalized: Vec<String> = Vec::with_capacity(raw.len());
    for symbol in raw {
        let symbol = symbol.trim().to_string();
        if symbol.is_empty() || !symbol.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(AppError::InvalidArgument(format!(
                "symbol '{symbol}' must be non-empty alphanumeric ASCII"
            )));
        }
        if !normalized.contains(&symbol) {
            normalized.push(symbol);
        }
    }

    if normalized.is_empty() {
        return Err(AppError::InvalidArgument(
            "at least one symbol must be tracked".to_string(),
        ));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_start_args_defaults() {
        let config = StartMarketFeedArgs::default()
            .normalize()
            .expect("defaults should be valid");

        assert_eq!(config.network, DEFAULT_NETWORK);
        assert_eq!(config.ws_url, MAINNET_WS_URL);
        assert_eq!(config.info_url, MAINNET_INFO_URL);
        assert_eq!(config.symbols, vec!["BTC", "ETH", "SOL", "AVAX"]);
        assert_eq!(config.interval, DEFAULT_INTERVAL);
        assert_eq!(config.history_window_ms, DEFAULT_HISTORY_WINDOW_MS);
        assert_eq!(config.reconnect_enabled, DEFAULT_RECONNECT_ENABLED);
        assert_eq!(config.max_reconnect_attempts, DEFAULT_MAX_RECONNECT_ATTEMPTS);
        assert_eq!(config.heartbeat_interval_ms, DEFAULT_HEARTBEAT_INTERVAL_MS);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn testnet_selects_testnet_endpoints_unless_overridden() {
        let config = StartMarketFeedArgs {
            network: Some(HyperliquidNetwork::Testnet),
            ..Default::default()
        }
        .normalize()
        .expect("testnet should be valid");
        assert_eq!(config.ws_url, TESTNET_WS_URL);
        assert_eq!(config.info_url, TESTNET_INFO_URL);

        let overridden = StartMarketFeedArgs {
            network: Some(HyperliquidNetwork::Testnet),
            ws_url: Some(" ws://127.0.0.1:9000/ws ".to_string()),
            ..Default::default()
        }
        .normalize()
        .expect("override should be valid");
        assert_eq!(overridden.ws_url, "ws://127.0.0.1:9000/ws");
        assert_eq!(overridden.info_url, TESTNET_INFO_URL);
    }

    #[test]
    fn trims_and_dedups_symbols_keeping_case() {
        let config = StartMarketFeedArgs {
            symbols: Some(vec![
                "ETH".to_string(),
                " kPEPE ".to_string(),
                "ETH".to_string(),
                "KPEPE".to_string(),
            ]),
            ..Default::default()
        }
        .normalize()
        .expect("symbols should be valid");

        assert_eq!(config.symbols, vec!["ETH", "kPEPE", "KPEPE"]);
    }

    #[test]
    fn rejects_invalid_symbols() {
        let result = StartMarketFeedArgs {
            symbols: Some(vec!["BTC-PERP".to_string()]),
            ..Default::default()
        }
        .normalize();
        assert!(result.is_err());

        let empty = StartMarketFeedArgs {
            symbols: Some(Vec::new()),
            ..Default::default()
        }
        .normalize();
        assert!(empty.is_err());
    }

    #[test]
    fn rejects_non_websocket_url() {
        let result = StartMarketFeedArgs {
            ws_url: Some("https://api.hyperliquid.xyz/ws".to_string()),
            ..Default::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    #[test]
    fn validates_reconnect_delay_ordering() {
        let result = StartMarketFeedArgs {
            reconnect_base_delay_ms: Some(5_000),
            reconnect_max_delay_ms: Some(1_000),
            ..Default::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    #[test]
    fn validates_history_window_range() {
        let result = StartMarketFeedArgs {
            history_window_ms: Some(1_000),
            ..Default::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    #[test]
    fn builds_candle_and_trades_subscription_per_symbol() {
        let config = StartMarketFeedArgs {
            symbols: Some(vec!["BTC".to_string(), "ETH".to_string()]),
            interval: Some(CandleInterval::M5),
            ..Default::default()
        }
        .normalize()
        .expect("config should be valid");

        let subscriptions = config.subscriptions();
        assert_eq!(
            subscriptions,
            vec![
                Subscription::Candle {
                    coin: "BTC".to_string(),
                    interval: CandleInterval::M5
                },
                Subscription::Trades {
                    coin: "BTC".to_string()
                },
                Subscription::Candle {
                    coin: "ETH".to_string(),
                    interval: CandleInterval::M5
                },
                Subscription::Trades {
                    coin: "ETH".to_string()
                },
            ]
        );
    }

    #[test]
    fn parses_interval_case_sensitively() {
        assert_eq!(CandleInterval::parse_str("1m").ok(), Some(CandleInterval::M1));
        assert_eq!(CandleInterval::parse_str("1M").ok(), Some(CandleInterval::Mo1));
        assert!(CandleInterval::parse_str("7m").is_err());
    }
}
