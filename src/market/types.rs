use crate::error::AppError;
use crate::market::config::CandleInterval;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const CANDLE_CHANNEL: &str = "candle";
pub const TRADES_CHANNEL: &str = "trades";
pub const SUBSCRIPTION_RESPONSE_CHANNEL: &str = "subscriptionResponse";
pub const PONG_CHANNEL: &str = "pong";
pub const RAW_CHANNEL: &str = "raw";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedConnectionState {
    Disconnected,
    Connecting,
    Open,
    Reconnecting,
    Exhausted,
    Stopped,
}

impl FeedConnectionState {
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Open)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedStatusSnapshot {
    pub state: FeedConnectionState,
    pub url: String,
    pub reconnect_attempt: u32,
    pub subscriptions: usize,
    pub frames_received: u64,
    pub raw_frames: u64,
    pub last_frame_at_ms: Option<i64>,
    pub reason: Option<String>,
}

impl FeedStatusSnapshot {
    pub fn stopped(url: String, reason: Option<String>) -> Self {
        Self {
            state: FeedConnectionState::Stopped,
            url,
            reconnect_attempt: 0,
            subscriptions: 0,
            frames_received: 0,
            raw_frames: 0,
            last_frame_at_ms: None,
            reason,
        }
    }
}

/// Canonical OHLCV bar. `timestamp` is the bar open time in epoch milliseconds
/// and is the natural key inside one symbol+interval series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandleRecord {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl CandleRecord {
    pub fn apply_trade(&mut self, price: f64, size: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += size;
    }
}

/// Decimal field as sent on the wire. Hyperliquid sends strings, but a bare
/// JSON number is accepted too.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum WireDecimal {
    Number(f64),
    Text(String),
}

impl WireDecimal {
    pub fn parse(&self) -> Result<f64, AppError> {
        match self {
            Self::Number(value) => Ok(*value),
            Self::Text(text) => Ok(text.trim().parse::<f64>()?),
        }
    }
}

impl Default for WireDecimal {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl From<&str> for WireDecimal {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Positional history row: `[timestamp, open, high, low, close, volume]`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CandleRowWire(
    pub i64,
    pub WireDecimal,
    pub WireDecimal,
    pub WireDecimal,
    pub WireDecimal,
    pub WireDecimal,
);

/// Keyed candle row as sent by the info endpoint and the `candle` channel.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CandleObjectWire {
    #[serde(rename = "t")]
    pub open_time: i64,
    #[serde(rename = "T", default)]
    pub close_time: Option<i64>,
    #[serde(rename = "s", default)]
    pub symbol: Option<String>,
    #[serde(rename = "i", default)]
    pub interval: String,
    #[serde(rename = "o", default)]
    pub open: WireDecimal,
    #[serde(rename = "c", default)]
    pub close: WireDecimal,
    #[serde(rename = "h", default)]
    pub high: WireDecimal,
    #[serde(rename = "l", default)]
    pub low: WireDecimal,
    #[serde(rename = "v", default)]
    pub volume: WireDecimal,
    #[serde(rename = "n", default)]
    pub trade_count: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawCandle {
    Row(CandleRowWire),
    Keyed(CandleObjectWire),
}

impl RawCandle {
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::Row(_) => None,
            Self::Keyed(wire) => wire.symbol.as_deref(),
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Row(wire) => wire.0,
            Self::Keyed(wire) => wire.open_time,
        }
    }
}

/// One element of a candle list. Elements matching neither row shape are kept
/// as raw JSON so the rest of the list still decodes.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CandleSlot {
    Candle(RawCandle),
    Malformed(simd_json::OwnedValue),
}

impl CandleSlot {
    pub fn into_raw(self) -> Result<RawCandle, AppError> {
        match self {
            Self::Candle(raw) => Ok(raw),
            Self::Malformed(value) => Err(AppError::InvalidArgument(format!(
                "unrecognized candle row: {value}"
            ))),
        }
    }
}

fn parse_decimal_fields(
    timestamp: i64,
    open: &WireDecimal,
    high: &WireDecimal,
    low: &WireDecimal,
    close: &WireDecimal,
    volume: &WireDecimal,
) -> Result<CandleRecord, AppError> {
    let open = open.parse()?;
    let high = high.parse()?;
    let low = low.parse()?;
    let close = close.parse()?;
    let volume = volume.parse()?;

    if !open.is_finite()
        || !high.is_finite()
        || !low.is_finite()
        || !close.is_finite()
        || !volume.is_finite()
    {
        return Err(AppError::InvalidArgument(
            "candle values must be finite".to_string(),
        ));
    }
    if volume < 0.0 {
        return Err(AppError::InvalidArgument(
            "candle volume must be non-negative".to_string(),
        ));
    }

    Ok(CandleRecord {
        timestamp,
        open,
        high,
        low,
        close,
        volume,
    })
}

impl TryFrom<CandleRowWire> for CandleRecord {
    type Error = AppError;

    fn try_from(value: CandleRowWire) -> Result<Self, Self::Error> {
        parse_decimal_fields(value.0, &value.1, &value.2, &value.3, &value.4, &value.5)
    }
}

impl TryFrom<CandleObjectWire> for CandleRecord {
    type Error = AppError;

    fn try_from(value: CandleObjectWire) -> Result<Self, Self::Error> {
        parse_decimal_fields(
            value.open_time,
            &value.open,
            &value.high,
            &value.low,
            &value.close,
            &value.volume,
        )
    }
}

pub fn normalize(raw: RawCandle) -> Result<CandleRecord, AppError> {
    match raw {
        RawCandle::Row(wire) => wire.try_into(),
        RawCandle::Keyed(wire) => wire.try_into(),
    }
}

/// Normalizes in input order. Rows that fail to decode or parse are logged and
/// left out.
pub fn normalize_many(slots: Vec<CandleSlot>) -> Vec<CandleRecord> {
    let mut records = Vec::with_capacity(slots.len());
    for slot in slots {
        match slot.into_raw().and_then(normalize) {
            Ok(record) => records.push(record),
            Err(error) => warn!(error = %error, "skipping malformed candle row"),
        }
    }
    records
}

/// The shapes a `candle` channel payload arrives in. `Single` is tried first so
/// a lone positional row is not mistaken for a list.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CandlePayload {
    Single(RawCandle),
    Rows(Vec<CandleSlot>),
    Nested {
        candles: Vec<CandleSlot>,
        #[serde(default, alias = "coin")]
        s: Option<String>,
    },
}

impl CandlePayload {
    /// Splits the payload into its payload-level symbol (if any) and its rows.
    pub fn into_parts(self) -> (Option<String>, Vec<CandleSlot>) {
        match self {
            Self::Single(row) => (None, vec![CandleSlot::Candle(row)]),
            Self::Rows(rows) => (None, rows),
            Self::Nested { candles, s } => (s, candles),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TradeWire {
    #[serde(default)]
    pub coin: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub px: String,
    #[serde(default)]
    pub sz: String,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub tid: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trade {
    pub price: f64,
    pub size: f64,
}

impl TryFrom<&TradeWire> for Trade {
    type Error = AppError;

    fn try_from(value: &TradeWire) -> Result<Self, Self::Error> {
        let price = value.px.trim().parse::<f64>()?;
        let size = value.sz.trim().parse::<f64>()?;
        if !price.is_finite() || !size.is_finite() || size < 0.0 {
            return Err(AppError::InvalidArgument(
                "trade price/size must be finite and size non-negative".to_string(),
            ));
        }
        Ok(Self { price, size })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Subscription {
    Candle {
        coin: String,
        interval: CandleInterval,
    },
    Trades {
        coin: String,
    },
}

impl Subscription {
    pub fn coin(&self) -> &str {
        match self {
            Self::Candle { coin, .. } | Self::Trades { coin } => coin,
        }
    }
}

#[derive(Debug, Serialize)]
struct SubscribeRequest<'a> {
    method: &'static str,
    subscription: &'a Subscription,
}

#[derive(Debug, Serialize)]
struct PingRequest {
    method: &'static str,
}

pub fn subscribe_frame(subscription: &Subscription) -> Result<String, AppError> {
    let request = SubscribeRequest {
        method: "subscribe",
        subscription,
    };
    Ok(simd_json::serde::to_string(&request)?)
}

pub fn ping_frame() -> Result<String, AppError> {
    Ok(simd_json::serde::to_string(&PingRequest { method: "ping" })?)
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SubscriptionAck {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub subscription: Option<Subscription>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub channel: Option<String>,
    pub payload: String,
    pub reason: String,
}

/// One decoded live-channel frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEnvelope {
    Candle(CandlePayload),
    Trades(Vec<TradeWire>),
    SubscriptionResponse(SubscriptionAck),
    Pong,
    Raw(RawFrame),
}

impl FeedEnvelope {
    pub fn channel(&self) -> &str {
        match self {
            Self::Candle(_) => CANDLE_CHANNEL,
            Self::Trades(_) => TRADES_CHANNEL,
            Self::SubscriptionResponse(_) => SUBSCRIPTION_RESPONSE_CHANNEL,
            Self::Pong => PONG_CHANNEL,
            Self::Raw(_) => RAW_CHANNEL,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EnvelopeWire {
    channel: String,
    #[serde(default)]
    data: simd_json::OwnedValue,
}

fn decode_data<T>(data: simd_json::OwnedValue) -> Result<T, AppError>
where
    T: serde::de::DeserializeOwned,
{
    Ok(simd_json::serde::from_owned_value(data)?)
}

/// Decodes one inbound frame. Never fails: anything that does not match a known
/// channel shape comes back as [`FeedEnvelope::Raw`] carrying the frame text.
pub fn decode_envelope(frame: &[u8]) -> FeedEnvelope {
    let raw = |channel: Option<String>, reason: String| {
        FeedEnvelope::Raw(RawFrame {
            channel,
            payload: String::from_utf8_lossy(frame).into_owned(),
            reason,
        })
    };

    let mut scratch = frame.to_vec();
    let wire = match simd_json::serde::from_slice::<EnvelopeWire>(scratch.as_mut_slice()) {
        Ok(wire) => wire,
        Err(error) => return raw(None, format!("undecodable frame: {error}")),
    };
    let EnvelopeWire { channel, data } = wire;

    let decoded = match channel.as_str() {
        CANDLE_CHANNEL => decode_data::<CandlePayload>(data).map(FeedEnvelope::Candle),
        TRADES_CHANNEL => decode_data::<Vec<TradeWire>>(data).map(FeedEnvelope::Trades),
        SUBSCRIPTION_RESPONSE_CHANNEL => {
            decode_data::<SubscriptionAck>(data).map(FeedEnvelope::SubscriptionResponse)
        }
        PONG_CHANNEL => Ok(FeedEnvelope::Pong),
        _ => return raw(Some(channel), "unhandled channel".to_string()),
    };

    match decoded {
        Ok(envelope) => envelope,
        Err(error) => raw(
            Some(channel),
            format!("payload does not match channel shape: {error}"),
        ),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeriesSnapshot {
    pub symbol: String,
    pub interval: CandleInterval,
    pub candles: Vec<CandleRecord>,
    pub current: Option<CandleRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandlesBootstrap {
    pub symbol: String,
    pub interval: CandleInterval,
    pub candles: Vec<CandleRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandleUpdate {
    pub symbol: String,
    pub interval: CandleInterval,
    pub candle: CandleRecord,
    pub len: usize,
}

/// Events published to renderers and other observers.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum MarketEvent {
    CandlesBootstrap(CandlesBootstrap),
    CandleUpdate(CandleUpdate),
    MarketStatus(FeedStatusSnapshot),
}

impl MarketEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CandlesBootstrap(_) => super::CANDLES_BOOTSTRAP_EVENT,
            Self::CandleUpdate(_) => super::CANDLE_UPDATE_EVENT,
            Self::MarketStatus(_) => super::MARKET_STATUS_EVENT,
        }
    }
}
