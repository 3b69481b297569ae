use crate::error::AppError;
use crate::market::config::CandleInterval;
use crate::market::types::{normalize_many, CandleRecord, CandleSlot};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

pub const MAINNET_WS_URL: &str = "wss://api.hyperliquid.xyz/ws";
pub const TESTNET_WS_URL: &str = "wss://api.hyperliquid-testnet.xyz/ws";
pub const MAINNET_INFO_URL: &str = "https://api.hyperliquid.xyz/info";
pub const TESTNET_INFO_URL: &str = "https://api.hyperliquid-testnet.xyz/info";
const CANDLE_SNAPSHOT_REQUEST: &str = "candleSnapshot";

pub type HyperliquidWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn connect_feed_stream(url: &str) -> Result<HyperliquidWsStream, AppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(64 << 20),
        max_frame_size: Some(16 << 20),
        ..Default::default()
    };

    let (stream, _) = connect_async_with_config(url, Some(ws_config), true).await?;
    Ok(stream)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CandleSnapshotParams<'a> {
    coin: &'a str,
    interval: CandleInterval,
    start_time: i64,
    end_time: i64,
}

#[derive(Debug, Serialize)]
struct CandleSnapshotRequest<'a> {
    #[serde(rename = "type")]
    request_type: &'static str,
    req: CandleSnapshotParams<'a>,
}

pub fn candle_snapshot_body(
    symbol: &str,
    interval: CandleInterval,
    start_time: i64,
    end_time: i64,
) -> Result<Vec<u8>, AppError> {
    let request = CandleSnapshotRequest {
        request_type: CANDLE_SNAPSHOT_REQUEST,
        req: CandleSnapshotParams {
            coin: symbol,
            interval,
            start_time,
            end_time,
        },
    };
    Ok(simd_json::serde::to_string(&request)?.into_bytes())
}

/// Error body the relay hands back when the upstream call fails.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayErrorPayload {
    pub error: String,
    pub details: String,
}

pub fn relay_error_payload(error: &AppError) -> RelayErrorPayload {
    match error {
        AppError::Upstream { status, details } => RelayErrorPayload {
            error: format!("Hyperliquid API error: {status}"),
            details: details.clone(),
        },
        other => RelayErrorPayload {
            error: "Failed to fetch data from Hyperliquid".to_string(),
            details: other.to_string(),
        },
    }
}

/// Forwards an info request body unchanged and returns the upstream body
/// unchanged. Non-2xx responses become [`AppError::Upstream`] with the body text.
pub async fn relay_info_request(
    client: &Client,
    info_url: &str,
    body: Vec<u8>,
) -> Result<Vec<u8>, AppError> {
    let response = client
        .post(info_url)
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let details = response
            .text()
            .await
            .unwrap_or_else(|_| "No error details".to_string());
        return Err(AppError::Upstream {
            status: status.as_u16(),
            details,
        });
    }

    Ok(response.bytes().await?.to_vec())
}

/// One-shot history fetch. Best effort: every failure is logged and yields an
/// empty series so live startup is never blocked on backfill.
pub async fn fetch_history(
    client: &Client,
    info_url: &str,
    symbol: &str,
    interval: CandleInterval,
    start_time: i64,
    end_time: i64,
) -> Vec<CandleRecord> {
    match try_fetch_history(client, info_url, symbol, interval, start_time, end_time).await {
        Ok(records) => {
            debug!(
                symbol,
                interval = interval.as_str(),
                count = records.len(),
                "candle snapshot loaded"
            );
            records
        }
        Err(error) => {
            let payload = relay_error_payload(&error);
            warn!(
                symbol,
                interval = interval.as_str(),
                error = %payload.error,
                details = %payload.details,
                "candle snapshot unavailable"
            );
            Vec::new()
        }
    }
}

async fn try_fetch_history(
    client: &Client,
    info_url: &str,
    symbol: &str,
    interval: CandleInterval,
    start_time: i64,
    end_time: i64,
) -> Result<Vec<CandleRecord>, AppError> {
    let body = candle_snapshot_body(symbol, interval, start_time, end_time)?;
    let mut payload = relay_info_request(client, info_url, body).await?;
    let rows: Vec<CandleSlot> = simd_json::serde::from_slice(payload.as_mut_slice())?;

    let mut records = normalize_many(rows);
    records.sort_by_key(|record| record.timestamp);
    records.dedup_by_key(|record| record.timestamp);
    Ok(records)
}
