use crate::market::config::MarketFeedConfig;
use crate::market::hyperliquid::{connect_feed_stream, HyperliquidWsStream};
use crate::market::now_unix_ms;
use crate::market::types::{
    decode_envelope, ping_frame, subscribe_frame, FeedConnectionState, FeedEnvelope,
    FeedStatusSnapshot, MarketEvent, Subscription,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const RAW_PREVIEW_CHARS: usize = 256;

/// Exponential backoff with a cap: attempt `k` waits `min(base * 2^(k-1), max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base_ms = self.base_delay.as_millis().min(u64::MAX as u128) as u64;
        let max_ms = self.max_delay.as_millis().min(u64::MAX as u128) as u64;
        Duration::from_millis(base_ms.saturating_mul(1_u64 << exponent).min(max_ms))
    }

    pub fn allows(&self, attempts_so_far: u32) -> bool {
        self.enabled && attempts_so_far < self.max_attempts
    }
}

#[derive(Debug, Clone)]
pub struct LiveFeedConfig {
    pub url: String,
    pub subscriptions: Vec<Subscription>,
    pub reconnect: ReconnectPolicy,
    pub heartbeat_interval: Duration,
}

impl From<&MarketFeedConfig> for LiveFeedConfig {
    fn from(config: &MarketFeedConfig) -> Self {
        Self {
            url: config.ws_url.clone(),
            subscriptions: config.subscriptions(),
            reconnect: ReconnectPolicy {
                enabled: config.reconnect_enabled,
                base_delay: Duration::from_millis(config.reconnect_base_delay_ms),
                max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
                max_attempts: config.max_reconnect_attempts,
            },
            heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedExit {
    Cancelled,
    Exhausted { attempts: u32 },
    ReconnectDisabled,
    SinkClosed,
}

#[derive(Debug, Clone, Copy, Default)]
struct TelemetrySnapshot {
    frames_received: u64,
    raw_frames: u64,
    last_frame_at_ms: Option<i64>,
}

#[derive(Debug, Default)]
struct FeedTelemetry {
    frames_received: AtomicU64,
    raw_frames: AtomicU64,
    has_last_frame_at_ms: AtomicBool,
    last_frame_at_ms: AtomicI64,
}

impl FeedTelemetry {
    fn record_frame(&self, is_raw: bool, received_at_ms: i64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        if is_raw {
            self.raw_frames.fetch_add(1, Ordering::Relaxed);
        }
        self.last_frame_at_ms
            .store(received_at_ms, Ordering::Relaxed);
        self.has_last_frame_at_ms.store(true, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            raw_frames: self.raw_frames.load(Ordering::Relaxed),
            last_frame_at_ms: if self.has_last_frame_at_ms.load(Ordering::Relaxed) {
                Some(self.last_frame_at_ms.load(Ordering::Relaxed))
            } else {
                None
            },
        }
    }
}

struct FeedRuntimeContext<'a> {
    config: &'a LiveFeedConfig,
    sink: &'a mpsc::Sender<FeedEnvelope>,
    status_store: &'a Arc<RwLock<FeedStatusSnapshot>>,
    events: &'a broadcast::Sender<MarketEvent>,
    telemetry: &'a FeedTelemetry,
    cancel_token: &'a CancellationToken,
}

enum SessionEnd {
    Closed(String),
    Cancelled,
    SinkClosed,
}

/// Drives one multiplexed live connection until cancellation, sink shutdown or
/// an exhausted reconnect budget. Decoded envelopes go to `sink` in arrival
/// order; a full sink suspends reading.
pub async fn run_live_feed(
    config: LiveFeedConfig,
    sink: mpsc::Sender<FeedEnvelope>,
    status_store: Arc<RwLock<FeedStatusSnapshot>>,
    events: broadcast::Sender<MarketEvent>,
    cancel_token: CancellationToken,
) -> FeedExit {
    let telemetry = FeedTelemetry::default();
    let context = FeedRuntimeContext {
        config: &config,
        sink: &sink,
        status_store: &status_store,
        events: &events,
        telemetry: &telemetry,
        cancel_token: &cancel_token,
    };

    let mut reconnect_attempt = 0_u32;
    loop {
        if cancel_token.is_cancelled() {
            return FeedExit::Cancelled;
        }

        let (phase, reason) = if reconnect_attempt == 0 {
            (
                FeedConnectionState::Connecting,
                "opening websocket stream".to_string(),
            )
        } else {
            (
                FeedConnectionState::Reconnecting,
                format!("reconnect attempt {reconnect_attempt}"),
            )
        };
        publish_status(&context, phase, reconnect_attempt, Some(reason)).await;
        info!(url = %config.url, attempt = reconnect_attempt, "connecting live feed");

        let connected = tokio::select! {
            _ = cancel_token.cancelled() => return FeedExit::Cancelled,
            result = connect_feed_stream(&config.url) => result,
        };

        let reason = match connected {
            Ok(stream) => {
                reconnect_attempt = 0;
                match run_session(stream, &context).await {
                    SessionEnd::Closed(reason) => reason,
                    SessionEnd::Cancelled => return FeedExit::Cancelled,
                    SessionEnd::SinkClosed => {
                        warn!(url = %config.url, "envelope consumer is gone; stopping live feed");
                        return FeedExit::SinkClosed;
                    }
                }
            }
            Err(error) => format!("websocket connect error: {error}"),
        };

        if cancel_token.is_cancelled() {
            return FeedExit::Cancelled;
        }

        if !config.reconnect.enabled {
            warn!(url = %config.url, reason = %reason, "live feed down; reconnect disabled");
            publish_status(
                &context,
                FeedConnectionState::Disconnected,
                reconnect_attempt,
                Some(reason),
            )
            .await;
            return FeedExit::ReconnectDisabled;
        }

        if !config.reconnect.allows(reconnect_attempt) {
            error!(
                url = %config.url,
                attempts = reconnect_attempt,
                reason = %reason,
                "live feed reconnect budget exhausted"
            );
            publish_status(
                &context,
                FeedConnectionState::Exhausted,
                reconnect_attempt,
                Some(format!(
                    "gave up after {reconnect_attempt} reconnect attempts: {reason}"
                )),
            )
            .await;
            return FeedExit::Exhausted {
                attempts: reconnect_attempt,
            };
        }

        reconnect_attempt = reconnect_attempt.saturating_add(1);
        let delay = config.reconnect.delay_for(reconnect_attempt);
        warn!(
            url = %config.url,
            attempt = reconnect_attempt,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "live feed closed; scheduling reconnect"
        );
        publish_status(
            &context,
            FeedConnectionState::Reconnecting,
            reconnect_attempt,
            Some(format!("{reason}; retrying in {} ms", delay.as_millis())),
        )
        .await;

        tokio::select! {
            _ = cancel_token.cancelled() => return FeedExit::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn run_session(stream: HyperliquidWsStream, context: &FeedRuntimeContext<'_>) -> SessionEnd {
    let (mut writer, mut reader) = stream.split();

    for subscription in &context.config.subscriptions {
        if context.cancel_token.is_cancelled() {
            let _ = writer.close().await;
            return SessionEnd::Cancelled;
        }

        let frame = match subscribe_frame(subscription) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(coin = subscription.coin(), error = %error, "failed to encode subscription");
                continue;
            }
        };
        if let Err(error) = writer.send(Message::Text(frame)).await {
            return SessionEnd::Closed(format!("subscribe send failed: {error}"));
        }
    }

    info!(
        url = %context.config.url,
        subscriptions = context.config.subscriptions.len(),
        "live feed open"
    );
    publish_status(
        context,
        FeedConnectionState::Open,
        0,
        Some("websocket connected".to_string()),
    )
    .await;

    let period = context.config.heartbeat_interval;
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = context.cancel_token.cancelled() => {
                let _ = writer.close().await;
                return SessionEnd::Cancelled;
            }
            _ = heartbeat.tick() => {
                let ping = match ping_frame() {
                    Ok(ping) => ping,
                    Err(error) => {
                        warn!(error = %error, "failed to encode heartbeat");
                        continue;
                    }
                };
                if let Err(error) = writer.send(Message::Text(ping)).await {
                    return SessionEnd::Closed(format!("heartbeat send failed: {error}"));
                }
            }
            next_message = reader.next() => {
                let Some(frame_result) = next_message else {
                    return SessionEnd::Closed("websocket stream ended".to_string());
                };

                let delivered = match frame_result {
                    Ok(Message::Text(text_payload)) => deliver(text_payload.as_bytes(), context).await,
                    Ok(Message::Binary(binary_payload)) => deliver(&binary_payload, context).await,
                    Ok(Message::Close(close_frame)) => {
                        let reason = close_frame
                            .map(|frame| format!("closed by server ({}): {}", u16::from(frame.code), frame.reason))
                            .unwrap_or_else(|| "closed by server".to_string());
                        return SessionEnd::Closed(reason);
                    }
                    Ok(_) => Ok(()),
                    Err(error) => return SessionEnd::Closed(format!("websocket frame error: {error}")),
                };

                if let Err(end) = delivered {
                    let _ = writer.close().await;
                    return end;
                }
            }
        }
    }
}

async fn deliver(frame: &[u8], context: &FeedRuntimeContext<'_>) -> Result<(), SessionEnd> {
    let envelope = decode_envelope(frame);
    let is_raw = matches!(envelope, FeedEnvelope::Raw(_));
    context.telemetry.record_frame(is_raw, now_unix_ms());

    if let FeedEnvelope::Raw(raw) = &envelope {
        debug!(
            channel = raw.channel.as_deref().unwrap_or("-"),
            reason = %raw.reason,
            payload = %preview(&raw.payload),
            "raw frame"
        );
    }

    if context.cancel_token.is_cancelled() {
        return Err(SessionEnd::Cancelled);
    }

    tokio::select! {
        _ = context.cancel_token.cancelled() => Err(SessionEnd::Cancelled),
        sent = context.sink.send(envelope) => sent.map_err(|_| SessionEnd::SinkClosed),
    }
}

fn preview(payload: &str) -> &str {
    match payload.char_indices().nth(RAW_PREVIEW_CHARS) {
        Some((index, _)) => &payload[..index],
        None => payload,
    }
}

async fn publish_status(
    context: &FeedRuntimeContext<'_>,
    state: FeedConnectionState,
    reconnect_attempt: u32,
    reason: Option<String>,
) {
    let telemetry = context.telemetry.snapshot();
    let snapshot = FeedStatusSnapshot {
        state,
        url: context.config.url.clone(),
        reconnect_attempt,
        subscriptions: context.config.subscriptions.len(),
        frames_received: telemetry.frames_received,
        raw_frames: telemetry.raw_frames,
        last_frame_at_ms: telemetry.last_frame_at_ms,
        reason,
    };

    {
        let mut writable = context.status_store.write().await;
        *writable = snapshot.clone();
    }

    if context.events.send(MarketEvent::MarketStatus(snapshot)).is_err() {
        debug!("no market status subscribers");
    }
}
