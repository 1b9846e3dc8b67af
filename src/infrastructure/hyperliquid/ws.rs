//! Candle feed over the market-data WebSocket.
//!
//! The orchestrator needs a bounded window of recent candles per cycle, so
//! this module connects, subscribes, drains pushes until the target count
//! or an overall deadline, and disconnects. Connection lifetime is one
//! collection; there is no long-lived subscription to supervise.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;

use super::types::{parse_px, WsCandle};
use crate::domain::errors::ExchangeError;
use crate::domain::services::indicators::Candle;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Parse one WebSocket text frame into candles. The feed pushes either a
/// single candle object or an array; anything on a different channel is
/// `None`.
pub fn parse_candle_message(text: &str) -> Option<Vec<Candle>> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("channel")?.as_str()? != "candle" {
        return None;
    }
    let data = value.get("data")?;
    let raw: Vec<WsCandle> = if data.is_array() {
        serde_json::from_value(data.clone()).ok()?
    } else {
        vec![serde_json::from_value(data.clone()).ok()?]
    };
    let candles: Vec<Candle> = raw.iter().filter_map(candle_from_wire).collect();
    if candles.is_empty() {
        None
    } else {
        Some(candles)
    }
}

fn candle_from_wire(raw: &WsCandle) -> Option<Candle> {
    Some(Candle {
        time: DateTime::<Utc>::from_timestamp_millis(raw.t as i64)?,
        open: parse_px(&raw.o).ok()?,
        high: parse_px(&raw.h).ok()?,
        low: parse_px(&raw.l).ok()?,
        close: parse_px(&raw.c).ok()?,
    })
}

/// Collect up to `target` candles for a symbol, stopping early at the
/// overall deadline. Candles are returned oldest-to-newest with duplicate
/// open-times collapsed to the latest push (the feed re-pushes the live bar
/// as it updates).
pub async fn collect_candles(
    symbol: &str,
    interval: &str,
    target: usize,
    deadline: Duration,
    testnet: bool,
) -> Result<Vec<Candle>, ExchangeError> {
    collect_candles_from(super::ws_url(testnet), symbol, interval, target, deadline).await
}

/// Same as [`collect_candles`] with an explicit endpoint, for tests.
pub async fn collect_candles_from(
    url: &str,
    symbol: &str,
    interval: &str,
    target: usize,
    deadline: Duration,
) -> Result<Vec<Candle>, ExchangeError> {
    let connect = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url))
        .await
        .map_err(|_| ExchangeError::WebSocket(format!("connect timeout to {}", url)))?
        .map_err(|e| ExchangeError::WebSocket(format!("connect failed: {}", e)))?;
    let (mut stream, _) = connect;

    let subscription = serde_json::json!({
        "method": "subscribe",
        "subscription": {"type": "candle", "coin": symbol, "interval": interval},
    });
    stream
        .send(Message::Text(subscription.to_string()))
        .await
        .map_err(|e| ExchangeError::WebSocket(format!("subscribe failed: {}", e)))?;

    let mut candles: Vec<Candle> = Vec::new();
    let started = tokio::time::Instant::now();

    while candles.len() < target && started.elapsed() < deadline {
        let frame = match tokio::time::timeout(READ_TIMEOUT, stream.next()).await {
            Err(_elapsed) => continue,
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                return Err(ExchangeError::WebSocket(format!("read failed: {}", e)))
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                if let Some(batch) = parse_candle_message(&text) {
                    for candle in batch {
                        merge_candle(&mut candles, candle);
                    }
                }
            }
            Message::Ping(data) => {
                let _ = stream.send(Message::Pong(data)).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    let _ = stream.send(Message::Close(None)).await;

    if candles.is_empty() {
        return Err(ExchangeError::WebSocket(format!(
            "no candles received for {} within {:?}",
            symbol, deadline
        )));
    }
    candles.sort_by_key(|c| c.time);
    Ok(candles)
}

fn merge_candle(candles: &mut Vec<Candle>, incoming: Candle) {
    match candles.iter_mut().find(|c| c.time == incoming.time) {
        Some(existing) => *existing = incoming,
        None => candles.push(incoming),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_candle_push() {
        let text = r#"{"channel":"candle","data":{"t":1700000000000,"o":"100.0","h":"101.0","l":"99.5","c":"100.5"}}"#;
        let candles = parse_candle_message(text).unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, 100.5);
        assert_eq!(candles[0].high, 101.0);
    }

    #[test]
    fn test_parse_candle_array_push() {
        let text = r#"{"channel":"candle","data":[
            {"t":1700000000000,"o":"1","h":"2","l":"0.5","c":"1.5"},
            {"t":1700000300000,"o":"1.5","h":"3","l":"1","c":"2.5"}
        ]}"#;
        let candles = parse_candle_message(text).unwrap();
        assert_eq!(candles.len(), 2);
        assert!(candles[0].time < candles[1].time);
    }

    #[test]
    fn test_other_channels_ignored() {
        assert!(parse_candle_message(r#"{"channel":"subscriptionResponse","data":{}}"#).is_none());
        assert!(parse_candle_message("not json at all").is_none());
        assert!(parse_candle_message(r#"{"data":{"t":1}}"#).is_none());
    }

    #[test]
    fn test_merge_replaces_live_bar() {
        let mut candles = vec![Candle {
            time: DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap(),
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
        }];
        merge_candle(
            &mut candles,
            Candle {
                time: DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap(),
                open: 1.0,
                high: 2.5,
                low: 0.5,
                close: 2.0,
            },
        );
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, 2.0);
    }
}
