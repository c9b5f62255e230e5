//! Push socket for realtime smart system events.
//!
//! A thin wrapper over a single `tokio-tungstenite` connection. It does not
//! reconnect on its own: lifetime, keepalive and backoff policy belong to
//! the realtime channel in `smartgarden-core`, which drives this socket one
//! frame at a time.
//!
//! Every text frame carries one JSON:API resource object (`LOCATION`,
//! `DEVICE`, or a service such as `VALVE`), parsed with [`parse_message`].

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::Error;
use crate::models::Resource;

// ── Frames ───────────────────────────────────────────────────────────

/// A frame surfaced to the caller.
///
/// Pings from the server and binary frames are absorbed here; tungstenite
/// queues pong replies automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushFrame {
    /// A text message (one resource object).
    Text(String),
    /// Acknowledgement of one of our keepalive pings.
    Pong,
    /// The server closed the connection, or the stream ended.
    Closed { code: u16, reason: String },
}

// ── PushSocket ───────────────────────────────────────────────────────

/// One live websocket connection.
pub struct PushSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl PushSocket {
    /// Open a connection to a URL obtained from the websocket negotiation call.
    pub async fn connect(url: &Url) -> Result<Self, Error> {
        tracing::info!(host = url.host_str().unwrap_or("?"), "Connecting to push socket");

        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        tracing::info!("Push socket connected");
        Ok(Self { stream })
    }

    /// Read until the next frame the caller cares about.
    ///
    /// Cancel-safe: dropping the future between frames loses nothing.
    pub async fn next_frame(&mut self) -> Result<PushFrame, Error> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(PushFrame::Text(text.as_str().to_owned())),
                Some(Ok(Message::Pong(_))) => return Ok(PushFrame::Pong),
                Some(Ok(Message::Ping(_))) => {
                    tracing::trace!("Push socket ping");
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or_else(
                        || (1005, String::new()),
                        |cf| (u16::from(cf.code), cf.reason.as_str().to_owned()),
                    );
                    tracing::info!(code, reason = %reason, "Push socket close frame received");
                    return Ok(PushFrame::Closed { code, reason });
                }
                Some(Ok(_)) => {
                    // Binary, raw frames -- not used by this API
                }
                Some(Err(e)) => return Err(socket_error(e)),
                None => {
                    tracing::info!("Push socket stream ended");
                    return Ok(PushFrame::Closed {
                        code: 1006,
                        reason: "stream ended".into(),
                    });
                }
            }
        }
    }

    /// Send a keepalive ping.
    pub async fn ping(&mut self) -> Result<(), Error> {
        self.stream
            .send(Message::Ping(Vec::new().into()))
            .await
            .map_err(socket_error)
    }

    /// Close the connection with a normal close frame.
    pub async fn close(&mut self) -> Result<(), Error> {
        match self.stream.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(socket_error(e)),
        }
    }
}

fn socket_error(err: tungstenite::Error) -> Error {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            Error::WebSocketClosed {
                code: 1006,
                reason: err.to_string(),
            }
        }
        other => Error::WebSocketConnect(other.to_string()),
    }
}

// ── Message parsing ──────────────────────────────────────────────────

/// Parse one push message into its resource object.
pub fn parse_message(text: &str) -> Result<Resource, Error> {
    serde_json::from_str(text).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: text.chars().take(512).collect(),
    })
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_service_message() {
        let raw = serde_json::json!({
            "id": "dev-1:1",
            "type": "VALVE",
            "attributes": {
                "activity": { "value": "MANUAL_WATERING", "timestamp": "2026-05-01T10:00:00Z" }
            }
        });

        let msg = parse_message(&raw.to_string()).unwrap();
        assert_eq!(msg.kind, "VALVE");
        assert_eq!(msg.device_id(), "dev-1");
    }

    #[test]
    fn parse_location_message() {
        let raw = r#"{"id":"loc-1","type":"LOCATION","attributes":{"name":"Garden"}}"#;
        let msg = parse_message(raw).unwrap();
        assert_eq!(msg.kind, "LOCATION");
        assert_eq!(msg.plain_str("name"), Some("Garden"));
    }

    #[test]
    fn parse_malformed_message() {
        let err = parse_message("not json at all").unwrap_err();
        assert!(matches!(err, Error::Deserialization { .. }));
    }

    #[test]
    fn parse_message_missing_type() {
        assert!(parse_message(r#"{"id":"x"}"#).is_err());
    }
}
