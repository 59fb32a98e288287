// WebSocket transport for the marketplace push server
// Frames are JSON envelopes of the form {"event": "...", "data": ...}

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{ConnectError, Transport, TransportError, TransportLink, TransportSignal, TransportSink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, credential: &str) -> Result<TransportLink, ConnectError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectError::Handshake(format!("Invalid socket URL '{}': {}", self.url, e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", credential))
            .map_err(|_| ConnectError::Unauthorized("credential is not a valid header value".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        debug!("Opening websocket to {}", self.url);
        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(classify_connect_error)?;
        info!("Websocket established to {}", self.url);

        let (write, read) = stream.split();
        let (signal_tx, signal_rx) = mpsc::channel(100);
        let reader = tokio::spawn(read_frames(read, signal_tx));

        Ok(TransportLink {
            sink: Box::new(WebSocketSink { write, reader }),
            inbound: signal_rx,
        })
    }
}

struct WebSocketSink {
    write: SplitSink<WsStream, WsMessage>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl TransportSink for WebSocketSink {
    async fn send_event(&mut self, name: &str, payload: Value) -> Result<(), TransportError> {
        let envelope = Envelope {
            event: name.to_string(),
            data: payload,
        };
        let json = serde_json::to_string(&envelope).map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.write
            .send(WsMessage::Text(json.into()))
            .await
            .map_err(map_ws_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let result = self.write.close().await.map_err(map_ws_error);
        self.reader.abort();
        result
    }
}

impl Drop for WebSocketSink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_frames(mut read: SplitStream<WsStream>, signal_tx: mpsc::Sender<TransportSignal>) {
    let reason = loop {
        let signal = match read.next().await {
            Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<Envelope>(text.as_str()) {
                Ok(envelope) => TransportSignal::Event {
                    name: envelope.event,
                    payload: envelope.data,
                },
                Err(e) => TransportSignal::Error(format!("Malformed frame: {}", e)),
            },
            Some(Ok(WsMessage::Close(frame))) => {
                break frame
                    .map(|f| f.reason.as_str().to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "server closed connection".to_string());
            }
            Some(Ok(_)) => continue, // ping/pong/binary
            Some(Err(e)) => break e.to_string(),
            None => break "stream ended".to_string(),
        };
        if signal_tx.send(signal).await.is_err() {
            // Nobody is listening any more
            return;
        }
    };
    warn!("Websocket closed: {}", reason);
    let _ = signal_tx.send(TransportSignal::Disconnect(reason)).await;
}

fn classify_connect_error(err: tungstenite::Error) -> ConnectError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                ConnectError::Unauthorized(format!("HTTP {}", status))
            } else {
                ConnectError::Handshake(format!("HTTP {}", status))
            }
        }
        tungstenite::Error::Io(e) => ConnectError::Unreachable(e.to_string()),
        other => ConnectError::Handshake(other.to_string()),
    }
}

fn map_ws_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => TransportError::Closed,
        tungstenite::Error::Io(e) => TransportError::Io(e.to_string()),
        other => TransportError::Protocol(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_without_data() {
        let envelope: Envelope = serde_json::from_str(r#"{"event": "ping"}"#).unwrap();
        assert_eq!(envelope.event, "ping");
        assert!(envelope.data.is_null());
    }

    #[test]
    fn test_refused_connection_is_unreachable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        match classify_connect_error(tungstenite::Error::Io(io)) {
            ConnectError::Unreachable(_) => (),
            other => panic!("Expected Unreachable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        // Port 1 is never listening on the loopback interface
        let transport = WebSocketTransport::new("ws://127.0.0.1:1/ws");
        assert!(transport.connect("token").await.is_err());
    }
}
