//! Bayeux protocol over WebSocket.
//!
//! One WebSocket carries the whole Bayeux session. A spawned event loop owns
//! the socket and multiplexes:
//!
//! - Incoming frames (meta replies, acknowledgements, broadcast data)
//! - Outgoing commands from the [`Transport`] methods
//! - Acknowledgement correlation by message id
//!
//! # Session
//!
//! ```text
//! /meta/handshake ──► clientId ──► /meta/connect (advice.timeout = 0)
//!                                        │
//!                                        └──► /meta/connect ... until closed
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::error::{Error, Result};

use super::{Advice, Transport, TransportEvent, TransportEventSender};

// ============================================================================
// Constants
// ============================================================================

/// How long `subscribe`/`publish` wait for the server's acknowledgement.
const ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Floor on the retry delay after a failed `/meta/connect`.
const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);

const BAYEUX_VERSION: &str = "1.0";
const CONNECTION_TYPE: &str = "websocket";

const HANDSHAKE: &str = "/meta/handshake";
const CONNECT: &str = "/meta/connect";
const SUBSCRIBE: &str = "/meta/subscribe";
const DISCONNECT: &str = "/meta/disconnect";

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type AckSender = oneshot::Sender<Result<()>>;
type AckMap = FxHashMap<String, AckSender>;

/// Commands for the session loop.
enum Command {
    Handshake,
    Connect,
    Subscribe { channel: String, ack: AckSender },
    Publish { channel: String, data: Value, ack: AckSender },
    Disconnect,
}

/// One inbound Bayeux message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    channel: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    successful: Option<bool>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    advice: Option<Advice>,
    #[serde(default)]
    data: Option<Value>,
}

// ============================================================================
// Reconnect
// ============================================================================

/// Delay before the next connect or handshake.
///
/// Follows the advised interval, but never retries a failed connect
/// sooner than [`MIN_RETRY_DELAY`].
fn reconnect_delay(successful: bool, advice: &Advice) -> Duration {
    let advised = Duration::from_millis(advice.interval.unwrap_or(0));
    if successful {
        advised
    } else {
        advised.max(MIN_RETRY_DELAY)
    }
}

// ============================================================================
// URL
// ============================================================================

/// Maps an `http[s]` endpoint to its `ws[s]` equivalent.
///
/// # Errors
///
/// Returns [`Error::Config`] for any other scheme.
pub fn websocket_url(endpoint: &Url) -> Result<Url> {
    let scheme = match endpoint.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::config(format!("unsupported endpoint scheme: {other}")));
        }
    };
    let mut url = endpoint.clone();
    url.set_scheme(scheme)
        .map_err(|()| Error::config(format!("cannot use {scheme} for {endpoint}")))?;
    Ok(url)
}

// ============================================================================
// BayeuxTransport
// ============================================================================

/// [`Transport`] speaking Bayeux over a single WebSocket.
#[derive(Default)]
pub struct BayeuxTransport {
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
}

impl BayeuxTransport {
    /// Creates an unconnected transport.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` while a session loop is running.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.commands
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    fn sender(&self) -> Result<mpsc::UnboundedSender<Command>> {
        self.commands.lock().clone().ok_or(Error::ConnectionClosed)
    }

    /// Sends a command and waits for the server's acknowledgement.
    async fn acknowledged(&self, command: impl FnOnce(AckSender) -> Command) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.sender()?
            .send(command(ack_tx))
            .map_err(|_| Error::ConnectionClosed)?;

        match timeout(ACK_TIMEOUT, ack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => Err(Error::connection(format!(
                "no acknowledgement within {}s",
                ACK_TIMEOUT.as_secs()
            ))),
        }
    }
}

impl std::fmt::Debug for BayeuxTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BayeuxTransport")
            .field("open", &self.is_open())
            .finish()
    }
}

#[async_trait]
impl Transport for BayeuxTransport {
    async fn handshake(&self, endpoint: &Url, events: TransportEventSender) -> Result<()> {
        let url = websocket_url(endpoint)?;
        debug!(%url, "Opening Bayeux WebSocket");

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (write, read) = ws_stream.split();

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let session = Session::new(events, command_tx.clone());
        *self.commands.lock() = Some(command_tx);

        tokio::spawn(session.run(write, read, command_rx));
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        let channel = channel.to_string();
        self.acknowledged(|ack| Command::Subscribe { channel, ack })
            .await
    }

    async fn publish(&self, channel: &str, payload: Value) -> Result<()> {
        let channel = channel.to_string();
        self.acknowledged(|ack| Command::Publish {
            channel,
            data: payload,
            ack,
        })
        .await
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(tx) = self.commands.lock().take() {
            let _ = tx.send(Command::Disconnect);
        }
        Ok(())
    }
}

// ============================================================================
// Session
// ============================================================================

/// State owned by the session loop.
struct Session {
    events: TransportEventSender,
    commands: mpsc::UnboundedSender<Command>,
    client_id: Option<String>,
    next_id: u64,
    first_connect: bool,
    pending: AckMap,
}

impl Session {
    fn new(events: TransportEventSender, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            events,
            commands,
            client_id: None,
            next_id: 0,
            first_connect: true,
            pending: AckMap::default(),
        }
    }

    async fn run(
        mut self,
        mut ws_write: WsSink,
        mut ws_read: SplitStream<WsStream>,
        mut command_rx: mpsc::UnboundedReceiver<Command>,
    ) {
        let handshake = self.handshake_frame();
        if let Err(e) = send_frame(&mut ws_write, &handshake).await {
            warn!(error = %e, "Failed to send handshake");
            let _ = self.events.send(TransportEvent::Handshake { successful: false });
            return;
        }

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(WsMessage::Text(text))) => {
                            for frame in self.handle_text(&text) {
                                if let Err(e) = send_frame(&mut ws_write, &frame).await {
                                    warn!(error = %e, "Failed to send reply frame");
                                }
                            }
                        }

                        Some(Ok(WsMessage::Close(_))) => {
                            debug!("WebSocket closed by server");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(Command::Handshake) => {
                            let frame = self.handshake_frame();
                            if let Err(e) = send_frame(&mut ws_write, &frame).await {
                                warn!(error = %e, "Failed to re-handshake");
                            }
                        }

                        Some(Command::Connect) => {
                            if let Some(frame) = self.connect_frame()
                                && let Err(e) = send_frame(&mut ws_write, &frame).await
                            {
                                warn!(error = %e, "Failed to send connect");
                            }
                        }

                        Some(Command::Subscribe { channel, ack }) => {
                            let frame = self.session_frame(SUBSCRIBE, json!({ "subscription": channel }));
                            self.send_acknowledged(&mut ws_write, frame, ack).await;
                        }

                        Some(Command::Publish { channel, data, ack }) => {
                            let frame = self.session_frame(&channel, json!({ "data": data }));
                            self.send_acknowledged(&mut ws_write, frame, ack).await;
                        }

                        Some(Command::Disconnect) | None => {
                            if let Some(Ok((_, frame))) = self.session_frame(DISCONNECT, json!({})) {
                                let _ = send_frame(&mut ws_write, &frame).await;
                            }
                            let _ = ws_write.close().await;
                            debug!("Bayeux session disconnected");
                            break;
                        }
                    }
                }
            }
        }

        self.fail_pending();
        // A final connect failure lets the lifecycle report the close.
        let _ = self.events.send(TransportEvent::Connect {
            successful: false,
            advice: Advice::default(),
        });
        debug!("Bayeux session terminated");
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    /// Handles one text frame; returns frames to send in reply.
    fn handle_text(&mut self, text: &str) -> Vec<Value> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Unparseable Bayeux frame");
                return Vec::new();
            }
        };

        let messages = match value {
            Value::Array(items) => items,
            other => vec![other],
        };

        messages
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<Envelope>(raw) {
                Ok(envelope) => self.handle_envelope(envelope),
                Err(e) => {
                    warn!(error = %e, "Malformed Bayeux message");
                    None
                }
            })
            .collect()
    }

    fn handle_envelope(&mut self, envelope: Envelope) -> Option<Value> {
        trace!(channel = %envelope.channel, id = ?envelope.id, "Bayeux message");

        match envelope.channel.as_str() {
            HANDSHAKE => {
                let successful = envelope.successful == Some(true);
                if successful {
                    debug!(client_id = ?envelope.client_id, "Handshake accepted");
                    self.client_id = envelope.client_id;
                    self.first_connect = true;
                } else {
                    warn!(error = ?envelope.error, "Handshake rejected");
                }
                let _ = self.events.send(TransportEvent::Handshake { successful });
                if successful { self.connect_frame() } else { None }
            }

            CONNECT => {
                let successful = envelope.successful == Some(true);
                let advice = envelope.advice.unwrap_or_default();
                self.schedule_reconnect(successful, &advice);
                let _ = self.events.send(TransportEvent::Connect { successful, advice });
                None
            }

            channel if envelope.successful.is_none() && !channel.starts_with("/meta/") => {
                let data = envelope.data.unwrap_or(Value::Null);
                let _ = self.events.send(TransportEvent::Message {
                    channel: envelope.channel,
                    data,
                });
                None
            }

            _ => {
                self.acknowledge(envelope);
                None
            }
        }
    }

    fn acknowledge(&mut self, envelope: Envelope) {
        let Some(ack) = envelope.id.and_then(|id| self.pending.remove(&id)) else {
            return;
        };
        let result = if envelope.successful == Some(true) {
            Ok(())
        } else {
            Err(Error::protocol(format!(
                "{} rejected: {}",
                envelope.channel,
                envelope.error.as_deref().unwrap_or("no reason given")
            )))
        };
        let _ = ack.send(result);
    }

    fn schedule_reconnect(&self, successful: bool, advice: &Advice) {
        let command = match advice.reconnect.as_deref() {
            Some("none") => {
                debug!("Server advised no reconnect");
                return;
            }
            Some("handshake") => Command::Handshake,
            _ => Command::Connect,
        };
        let delay = reconnect_delay(successful, advice);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = commands.send(command);
        });
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    fn next_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    fn handshake_frame(&mut self) -> Value {
        json!({
            "channel": HANDSHAKE,
            "version": BAYEUX_VERSION,
            "minimumVersion": BAYEUX_VERSION,
            "supportedConnectionTypes": [CONNECTION_TYPE],
            "id": self.next_id(),
        })
    }

    fn connect_frame(&mut self) -> Option<Value> {
        let client_id = self.client_id.clone()?;
        let mut frame = json!({
            "channel": CONNECT,
            "clientId": client_id,
            "connectionType": CONNECTION_TYPE,
            "id": self.next_id(),
        });
        if std::mem::take(&mut self.first_connect) {
            frame["advice"] = json!({ "timeout": 0 });
        }
        Some(frame)
    }

    /// Builds a frame that needs the session's `clientId`.
    ///
    /// Returns `None` before the handshake completed.
    fn session_frame(&mut self, channel: &str, fields: Value) -> Option<Result<(String, Value)>> {
        let client_id = self.client_id.clone()?;
        let id = self.next_id();
        let mut frame = json!({
            "channel": channel,
            "clientId": client_id,
            "id": id,
        });
        if let (Some(frame), Value::Object(fields)) = (frame.as_object_mut(), fields) {
            frame.extend(fields);
        } else {
            return Some(Err(Error::protocol("frame fields must be an object")));
        }
        Some(Ok((id, frame)))
    }

    async fn send_acknowledged(
        &mut self,
        ws_write: &mut WsSink,
        frame: Option<Result<(String, Value)>>,
        ack: AckSender,
    ) {
        let (id, frame) = match frame {
            Some(Ok(built)) => built,
            Some(Err(e)) => {
                let _ = ack.send(Err(e));
                return;
            }
            None => {
                let _ = ack.send(Err(Error::connection("no Bayeux session established")));
                return;
            }
        };

        self.pending.insert(id.clone(), ack);
        if let Err(e) = send_frame(ws_write, &frame).await
            && let Some(ack) = self.pending.remove(&id)
        {
            let _ = ack.send(Err(e));
        }
    }

    fn fail_pending(&mut self) {
        let count = self.pending.len();
        for (_, ack) in self.pending.drain() {
            let _ = ack.send(Err(Error::ConnectionClosed));
        }
        if count > 0 {
            debug!(count, "Failed pending acknowledgements on shutdown");
        }
    }
}

/// Writes one Bayeux message as a single-element batch.
async fn send_frame(ws_write: &mut WsSink, frame: &Value) -> Result<()> {
    let text = serde_json::to_string(&[frame])?;
    ws_write.send(WsMessage::Text(text.into())).await?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    type ServerStream = WebSocketStream<TcpStream>;

    async fn recv(server: &mut ServerStream) -> Value {
        loop {
            let message = timeout(Duration::from_secs(5), server.next())
                .await
                .expect("frame timed out")
                .expect("stream ended")
                .expect("websocket error");
            if let WsMessage::Text(text) = message {
                let batch: Value = serde_json::from_str(&text).expect("json");
                return batch[0].clone();
            }
        }
    }

    async fn reply(server: &mut ServerStream, frame: Value) {
        server
            .send(WsMessage::Text(json!([frame]).to_string().into()))
            .await
            .expect("server send");
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event timed out")
            .expect("event channel closed")
    }

    #[test]
    fn test_websocket_url() {
        let http = Url::parse("http://query.import.io:80/query/comet").expect("url");
        assert_eq!(
            websocket_url(&http).expect("ws").as_str(),
            "ws://query.import.io/query/comet"
        );

        let https = Url::parse("https://query.import.io:8443/query/comet").expect("url");
        assert_eq!(
            websocket_url(&https).expect("wss").as_str(),
            "wss://query.import.io:8443/query/comet"
        );

        let ftp = Url::parse("ftp://query.import.io/query/comet").expect("url");
        assert!(matches!(websocket_url(&ftp), Err(Error::Config { .. })));
    }

    #[test]
    fn test_reconnect_delay() {
        let none = Advice::default();
        assert_eq!(reconnect_delay(true, &none), Duration::ZERO);
        assert_eq!(reconnect_delay(false, &none), MIN_RETRY_DELAY);

        let slow = Advice {
            interval: Some(5_000),
            ..Advice::default()
        };
        assert_eq!(reconnect_delay(true, &slow), Duration::from_secs(5));
        assert_eq!(reconnect_delay(false, &slow), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_operations_before_handshake_fail() {
        let transport = BayeuxTransport::new();
        assert!(!transport.is_open());
        let err = transport.subscribe("/messaging").await.expect_err("no session");
        assert!(matches!(err, Error::ConnectionClosed));
        transport.disconnect().await.expect("disconnect is a no-op");
    }

    #[tokio::test]
    async fn test_session_against_loopback_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("upgrade");

            let handshake = recv(&mut ws).await;
            assert_eq!(handshake["channel"], HANDSHAKE);
            assert_eq!(handshake["supportedConnectionTypes"], json!(["websocket"]));
            reply(
                &mut ws,
                json!({ "channel": HANDSHAKE, "successful": true, "clientId": "c1", "id": handshake["id"] }),
            )
            .await;

            let connect = recv(&mut ws).await;
            assert_eq!(connect["channel"], CONNECT);
            assert_eq!(connect["clientId"], "c1");
            assert_eq!(connect["advice"], json!({ "timeout": 0 }));
            reply(
                &mut ws,
                json!({ "channel": CONNECT, "successful": true, "advice": { "reconnect": "none" } }),
            )
            .await;

            let subscribe = recv(&mut ws).await;
            assert_eq!(subscribe["channel"], SUBSCRIBE);
            assert_eq!(subscribe["subscription"], "/messaging");
            reply(
                &mut ws,
                json!({ "channel": SUBSCRIBE, "successful": true, "id": subscribe["id"] }),
            )
            .await;

            reply(
                &mut ws,
                json!({ "channel": "/messaging", "data": { "type": "SPAWN", "requestId": "r1" } }),
            )
            .await;

            let publish = recv(&mut ws).await;
            assert_eq!(publish["channel"], "/service/query");
            assert_eq!(publish["data"], json!({ "requestId": "r1" }));
            reply(
                &mut ws,
                json!({ "channel": "/service/query", "successful": false, "error": "403::denied", "id": publish["id"] }),
            )
            .await;

            let disconnect = recv(&mut ws).await;
            assert_eq!(disconnect["channel"], DISCONNECT);
        });

        let transport = Arc::new(BayeuxTransport::new());
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let endpoint = Url::parse(&format!("http://127.0.0.1:{port}/query/comet")).expect("url");
        transport.handshake(&endpoint, events_tx).await.expect("handshake");
        assert!(transport.is_open());

        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Handshake { successful: true }
        );
        let TransportEvent::Connect { successful, advice } = next_event(&mut events).await else {
            panic!("expected connect result");
        };
        assert!(successful);
        assert_eq!(advice.reconnect.as_deref(), Some("none"));

        transport.subscribe("/messaging").await.expect("subscribed");
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Message {
                channel: "/messaging".into(),
                data: json!({ "type": "SPAWN", "requestId": "r1" }),
            }
        );

        let err = transport
            .publish("/service/query", json!({ "requestId": "r1" }))
            .await
            .expect_err("publish rejected");
        assert!(matches!(err, Error::Protocol { ref message } if message.contains("403::denied")));

        transport.disconnect().await.expect("disconnect");
        server.await.expect("server assertions");

        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Connect {
                successful: false,
                advice: Advice::default()
            }
        );
    }
}
