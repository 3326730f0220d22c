//! WebSocket connection tasks
//!
//! Every client runs two independent tasks over its split WebSocket stream:
//! - `read_loop`: frames → events → router, under a pong-extended read deadline
//! - `write_loop`: outbound queue → frames, plus periodic pings
//!
//! Either task ending sends an unregister signal to the hub. The hub ignores
//! signals for clients it has already torn down, so both tasks may report.

use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout_at, Instant};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, warn};

use crate::client::Client;
use crate::config::Keepalive;
use crate::event::Event;
use crate::hub::Hub;
use crate::types::ClientId;

/// Read frames until the connection fails, closes, or misses its deadline
pub(crate) async fn read_loop<S>(hub: Arc<Hub>, client: Arc<Client>, mut stream: S, keepalive: Keepalive)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let client_id = client.id();
    let mut deadline = Instant::now() + keepalive.pong_wait;

    loop {
        let message = match timeout_at(deadline, stream.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed))) => {
                debug!(client = %client_id, "Connection closed");
                break;
            }
            Ok(Some(Err(e))) => {
                error!(client = %client_id, "WebSocket read error: {}", e);
                break;
            }
            Ok(None) => {
                debug!(client = %client_id, "Connection stream ended");
                break;
            }
            Err(_) => {
                warn!(client = %client_id, "No pong within {:?}, dropping connection", keepalive.pong_wait);
                break;
            }
        };

        match message {
            Message::Text(text) => handle_frame(&hub, &client, text.as_bytes()).await,
            Message::Binary(data) => handle_frame(&hub, &client, &data).await,
            Message::Pong(_) => {
                deadline = Instant::now() + keepalive.pong_wait;
            }
            Message::Close(_) => {
                debug!(client = %client_id, "Client sent close frame");
                break;
            }
            // Pings are answered by tungstenite
            Message::Ping(_) | Message::Frame(_) => {}
        }
    }

    debug!(client = %client_id, "Read task ended");
    hub.unregister(client_id).await;
}

/// Decode one frame and hand it to the router
async fn handle_frame(hub: &Arc<Hub>, client: &Arc<Client>, frame: &[u8]) {
    match Event::decode(frame) {
        Ok(event) => {
            debug!(client = %client.id(), event_type = %event.event_type, "Inbound event");
            hub.dispatch(client, event).await;
        }
        Err(e) => {
            warn!(client = %client.id(), "Discarding frame: {}", e);
        }
    }
}

/// Write queued events and keepalive pings until the queue closes or a write fails
///
/// A write still pending when the client is closed is abandoned, so a peer
/// that stopped reading cannot hold the connection open.
pub(crate) async fn write_loop<K>(
    hub: Arc<Hub>,
    client_id: ClientId,
    mut outbound: mpsc::Receiver<Arc<Event>>,
    mut closing: watch::Receiver<bool>,
    mut sink: K,
    keepalive: Keepalive,
) where
    K: Sink<Message, Error = WsError> + Unpin,
{
    let mut ticker = interval_at(
        Instant::now() + keepalive.ping_interval,
        keepalive.ping_interval,
    );
    let mut abandoned = false;

    loop {
        let message = tokio::select! {
            _ = ticker.tick() => Message::Ping(Vec::new()),
            next = outbound.recv() => {
                let Some(event) = next else {
                    debug!(client = %client_id, "Outbound queue closed");
                    break;
                };
                match event.encode() {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        error!(client = %client_id, event_type = %event.event_type, "{}", e);
                        continue;
                    }
                }
            }
        };

        let sent = tokio::select! {
            biased;
            result = sink.send(message) => result,
            _ = closed(&mut closing) => {
                debug!(client = %client_id, "Client closed with a write pending, dropping connection");
                abandoned = true;
                break;
            }
        };
        if let Err(e) = sent {
            debug!(client = %client_id, "WebSocket send failed: {}", e);
            break;
        }
    }

    // Close frame goes out only if the peer is still draining
    if !abandoned {
        tokio::select! {
            biased;
            _ = sink.close() => {}
            _ = closed(&mut closing) => {}
        }
    }
    drop(sink);

    debug!(client = %client_id, "Write task ended");
    hub.unregister(client_id).await;
}

/// Resolve once the client is closed
async fn closed(closing: &mut watch::Receiver<bool>) {
    let _ = closing.wait_for(|closed| *closed).await;
}
