//! Hub: the process-wide coordinator
//!
//! Owns the client registry, the room registry and the event router, and runs
//! the teardown loop. Teardown requests from every connection task funnel
//! through that single loop, so a client is torn down exactly once no matter
//! how many of its tasks report a failure.

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::client::{Client, Delivery};
use crate::config::HubConfig;
use crate::connection;
use crate::error::HubError;
use crate::event::Event;
use crate::room::Room;
use crate::router::{EventHandler, Router};
use crate::types::ClientId;

type Clients = Arc<DashMap<ClientId, Arc<Client>>>;
type Rooms = Arc<DashMap<String, Arc<Room>>>;

/// The broadcast hub
///
/// Registration, room operations and dispatch may be called concurrently from
/// any task; the registries synchronize internally.
pub struct Hub {
    /// All connected clients: ClientId -> Client
    clients: Clients,
    /// All rooms: name -> Room
    rooms: Rooms,
    /// Event type -> handler
    router: Router,
    /// Teardown signal queue
    unregister: mpsc::Sender<ClientId>,
    config: HubConfig,
}

impl Hub {
    /// Create a hub and start its teardown loop
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: HubConfig) -> Arc<Self> {
        let clients: Clients = Arc::new(DashMap::with_capacity(config.client_capacity));
        let rooms: Rooms = Arc::new(DashMap::new());
        let (unregister_tx, unregister_rx) = mpsc::channel(config.unregister_buffer.max(1));

        let teardown = Teardown {
            clients: clients.clone(),
            rooms: rooms.clone(),
            receiver: unregister_rx,
        };
        tokio::spawn(teardown.run());

        Arc::new(Self {
            clients,
            rooms,
            router: Router::new(),
            unregister: unregister_tx,
            config,
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Upgrade a raw stream to WebSocket and attach it as a new client
    pub async fn on_connect<S>(self: &Arc<Self>, stream: S) -> Result<Arc<Client>, HubError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ws = tokio_tungstenite::accept_async_with_config(stream, Some(self.websocket_config()))
            .await
            .map_err(|e| {
                error!("WebSocket handshake failed: {}", e);
                HubError::Handshake(e)
            })?;
        Ok(self.attach(ws))
    }

    /// Register an already-upgraded WebSocket as a new client
    ///
    /// Spawns the client's read and write tasks.
    pub fn attach<S>(self: &Arc<Self>, ws: WebSocketStream<S>) -> Arc<Client>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let keepalive = self.config.keepalive;
        let (client, outbound) = Client::new(ClientId::new(), self.config.outbound_buffer);
        self.register(client.clone());

        let (sink, stream) = ws.split();
        let reader = tokio::spawn(connection::read_loop(
            self.clone(),
            client.clone(),
            stream,
            keepalive,
        ));
        client.set_reader(reader.abort_handle());
        tokio::spawn(connection::write_loop(
            self.clone(),
            client.id(),
            outbound,
            client.closing(),
            sink,
            keepalive,
        ));

        client
    }

    /// Add a client to the registry
    pub(crate) fn register(&self, client: Arc<Client>) {
        let id = client.id();
        self.clients.insert(id, client);
        info!(client = %id, "Client connected");
        debug!("Total clients: {}", self.clients.len());
    }

    /// Ask the teardown loop to remove a client
    ///
    /// Signals for unknown or already removed clients are ignored.
    pub async fn unregister(&self, client_id: ClientId) {
        if self.unregister.send(client_id).await.is_err() {
            debug!(client = %client_id, "Teardown loop gone, unregister ignored");
        }
    }

    /// Register a handler for an exact event type, replacing any previous one
    pub fn register_handler<H: EventHandler>(&self, event_type: impl Into<String>, handler: H) -> &Self {
        self.router.insert(event_type, Arc::new(handler));
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Run the handler registered for the event's type, if any
    pub async fn dispatch(self: &Arc<Self>, client: &Arc<Client>, event: Event) {
        let Some(handler) = self.router.get(&event.event_type) else {
            debug!(client = %client.id(), event_type = %event.event_type, "No handler for event");
            return;
        };
        handler.handle(self.clone(), client.clone(), event).await;
    }

    /// Create the given rooms; names that already exist are left alone
    pub fn create_rooms<I, N>(&self, names: I)
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        for name in names {
            let name = name.into();
            if self.rooms.contains_key(&name) {
                continue;
            }
            let room = Room::new(name.clone(), &self.config.room);
            self.rooms.insert(name.clone(), room);
            info!(room = %name, "Room created");
        }
    }

    pub fn room(&self, name: &str) -> Option<Arc<Room>> {
        self.rooms.get(name).map(|room| room.value().clone())
    }

    /// Names of all rooms, sorted
    pub fn room_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rooms.iter().map(|room| room.key().clone()).collect();
        names.sort();
        names
    }

    pub fn client(&self, client_id: ClientId) -> Option<Arc<Client>> {
        self.clients.get(&client_id).map(|client| client.value().clone())
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Join a client to a room; unknown rooms are ignored
    pub async fn subscribe(&self, room: &str, client: &Arc<Client>) {
        if let Some(room) = self.room(room) {
            room.subscribe(client).await;
        }
    }

    /// Remove a client from a room; unknown rooms are ignored
    pub async fn unsubscribe(&self, room: &str, client: &Arc<Client>) {
        if let Some(room) = self.room(room) {
            room.unsubscribe(client).await;
        }
    }

    /// Broadcast an event to a room's members; unknown rooms are ignored
    pub async fn broadcast_to_room(&self, room: &str, event: Event) {
        match self.room(room) {
            Some(room) => room.broadcast(Arc::new(event)).await,
            None => debug!(room = %room, "Broadcast to unknown room ignored"),
        }
    }

    /// Build an event from a typed payload and broadcast it to the room named
    /// by the event type's namespace (`chat` for `chat:message`)
    pub async fn emit<T: Serialize + ?Sized>(&self, event_type: &str, payload: &T) {
        let event = match Event::with_payload(event_type, payload) {
            Ok(event) => event,
            Err(e) => {
                error!(event_type = %event_type, "{}", e);
                return;
            }
        };
        let room = event.namespace().to_string();
        self.broadcast_to_room(&room, event).await;
    }

    /// Queue an event for every connected client, regardless of rooms
    pub fn broadcast(&self, event: Event) {
        let event = Arc::new(event);
        for client in self.clients.iter() {
            if client.value().enqueue(event.clone()) == Delivery::Dropped {
                warn!(client = %client.key(), event_type = %event.event_type, "Outbound queue full, event dropped");
            }
        }
    }

    fn websocket_config(&self) -> WebSocketConfig {
        let max = self.config.keepalive.max_message_size;
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(max);
        config.max_frame_size = Some(max);
        config
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("clients", &self.clients.len())
            .field("rooms", &self.room_names())
            .field("router", &self.router)
            .finish()
    }
}

/// Teardown loop: the only place clients leave the registry
struct Teardown {
    clients: Clients,
    rooms: Rooms,
    receiver: mpsc::Receiver<ClientId>,
}

impl Teardown {
    async fn run(mut self) {
        while let Some(client_id) = self.receiver.recv().await {
            self.handle_unregister(client_id).await;
        }
        debug!("Teardown loop stopped");
    }

    async fn handle_unregister(&mut self, client_id: ClientId) {
        let Some(client) = self.clients.get(&client_id).map(|c| c.value().clone()) else {
            debug!(client = %client_id, "Client already removed");
            return;
        };

        // No new subscriptions from here on
        for name in client.retire() {
            let room = self.rooms.get(&name).map(|r| r.value().clone());
            if let Some(room) = room {
                room.unsubscribe(&client).await;
            }
        }

        client.close();
        self.clients.remove(&client_id);

        info!(client = %client_id, "Client disconnected");
        debug!("Total clients: {}", self.clients.len());
    }
}
