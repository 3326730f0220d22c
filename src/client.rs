//! Client struct definition
//!
//! Server-side handle for one live connection: its identity, the bounded
//! outbound queue drained by the connection's write task, and the names of
//! the rooms it has joined.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use crate::event::Event;
use crate::types::ClientId;

/// Outcome of a non-blocking enqueue onto a client's outbound queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Message accepted
    Queued,
    /// Queue full, the new message was dropped
    Dropped,
    /// Queue already closed, client is going away
    Closed,
}

/// Joined rooms plus the teardown flag, guarded together so a room can
/// never be joined after teardown has taken its snapshot
#[derive(Debug, Default)]
struct Joined {
    rooms: HashSet<String>,
    retired: bool,
}

/// Connected client
///
/// Rooms hold `Arc<Client>` in their membership; the client only records
/// room names so teardown can find them through the hub.
#[derive(Debug)]
pub struct Client {
    /// Unique identifier for this client
    id: ClientId,
    /// Server → Client queue, `None` once closed
    outbound: Mutex<Option<mpsc::Sender<Arc<Event>>>>,
    /// Joined room names; retired clients cannot join rooms
    joined: Mutex<Joined>,
    /// Inbound task of the connection, aborted on close
    reader: Mutex<Option<AbortHandle>>,
    /// Flipped to true on close; the write task abandons pending writes
    closing: watch::Sender<bool>,
}

impl Client {
    /// Create a new client with an outbound queue of the given capacity
    ///
    /// Returns the receiving end of the queue for the write task.
    pub fn new(id: ClientId, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<Event>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let client = Self {
            id,
            outbound: Mutex::new(Some(tx)),
            joined: Mutex::new(Joined::default()),
            reader: Mutex::new(None),
            closing: watch::channel(false).0,
        };
        (Arc::new(client), rx)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Try to queue an event without waiting
    ///
    /// A full queue drops the new event; older queued events are kept.
    pub fn enqueue(&self, event: Arc<Event>) -> Delivery {
        let outbound = lock(&self.outbound);
        let Some(sender) = outbound.as_ref() else {
            return Delivery::Closed;
        };
        match sender.try_send(event) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Names of the rooms this client has joined
    pub fn rooms(&self) -> Vec<String> {
        lock(&self.joined).rooms.iter().cloned().collect()
    }

    /// Check if this client lists the given room
    pub fn in_room(&self, room: &str) -> bool {
        lock(&self.joined).rooms.contains(room)
    }

    /// Record a joined room (called by the room's control loop)
    ///
    /// Returns false, recording nothing, once the client is retired.
    pub(crate) fn join(&self, room: &str) -> bool {
        let mut joined = lock(&self.joined);
        if joined.retired {
            return false;
        }
        joined.rooms.insert(room.to_string());
        true
    }

    /// Forget a joined room (called by the room's control loop)
    pub(crate) fn leave(&self, room: &str) {
        lock(&self.joined).rooms.remove(room);
    }

    /// Mark the client as going away
    ///
    /// Returns the rooms joined so far; no room is added afterwards.
    pub(crate) fn retire(&self) -> Vec<String> {
        let mut joined = lock(&self.joined);
        joined.retired = true;
        joined.rooms.iter().cloned().collect()
    }

    pub fn is_retired(&self) -> bool {
        lock(&self.joined).retired
    }

    /// Check if the outbound queue has been closed
    pub fn is_closed(&self) -> bool {
        lock(&self.outbound).is_none()
    }

    /// Signal that resolves once the client is closed
    pub(crate) fn closing(&self) -> watch::Receiver<bool> {
        self.closing.subscribe()
    }

    /// Attach the connection's inbound task so `close` can stop it
    pub(crate) fn set_reader(&self, handle: AbortHandle) {
        let mut reader = lock(&self.reader);
        if self.is_closed() {
            handle.abort();
        } else {
            *reader = Some(handle);
        }
    }

    /// Close the outbound queue and stop reading from the connection
    ///
    /// The write task keeps writing queued events while the peer accepts
    /// them, then sends a close frame and exits. A write the peer is not
    /// draining is abandoned and the connection dropped. Safe to call more
    /// than once.
    pub(crate) fn close(&self) {
        self.retire();
        self.closing.send_replace(true);
        lock(&self.outbound).take();
        if let Some(reader) = lock(&self.reader).take() {
            reader.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
