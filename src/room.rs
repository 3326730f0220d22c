//! Room actor
//!
//! A named broadcast group. Membership changes go through a single control
//! loop; broadcasts go through a shared queue drained by a pool of fan-out
//! workers.
//!
//! Each worker takes a delivery ticket when it dequeues a message and only
//! starts enqueueing onto member queues once every earlier ticket has been
//! delivered. Messages therefore reach each client's outbound queue in the
//! order they were broadcast, whichever worker handled them.
//!
//! Only one worker at a time is inside the delivery step. The pool overlaps
//! on dequeue and ticket handoff, not on delivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, warn};

use crate::client::{Client, Delivery};
use crate::config::RoomConfig;
use crate::event::Event;
use crate::types::ClientId;

type Members = Arc<DashMap<ClientId, Arc<Client>>>;

/// Requests handled by the room's control loop
#[derive(Debug)]
enum Membership {
    Subscribe {
        client: Arc<Client>,
        done: oneshot::Sender<()>,
    },
    Unsubscribe {
        client: Arc<Client>,
        done: oneshot::Sender<()>,
    },
}

/// Named broadcast room
#[derive(Debug)]
pub struct Room {
    name: String,
    members: Members,
    control: mpsc::Sender<Membership>,
    broadcast: mpsc::Sender<Arc<Event>>,
    workers: usize,
}

impl Room {
    /// Create a room and start its control loop and fan-out workers
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(name: impl Into<String>, config: &RoomConfig) -> Arc<Self> {
        let name = name.into();
        let members: Members = Arc::new(DashMap::new());
        let (control_tx, control_rx) = mpsc::channel(config.control_buffer.max(1));
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_buffer.max(1));
        let workers = config.workers.max(1);

        let control = ControlLoop {
            room: name.clone(),
            members: members.clone(),
            receiver: control_rx,
        };
        tokio::spawn(control.run());

        let (delivered, _) = watch::channel(0);
        let fanout = Arc::new(FanOut {
            room: name.clone(),
            members: members.clone(),
            queue: Mutex::new(broadcast_rx),
            next_ticket: AtomicU64::new(0),
            delivered,
        });
        for worker in 0..workers {
            tokio::spawn(fanout.clone().run_worker(worker));
        }

        debug!(room = %name, workers, "Room started");

        Arc::new(Self {
            name,
            members,
            control: control_tx,
            broadcast: broadcast_tx,
            workers,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the fan-out worker pool
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Number of current members
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if a client is a member
    pub fn contains(&self, client_id: ClientId) -> bool {
        self.members.contains_key(&client_id)
    }

    /// Add a client to the room
    ///
    /// No-op if the client is already a member or is being torn down.
    /// Returns once the control loop has applied the change.
    pub async fn subscribe(&self, client: &Arc<Client>) {
        let (done, applied) = oneshot::channel();
        let request = Membership::Subscribe {
            client: client.clone(),
            done,
        };
        if self.control.send(request).await.is_ok() {
            let _ = applied.await;
        }
    }

    /// Remove a client from the room
    ///
    /// No-op if the client is not a member. Returns once applied.
    pub async fn unsubscribe(&self, client: &Arc<Client>) {
        let (done, applied) = oneshot::channel();
        let request = Membership::Unsubscribe {
            client: client.clone(),
            done,
        };
        if self.control.send(request).await.is_ok() {
            let _ = applied.await;
        }
    }

    /// Queue an event for delivery to all current members
    pub async fn broadcast(&self, event: Arc<Event>) {
        if self.broadcast.send(event).await.is_err() {
            warn!(room = %self.name, "Broadcast queue closed, event discarded");
        }
    }
}

/// Serialized membership owner
struct ControlLoop {
    room: String,
    members: Members,
    receiver: mpsc::Receiver<Membership>,
}

impl ControlLoop {
    async fn run(mut self) {
        while let Some(request) = self.receiver.recv().await {
            match request {
                Membership::Subscribe { client, done } => {
                    self.handle_subscribe(client);
                    let _ = done.send(());
                }
                Membership::Unsubscribe { client, done } => {
                    self.handle_unsubscribe(&client);
                    let _ = done.send(());
                }
            }
        }
        debug!(room = %self.room, "Room control loop stopped");
    }

    fn handle_subscribe(&self, client: Arc<Client>) {
        let id = client.id();
        if self.members.contains_key(&id) {
            return;
        }
        if !client.join(&self.room) {
            debug!(room = %self.room, client = %id, "Ignoring subscribe from retired client");
            return;
        }
        self.members.insert(id, client);
        info!(room = %self.room, client = %id, "Client joined room");
    }

    fn handle_unsubscribe(&self, client: &Client) {
        if self.members.remove(&client.id()).is_some() {
            client.leave(&self.room);
            info!(room = %self.room, client = %client.id(), "Client left room");
        }
    }
}

/// State shared by the fan-out workers of one room
struct FanOut {
    room: String,
    members: Members,
    queue: Mutex<mpsc::Receiver<Arc<Event>>>,
    /// Ticket handed to the next dequeued message
    next_ticket: AtomicU64,
    /// Number of messages whose delivery has finished
    delivered: watch::Sender<u64>,
}

impl FanOut {
    async fn run_worker(self: Arc<Self>, worker: usize) {
        let mut turn = self.delivered.subscribe();

        loop {
            let (ticket, event) = {
                let mut queue = self.queue.lock().await;
                match queue.recv().await {
                    Some(event) => (self.next_ticket.fetch_add(1, Ordering::SeqCst), event),
                    None => break,
                }
            };

            if turn.wait_for(|delivered| *delivered == ticket).await.is_err() {
                break;
            }
            self.deliver(worker, &event);
            self.delivered.send_modify(|delivered| *delivered += 1);
        }

        debug!(room = %self.room, worker, "Fan-out worker stopped");
    }

    fn deliver(&self, worker: usize, event: &Arc<Event>) {
        for member in self.members.iter() {
            match member.value().enqueue(event.clone()) {
                Delivery::Queued | Delivery::Closed => {}
                Delivery::Dropped => {
                    warn!(
                        room = %self.room,
                        client = %member.key(),
                        worker,
                        event_type = %event.event_type,
                        "Outbound queue full, event dropped"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::timeout;

    fn config(workers: usize) -> RoomConfig {
        RoomConfig {
            control_buffer: 8,
            broadcast_buffer: 8,
            workers,
        }
    }

    fn event(n: usize) -> Arc<Event> {
        Arc::new(Event::new("chat:message", json!({ "n": n })))
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let room = Room::new("chat", &config(2));
        let (client, _rx) = Client::new(ClientId::new(), 8);

        room.subscribe(&client).await;
        room.subscribe(&client).await;
        assert_eq!(room.member_count(), 1);
        assert!(room.contains(client.id()));
        assert!(client.in_room("chat"));

        room.unsubscribe(&client).await;
        room.unsubscribe(&client).await;
        assert_eq!(room.member_count(), 0);
        assert!(!client.in_room("chat"));
    }

    #[tokio::test]
    async fn test_membership_matches_reference_set() {
        let room = Room::new("chat", &config(2));
        let clients: Vec<_> = (0..3).map(|_| Client::new(ClientId::new(), 8)).collect();

        // (client index, subscribe?) sequence with repeats in both directions
        let ops = [
            (0, true), (1, true), (0, true), (2, false), (1, false),
            (1, false), (2, true), (0, false), (0, true), (2, true),
        ];
        let mut reference = HashSet::new();
        for (idx, subscribe) in ops {
            let (client, _) = &clients[idx];
            if subscribe {
                room.subscribe(client).await;
                reference.insert(idx);
            } else {
                room.unsubscribe(client).await;
                reference.remove(&idx);
            }
        }

        assert_eq!(room.member_count(), reference.len());
        for (idx, (client, _)) in clients.iter().enumerate() {
            assert_eq!(room.contains(client.id()), reference.contains(&idx));
            assert_eq!(client.in_room("chat"), reference.contains(&idx));
        }
    }

    #[tokio::test]
    async fn test_worker_pool_has_at_least_one_worker() {
        assert_eq!(Room::new("chat", &config(16)).workers(), 16);

        let room = Room::new("chat", &config(0));
        assert_eq!(room.workers(), 1);
        let (client, mut rx) = Client::new(ClientId::new(), 8);
        room.subscribe(&client).await;
        room.broadcast(event(1)).await;
        let got = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(got.payload, json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_retired_client_cannot_join() {
        let room = Room::new("chat", &config(1));
        let (client, _rx) = Client::new(ClientId::new(), 8);
        client.retire();

        room.subscribe(&client).await;
        assert_eq!(room.member_count(), 0);
        assert!(client.rooms().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_without_members_drains() {
        let room = Room::new("empty", &config(4));
        let result = timeout(Duration::from_secs(5), async {
            for n in 0..200 {
                room.broadcast(event(n)).await;
            }
        })
        .await;
        assert!(result.is_ok(), "broadcast blocked on an empty room");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_member_once() {
        let room = Room::new("chat", &config(4));
        let (a, mut rx_a) = Client::new(ClientId::new(), 8);
        let (b, mut rx_b) = Client::new(ClientId::new(), 8);
        room.subscribe(&a).await;
        room.subscribe(&b).await;

        room.broadcast(event(7)).await;

        for rx in [&mut rx_a, &mut rx_b] {
            let got = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
            assert_eq!(got.payload, json!({"n": 7}));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_per_client_order_preserved() {
        const MESSAGES: usize = 300;
        let room = Room::new("chat", &config(16));
        let (client, mut rx) = Client::new(ClientId::new(), MESSAGES);
        room.subscribe(&client).await;

        for n in 0..MESSAGES {
            room.broadcast(event(n)).await;
        }

        let mut received = Vec::with_capacity(MESSAGES);
        while received.len() < MESSAGES {
            let got = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
            received.push(got.payload["n"].as_u64().unwrap() as usize);
        }
        assert_eq!(received, (0..MESSAGES).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_full_member_does_not_block_others() {
        let room = Room::new("chat", &config(2));
        let (slow, mut slow_rx) = Client::new(ClientId::new(), 1);
        let (fast, mut fast_rx) = Client::new(ClientId::new(), 16);
        room.subscribe(&slow).await;
        room.subscribe(&fast).await;

        for n in 0..5 {
            room.broadcast(event(n)).await;
        }

        for n in 0..5 {
            let got = timeout(Duration::from_secs(5), fast_rx.recv()).await.unwrap().unwrap();
            assert_eq!(got.payload, json!({ "n": n }));
        }
        assert_eq!(slow_rx.recv().await.unwrap().payload, json!({"n": 0}));
        assert!(slow_rx.try_recv().is_err());
    }
}
