//! Default event catalogue
//!
//! | Type                 | Effect                                         |
//! |----------------------|------------------------------------------------|
//! | `subscribe:<room>`   | joins the sender to `<room>`                   |
//! | `unsubscribe:<room>` | removes the sender from `<room>`               |
//! | `<room>:message`     | stamps `sent` and rebroadcasts to `<room>`     |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::Client;
use crate::event::Event;
use crate::hub::Hub;

/// Chat message as sent by a client
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatMessageIn {
    pub from: String,
    pub message: String,
}

/// Chat message as rebroadcast to the room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessageOut {
    pub from: String,
    pub message: String,
    /// Server receive time
    pub sent: DateTime<Utc>,
}

/// `subscribe:<room>`
pub async fn subscribe(hub: Arc<Hub>, client: Arc<Client>, event: Event) {
    if let Some(room) = event.action() {
        hub.subscribe(room, &client).await;
    }
}

/// `unsubscribe:<room>`
pub async fn unsubscribe(hub: Arc<Hub>, client: Arc<Client>, event: Event) {
    if let Some(room) = event.action() {
        hub.unsubscribe(room, &client).await;
    }
}

/// `<room>:message`
pub async fn chat_message(hub: Arc<Hub>, client: Arc<Client>, event: Event) {
    let incoming: ChatMessageIn = match event.payload_as() {
        Ok(message) => message,
        Err(e) => {
            warn!(client = %client.id(), event_type = %event.event_type, "Invalid chat message: {}", e);
            return;
        }
    };

    let outgoing = ChatMessageOut {
        from: incoming.from,
        message: incoming.message,
        sent: Utc::now(),
    };
    hub.emit(&event.event_type, &outgoing).await;
}

/// Register the default catalogue for every room the hub currently has
pub fn install(hub: &Hub) {
    for room in hub.room_names() {
        hub.register_handler(format!("subscribe:{}", room), subscribe)
            .register_handler(format!("unsubscribe:{}", room), unsubscribe)
            .register_handler(format!("{}:message", room), chat_message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::{json, Value};
    use tokio::time::{sleep, timeout};

    use crate::config::HubConfig;
    use crate::types::ClientId;

    fn hub_with_rooms() -> Arc<Hub> {
        let hub = Hub::new(HubConfig::default());
        hub.create_rooms(["chat", "roulette"]);
        install(&hub);
        hub
    }

    #[tokio::test]
    async fn test_install_registers_catalogue_per_room() {
        let hub = hub_with_rooms();
        let router = hub.router();
        for room in ["chat", "roulette"] {
            assert!(router.contains(&format!("subscribe:{}", room)));
            assert!(router.contains(&format!("unsubscribe:{}", room)));
            assert!(router.contains(&format!("{}:message", room)));
        }
        assert_eq!(router.len(), 6);
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe_handlers() {
        let hub = hub_with_rooms();
        let (client, _rx) = Client::new(ClientId::new(), 8);

        hub.dispatch(&client, Event::new("subscribe:chat", Value::Null)).await;
        assert!(hub.room("chat").unwrap().contains(client.id()));
        assert!(client.in_room("chat"));

        hub.dispatch(&client, Event::new("unsubscribe:chat", json!({"ignored": true}))).await;
        assert!(!hub.room("chat").unwrap().contains(client.id()));
        assert!(client.rooms().is_empty());
    }

    #[tokio::test]
    async fn test_chat_message_is_stamped_and_rebroadcast() {
        let hub = hub_with_rooms();
        let (sender, _sender_rx) = Client::new(ClientId::new(), 8);
        let (listener, mut rx) = Client::new(ClientId::new(), 8);
        hub.subscribe("chat", &listener).await;

        let before = Utc::now();
        hub.dispatch(&sender, Event::new("chat:message", json!({"from": "A", "message": "hi"})))
            .await;

        let got = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(got.event_type, "chat:message");
        let out: ChatMessageOut = got.payload_as().unwrap();
        assert_eq!(out.from, "A");
        assert_eq!(out.message, "hi");
        assert!(out.sent >= before);
    }

    #[tokio::test]
    async fn test_invalid_chat_payload_is_not_rebroadcast() {
        let hub = hub_with_rooms();
        let (client, mut rx) = Client::new(ClientId::new(), 8);
        hub.subscribe("chat", &client).await;

        hub.dispatch(&client, Event::new("chat:message", json!({"from": 1}))).await;

        sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
