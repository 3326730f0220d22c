//! Event dispatch table
//!
//! Maps full event type strings (`subscribe:chat`, `chat:message`) to
//! handlers. Lookup is exact-match; unknown types are ignored.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::client::Client;
use crate::event::Event;
use crate::hub::Hub;

/// Handler invoked for a matching inbound event
///
/// Implemented for any `async fn(Arc<Hub>, Arc<Client>, Event)`.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, hub: Arc<Hub>, client: Arc<Client>, event: Event) -> BoxFuture<'static, ()>;
}

impl<F, Fut> EventHandler for F
where
    F: Fn(Arc<Hub>, Arc<Client>, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn handle(&self, hub: Arc<Hub>, client: Arc<Client>, event: Event) -> BoxFuture<'static, ()> {
        (self)(hub, client, event).boxed()
    }
}

/// Event type → handler registry
#[derive(Default)]
pub struct Router {
    handlers: DashMap<String, Arc<dyn EventHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same type
    pub fn insert(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(event_type.into(), handler);
    }

    /// Look up the handler for an exact event type
    pub fn get(&self, event_type: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers
            .get(event_type)
            .map(|entry| entry.value().clone())
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        types.sort();
        f.debug_struct("Router").field("handlers", &types).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::Value;

    use crate::config::HubConfig;
    use crate::types::ClientId;

    static FIRST: AtomicUsize = AtomicUsize::new(0);
    static SECOND: AtomicUsize = AtomicUsize::new(0);

    async fn first(_hub: Arc<Hub>, _client: Arc<Client>, _event: Event) {
        FIRST.fetch_add(1, Ordering::SeqCst);
    }

    async fn second(_hub: Arc<Hub>, _client: Arc<Client>, _event: Event) {
        SECOND.fetch_add(1, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn test_exact_match_and_overwrite() {
        let hub = Hub::new(HubConfig::default());
        let (client, _rx) = Client::new(ClientId::new(), 4);
        let router = Router::new();
        assert!(router.is_empty());

        router.insert("test:event", Arc::new(first));
        assert!(router.contains("test:event"));
        assert!(router.get("test").is_none());
        assert!(router.get("test:event:x").is_none());

        let handler = router.get("test:event").unwrap();
        handler
            .handle(hub.clone(), client.clone(), Event::new("test:event", Value::Null))
            .await;
        assert_eq!(FIRST.load(Ordering::SeqCst), 1);

        router.insert("test:event", Arc::new(second));
        assert_eq!(router.len(), 1);
        let handler = router.get("test:event").unwrap();
        handler
            .handle(hub, client, Event::new("test:event", Value::Null))
            .await;
        assert_eq!(FIRST.load(Ordering::SeqCst), 1);
        assert_eq!(SECOND.load(Ordering::SeqCst), 1);
    }
}
