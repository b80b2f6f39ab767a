//! Hook registry: manages hook subscriptions and dispatches events.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::events::HookEvent;

/// Async hook handler function type.
pub type HookHandler =
    Arc<dyn Fn(HookEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Manages hook subscriptions and dispatches events.
pub struct HookRegistry {
    /// Map from event type name to handlers. `"*"` receives everything.
    handlers: RwLock<HashMap<String, Vec<HookHandler>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for a specific event type.
    pub async fn on(&self, event_type: &str, handler: HookHandler) {
        let mut handlers = self.handlers.write().await;
        handlers
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }

    /// Register a handler for multiple event types.
    pub async fn on_many(&self, event_types: &[&str], handler: HookHandler) {
        for event_type in event_types {
            self.on(event_type, handler.clone()).await;
        }
    }

    /// Dispatch an event to all registered handlers.
    ///
    /// Handlers run on spawned tasks; `emit` never waits for them.
    pub async fn emit(&self, event: HookEvent) {
        let handlers = self.handlers.read().await;
        let specific = handlers.get(event.type_name()).into_iter().flatten();
        let wildcard = handlers.get("*").into_iter().flatten();

        for handler in specific.chain(wildcard) {
            let event_clone = event.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                handler(event_clone).await;
            });
        }
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}
