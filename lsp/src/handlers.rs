//! Handler registries for peer-initiated requests and notifications.
//!
//! Two independent maps keyed by method name, each behind its own
//! `RwLock`. The dispatch loop only reads; registration may happen at any
//! time. Re-registering a method replaces the previous handler.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;

/// Answers a peer request. An `Err` becomes a `-32603` response.
pub type RequestHandler =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Consumes a peer notification. Invocations for one method run one at a
/// time, in arrival order.
pub type NotificationHandler = Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, ()> + Send + Sync>;

struct Registry<H> {
    map: RwLock<HashMap<String, H>>,
}

impl<H: Clone> Registry<H> {
    fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    fn insert(&self, method: String, handler: H) -> bool {
        self.map
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method, handler)
            .is_some()
    }

    fn remove(&self, method: &str) -> bool {
        self.map
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(method)
            .is_some()
    }

    /// Clone the handler out so no lock is held while it runs.
    fn get(&self, method: &str) -> Option<H> {
        self.map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .cloned()
    }
}

/// Both registries, owned by one connection.
pub struct Handlers {
    requests: Registry<RequestHandler>,
    notifications: Registry<NotificationHandler>,
}

impl Default for Handlers {
    fn default() -> Self {
        Self::new()
    }
}

impl Handlers {
    #[must_use]
    pub fn new() -> Self {
        Self {
            requests: Registry::new(),
            notifications: Registry::new(),
        }
    }

    /// Register a handler for a peer request. Returns true if it replaced one.
    pub fn on_request<F, Fut>(&self, method: impl Into<String>, handler: F) -> bool
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: RequestHandler = Arc::new(move |params| handler(params).boxed());
        self.requests.insert(method.into(), handler)
    }

    /// Register a handler for a peer notification. Returns true if it replaced one.
    pub fn on_notification<F, Fut>(&self, method: impl Into<String>, handler: F) -> bool
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: NotificationHandler = Arc::new(move |params| handler(params).boxed());
        self.notifications.insert(method.into(), handler)
    }

    pub fn remove_request_handler(&self, method: &str) -> bool {
        self.requests.remove(method)
    }

    pub fn remove_notification_handler(&self, method: &str) -> bool {
        self.notifications.remove(method)
    }

    pub(crate) fn request_handler(&self, method: &str) -> Option<RequestHandler> {
        self.requests.get(method)
    }

    pub(crate) fn notification_handler(&self, method: &str) -> Option<NotificationHandler> {
        self.notifications.get(method)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_request_handler_lookup_and_invoke() {
        let handlers = Handlers::new();
        handlers.on_request("workspace/configuration", |_| async { Ok(json!([null])) });

        let handler = handlers.request_handler("workspace/configuration").unwrap();
        assert_eq!(handler(None).await.unwrap(), json!([null]));
        assert!(handlers.request_handler("missing").is_none());
    }

    #[tokio::test]
    async fn test_reregistration_replaces() {
        let handlers = Handlers::new();
        assert!(!handlers.on_request("m", |_| async { Ok(json!(1)) }));
        assert!(handlers.on_request("m", |_| async { Ok(json!(2)) }));

        let handler = handlers.request_handler("m").unwrap();
        assert_eq!(handler(None).await.unwrap(), json!(2));
    }

    #[test]
    fn test_registries_are_independent() {
        let handlers = Handlers::new();
        handlers.on_notification("m", |_| async {});
        assert!(handlers.notification_handler("m").is_some());
        assert!(handlers.request_handler("m").is_none());
    }

    #[test]
    fn test_remove_handlers() {
        let handlers = Handlers::new();
        handlers.on_notification("n", |_| async {});
        handlers.on_request("r", |_| async { Ok(Value::Null) });

        assert!(handlers.remove_notification_handler("n"));
        assert!(!handlers.remove_notification_handler("n"));
        assert!(handlers.remove_request_handler("r"));
        assert!(handlers.notification_handler("n").is_none());
        assert!(handlers.request_handler("r").is_none());
    }
}
