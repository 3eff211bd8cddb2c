//! Default handlers installed on every session.
//!
//! Many servers send `workspace/configuration`, `client/registerCapability`
//! and friends during startup and block until answered. These keep them
//! moving; callers may replace any of them by registering the same method.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Value, json};

use crate::diagnostics::{Applied, DiagnosticsStore};
use crate::handlers::Handlers;
use crate::protocol::{self, ConfigurationParams, MessageParams, PublishDiagnosticsParams};

pub(crate) fn install(
    handlers: &Handlers,
    diagnostics: Arc<Mutex<DiagnosticsStore>>,
    workspace_root: &Path,
) {
    handlers.on_request("workspace/configuration", |params| async move {
        let items = params
            .map(serde_json::from_value::<ConfigurationParams>)
            .transpose()?
            .map_or(0, |p| p.items.len());
        Ok(Value::Array(vec![Value::Null; items]))
    });
    for method in [
        "client/registerCapability",
        "client/unregisterCapability",
        "window/workDoneProgress/create",
        "window/showMessageRequest",
    ] {
        handlers.on_request(method, |_| async { Ok(Value::Null) });
    }
    handlers.on_request("workspace/applyEdit", |_| async {
        Ok(json!({
            "applied": false,
            "failureReason": "workspace edits are not applied by this client"
        }))
    });

    handlers.on_notification("window/showMessage", |params| async move {
        log_server_message("showMessage", params);
    });
    handlers.on_notification("window/logMessage", |params| async move {
        log_server_message("logMessage", params);
    });

    let root = normalize_path(workspace_root);
    handlers.on_notification("textDocument/publishDiagnostics", move |params| {
        let diagnostics = Arc::clone(&diagnostics);
        let root = root.clone();
        async move {
            if let Some(params) = params {
                record_diagnostics(&diagnostics, &root, params);
            }
        }
    });
}

fn log_server_message(kind: &str, params: Option<Value>) {
    let Some(params) = params else { return };
    match serde_json::from_value::<MessageParams>(params) {
        Ok(MessageParams { kind: 1, message }) => tracing::error!(%kind, "server: {message}"),
        Ok(MessageParams { kind: 2, message }) => tracing::warn!(%kind, "server: {message}"),
        Ok(MessageParams { kind: 3, message }) => tracing::info!(%kind, "server: {message}"),
        Ok(MessageParams { message, .. }) => tracing::debug!(%kind, "server: {message}"),
        Err(e) => tracing::debug!(%kind, "unparseable server message: {e}"),
    }
}

fn record_diagnostics(store: &Mutex<DiagnosticsStore>, root: &Path, params: Value) {
    let params = match serde_json::from_value::<PublishDiagnosticsParams>(params) {
        Ok(params) => params,
        Err(e) => {
            tracing::debug!("Failed to parse publishDiagnostics: {e}");
            return;
        }
    };
    let Some(path) = protocol::file_uri_to_path(&params.uri) else {
        tracing::debug!(uri = %params.uri, "ignoring diagnostics for non-file URI");
        return;
    };
    let normalized = normalize_path(&path);
    if !normalized.starts_with(root) {
        tracing::warn!(
            "LSP reported diagnostics for path outside workspace: {}",
            path.display()
        );
        return;
    }

    let items: Vec<_> = params
        .diagnostics
        .iter()
        .map(protocol::LspDiagnostic::to_diagnostic)
        .collect();
    let count = items.len();
    let applied = store
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .update(normalized.clone(), params.version, items);
    match applied {
        Applied::Replaced => {
            tracing::debug!(path = %normalized.display(), count, "Diagnostics updated");
        }
        Applied::Cleared => tracing::debug!(path = %normalized.display(), "Diagnostics cleared"),
        Applied::Stale { stored } => tracing::debug!(
            path = %normalized.display(),
            version = ?params.version,
            stored,
            "dropping stale diagnostics"
        ),
    }
}

pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Handlers, Arc<Mutex<DiagnosticsStore>>, PathBuf) {
        #[cfg(windows)]
        let root = PathBuf::from(r"C:\test");
        #[cfg(not(windows))]
        let root = PathBuf::from("/test");

        let handlers = Handlers::new();
        let store = Arc::new(Mutex::new(DiagnosticsStore::new()));
        install(&handlers, Arc::clone(&store), &root);
        (handlers, store, root)
    }

    fn publish(uri: &str) -> Value {
        json!({
            "uri": uri,
            "diagnostics": [{
                "range": { "start": { "line": 5, "character": 0 }, "end": { "line": 5, "character": 10 } },
                "severity": 1,
                "source": "rustc",
                "message": "expected `;`"
            }]
        })
    }

    #[tokio::test]
    async fn test_publish_diagnostics_updates_store() {
        let (handlers, store, root) = setup();
        #[cfg(windows)]
        let uri = "file:///C:/test/main.rs";
        #[cfg(not(windows))]
        let uri = "file:///test/main.rs";

        let handler = handlers
            .notification_handler("textDocument/publishDiagnostics")
            .unwrap();
        handler(Some(publish(uri))).await;

        let items = store.lock().unwrap().for_file(&root.join("main.rs"));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].message(), "expected `;`");
        assert!(items[0].severity().is_error());
    }

    #[tokio::test]
    async fn test_stale_publication_does_not_restore_cleared_file() {
        let (handlers, store, root) = setup();
        #[cfg(windows)]
        let uri = "file:///C:/test/main.rs";
        #[cfg(not(windows))]
        let uri = "file:///test/main.rs";

        let handler = handlers
            .notification_handler("textDocument/publishDiagnostics")
            .unwrap();
        handler(Some(json!({"uri": uri, "version": 3, "diagnostics": []}))).await;
        let mut old = publish(uri);
        old["version"] = json!(2);
        handler(Some(old)).await;

        assert!(store.lock().unwrap().for_file(&root.join("main.rs")).is_empty());
        assert!(store.lock().unwrap().snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_diagnostics_outside_workspace() {
        let (handlers, store, _root) = setup();
        #[cfg(windows)]
        let uris = ["file:///C:/etc/passwd", "file:///C:/test/../etc/passwd"];
        #[cfg(not(windows))]
        let uris = ["file:///etc/passwd", "file:///test/../etc/passwd"];

        let handler = handlers
            .notification_handler("textDocument/publishDiagnostics")
            .unwrap();
        for uri in uris {
            handler(Some(publish(uri))).await;
        }
        assert!(store.lock().unwrap().snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_workspace_configuration_answers_one_null_per_item() {
        let (handlers, _store, _root) = setup();
        let handler = handlers.request_handler("workspace/configuration").unwrap();

        let result = handler(Some(json!({"items": [{"section": "gopls"}, {}]})))
            .await
            .unwrap();
        assert_eq!(result, json!([null, null]));
        assert_eq!(handler(None).await.unwrap(), json!([]));
        assert!(handler(Some(json!({"items": 3}))).await.is_err());
    }

    #[tokio::test]
    async fn test_capability_registration_acknowledged() {
        let (handlers, _store, _root) = setup();
        let handler = handlers.request_handler("client/registerCapability").unwrap();
        assert_eq!(handler(Some(json!({"registrations": []}))).await.unwrap(), Value::Null);

        let handler = handlers.request_handler("workspace/applyEdit").unwrap();
        assert_eq!(handler(None).await.unwrap()["applied"], false);
    }

    #[test]
    fn test_normalize_path_resolves_dots() {
        assert_eq!(
            normalize_path(Path::new("/test/./src/../main.rs")),
            PathBuf::from("/test/main.rs")
        );
    }
}
