use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Why an in-flight generation was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The user pressed stop.
    Stopped,
    /// A newer send replaced this request (global single-flight policy).
    Superseded,
}

#[derive(Debug)]
pub struct AbortHandle {
    tx: Option<oneshot::Sender<AbortReason>>,
}

impl AbortHandle {
    pub fn new(tx: oneshot::Sender<AbortReason>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn abort(&mut self, reason: AbortReason) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(reason);
        }
    }
}

/// Registry of cancel handles keyed by request id. At most one request is
/// expected to be live at a time; `begin` enforces that by aborting every
/// handle it still holds before registering the new one.
#[derive(Clone)]
pub struct AbortRegistry {
    inner: Arc<Mutex<HashMap<String, AbortHandle>>>,
}

impl AbortRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers a cancel handle for `request_id`, superseding (aborting) any
    /// request still in flight.
    pub fn begin(&self, request_id: String) -> oneshot::Receiver<AbortReason> {
        let (tx, rx) = oneshot::channel();
        let handle = AbortHandle::new(tx);

        if let Ok(mut map) = self.inner.lock() {
            for (stale_id, mut stale) in map.drain() {
                tracing::debug!(request_id = %stale_id, "superseding in-flight request");
                stale.abort(AbortReason::Superseded);
            }
            map.insert(request_id, handle);
        }

        rx
    }

    pub fn abort(&self, request_id: &str) -> Result<(), String> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| "Failed to acquire lock on abort registry".to_string())?;
        if let Some(mut handle) = map.remove(request_id) {
            handle.abort(AbortReason::Stopped);
            Ok(())
        } else {
            Err(format!(
                "Request {} not found or already completed",
                request_id
            ))
        }
    }

    pub fn unregister(&self, request_id: &str) {
        if let Ok(mut map) = self.inner.lock() {
            map.remove(request_id);
        }
    }

    pub fn is_registered(&self, request_id: &str) -> bool {
        if let Ok(map) = self.inner.lock() {
            map.contains_key(request_id)
        } else {
            false
        }
    }
}

impl Default for AbortRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_abort_delivers_stopped_reason() {
        let registry = AbortRegistry::new();
        let rx = registry.begin("r1".into());
        registry.abort("r1").unwrap();
        assert_eq!(rx.await.unwrap(), AbortReason::Stopped);
        assert!(!registry.is_registered("r1"));
    }

    #[tokio::test]
    async fn test_begin_supersedes_previous_request() {
        let registry = AbortRegistry::new();
        let rx1 = registry.begin("r1".into());
        let _rx2 = registry.begin("r2".into());
        assert_eq!(rx1.await.unwrap(), AbortReason::Superseded);
        assert!(!registry.is_registered("r1"));
        assert!(registry.is_registered("r2"));
    }

    #[tokio::test]
    async fn test_abort_unknown_request_is_an_error() {
        let registry = AbortRegistry::new();
        assert!(registry.abort("missing").is_err());
    }
}
