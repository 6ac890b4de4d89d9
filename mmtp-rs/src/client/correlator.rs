//! Pending-request table.
//!
//! Every outgoing request carries a fresh `requestId`; the server echoes it
//! on the response frame and the reader task resolves the matching entry
//! here. This replaces the historical scheme that keyed trackers by action
//! name with a single outstanding slot, under which two concurrent requests
//! of the same action could deliver a response to the wrong caller.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{oneshot, Mutex};
use tracing::warn;

#[derive(Default)]
pub struct Correlator {
    pending: Mutex<HashMap<String, oneshot::Sender<Value>>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a request; the receiver resolves when the response arrives.
    pub async fn register(&self, request_id: &str) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().await;
        pending.insert(request_id.to_string(), tx);
        rx
    }

    /// Resolve the tracker for `request_id`, if still outstanding.
    pub async fn complete(&self, request_id: &str, response: Value) {
        let sender = {
            let mut pending = self.pending.lock().await;
            pending.remove(request_id)
        };
        match sender {
            // A dropped receiver just means the caller timed out already.
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => warn!(request_id, "Response for unknown or expired request"),
        }
    }

    /// Drop a tracker after a local timeout so a late response is not
    /// misdelivered.
    pub async fn forget(&self, request_id: &str) {
        let mut pending = self.pending.lock().await;
        pending.remove(request_id);
    }

    /// Fail every outstanding tracker; used when the connection closes.
    pub async fn abort_all(&self) {
        let mut pending = self.pending.lock().await;
        pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn completes_by_request_id() {
        let correlator = Correlator::new();
        let rx_a = correlator.register("a").await;
        let rx_b = correlator.register("b").await;

        correlator.complete("b", json!({"n": 2})).await;
        correlator.complete("a", json!({"n": 1})).await;

        assert_eq!(rx_a.await.unwrap()["n"], 1);
        assert_eq!(rx_b.await.unwrap()["n"], 2);
    }

    #[tokio::test]
    async fn forgotten_tracker_ignores_late_response() {
        let correlator = Correlator::new();
        let rx = correlator.register("a").await;
        correlator.forget("a").await;
        correlator.complete("a", json!({})).await;
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn abort_fails_outstanding_requests() {
        let correlator = Correlator::new();
        let rx = correlator.register("a").await;
        correlator.abort_all().await;
        assert!(rx.await.is_err());
    }
}
