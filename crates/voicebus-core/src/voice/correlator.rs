//! Pairs terminal responses with callers waiting on them.

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use voicebus_types::voice::AudioResponse;

/// Pending reply channels keyed by request id.
#[derive(Debug, Default)]
pub struct ResponseCorrelator {
    pending: DashMap<Uuid, oneshot::Sender<AudioResponse>>,
}

impl ResponseCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a reply channel. Must happen before the request is published.
    pub fn register(&self, request_id: Uuid) -> oneshot::Receiver<AudioResponse> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);
        rx
    }

    /// Hand a response to its waiter. Returns `false` if nobody is waiting.
    pub fn complete(&self, response: AudioResponse) -> bool {
        let request_id = response.request_id;
        match self.pending.remove(&request_id) {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => {
                debug!(%request_id, "no pending waiter for response");
                false
            }
        }
    }

    /// Drop a waiter (timeout or publish failure).
    pub fn cancel(&self, request_id: &Uuid) {
        self.pending.remove(request_id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_the_matching_waiter() {
        let correlator = ResponseCorrelator::new();
        let id = Uuid::now_v7();
        let rx = correlator.register(id);

        assert!(!correlator.complete(AudioResponse::success(Uuid::now_v7())));
        assert!(correlator.complete(AudioResponse::success(id)));
        assert_eq!(rx.await.unwrap().request_id, id);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn cancel_removes_waiter() {
        let correlator = ResponseCorrelator::new();
        let id = Uuid::now_v7();
        let _rx = correlator.register(id);
        correlator.cancel(&id);
        assert_eq!(correlator.pending_count(), 0);
        assert!(!correlator.complete(AudioResponse::success(id)));
    }
}
