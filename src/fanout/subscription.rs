//! Subscriber handle and its delivery queue

use bytes::Bytes;
use tokio::sync::mpsc;

use super::Fanout;

/// Identifier of one registered subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub(super) u64);

impl SubscriberId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receiving end of one subscriber's bounded queue
///
/// Dropping the subscription unregisters it from the fanout.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Bytes>,
    fanout: Fanout,
}

impl Subscription {
    pub(super) fn new(id: SubscriberId, rx: mpsc::Receiver<Bytes>, fanout: Fanout) -> Self {
        Self { id, rx, fanout }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Receive the next chunk
    ///
    /// Returns `None` once the subscription was unsubscribed or evicted and
    /// every chunk queued before that has been received.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Receive a chunk if one is already queued
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Whether the fanout no longer delivers to this subscription
    pub fn is_evicted(&self) -> bool {
        !self.fanout.lock().contains_key(&self.id)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.fanout.unsubscribe(self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
