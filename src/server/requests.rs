//! In-flight request tracking.
//!
//! Every request the dispatcher hands to a handler task is registered here
//! with its cancellation token. Entries leave the set in exactly one of three
//! ways: the handler finishes (the [`LiveRequestGuard`] is dropped), the peer
//! cancels the request by id, or the server cancels everything on shutdown.
//! All three go through one lock, so they never interleave.

use crate::protocol::RequestId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

struct Entry {
    token: CancellationToken,
    generation: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<RequestId, Entry>,
    next_generation: u64,
}

/// Map of request id to the cancellation token of its running handler.
#[derive(Default)]
pub struct LiveRequests {
    inner: Mutex<Inner>,
}

impl LiveRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `token` under `id` until the returned guard is dropped.
    ///
    /// A peer reusing the id of a request that is still running replaces the
    /// older entry; the older request then completes without touching the
    /// newer one. Ids are keyed by [`RequestId::canonical`], so `1` and `1.0`
    /// collide.
    pub fn register(self: &Arc<Self>, id: RequestId, token: CancellationToken) -> LiveRequestGuard {
        let id = id.canonical();
        let mut inner = self.inner.lock();
        let generation = inner.next_generation;
        inner.next_generation += 1;

        if inner
            .entries
            .insert(id.clone(), Entry { token, generation })
            .is_some()
        {
            warn!(id = %id, "Request id reused while a previous request is still running");
        }

        LiveRequestGuard {
            requests: Arc::clone(self),
            id,
            generation,
        }
    }

    /// Cancel and forget the request with this id.
    ///
    /// Returns `true` only if a live entry existed; repeated calls return `false`.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.remove(&id.canonical()) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel and forget every live request. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.entries.len();
        for (_, entry) in inner.entries.drain() {
            entry.token.cancel();
        }
        if count > 0 {
            debug!(count, "Cancelled all live requests");
        }
        count
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.inner.lock().entries.contains_key(&id.canonical())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    fn complete(&self, id: &RequestId, generation: u64) {
        let mut inner = self.inner.lock();
        if inner
            .entries
            .get(id)
            .is_some_and(|entry| entry.generation == generation)
        {
            inner.entries.remove(id);
        }
    }
}

/// RAII guard that removes the request from the live set on drop.
pub struct LiveRequestGuard {
    requests: Arc<LiveRequests>,
    id: RequestId,
    generation: u64,
}

impl Drop for LiveRequestGuard {
    fn drop(&mut self) {
        self.requests.complete(&self.id, self.generation);
    }
}
