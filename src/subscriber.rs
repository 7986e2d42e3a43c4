//! Concurrent set of observers receiving unsolicited events and terminal
//! signals (spec.md §4.5).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::AmiError;
use crate::message::Message;

/// A consumer of unsolicited AMI events and the client's terminal lifecycle
/// signal. After `on_error` or `on_completed`, a subscriber is removed and
/// never signalled again.
///
/// Implementations must not block indefinitely: dispatch runs synchronously
/// on the worker's task, so a slow subscriber stalls ingest for every other
/// subscriber. The recommended pattern is to forward to a bounded channel
/// and drop on overflow rather than await unbounded work here.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Delivers one unsolicited event, in wire order.
    async fn on_next(&self, message: &Message);
    /// Delivers the client's fault, if it stopped due to one. Terminal.
    async fn on_error(&self, cause: &AmiError);
    /// Delivers voluntary completion. Terminal.
    async fn on_completed(&self);
}

/// An opaque identifier returned by [`SubscriberSet::add`], used to remove a
/// subscriber again via [`SubscriberSet::remove`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Entry {
    id: SubscriptionId,
    subscriber: Arc<dyn Subscriber>,
}

/// A concurrent set of [`Subscriber`]s. Dispatch iterates a snapshot taken
/// under the lock, so a subscriber added mid-dispatch may miss that
/// particular message (spec.md §4.5).
pub struct SubscriberSet {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Adds `subscriber`. Idempotent: adding the same `Arc` pointer twice
    /// returns the existing subscription's id rather than duplicating it.
    pub fn add(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries
            .iter()
            .find(|e| Arc::ptr_eq(&e.subscriber, &subscriber))
        {
            return existing.id;
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        entries.push(Entry { id, subscriber });
        id
    }

    /// Removes the subscriber registered under `id`, if any.
    pub fn remove(&self, id: SubscriptionId) {
        self.entries.lock().unwrap().retain(|e| e.id != id);
    }

    fn snapshot(&self) -> Vec<Arc<dyn Subscriber>> {
        self.entries.lock().unwrap().iter().map(|e| Arc::clone(&e.subscriber)).collect()
    }

    /// Delivers `msg` to every current subscriber, in order.
    pub async fn dispatch_next(&self, msg: &Message) {
        for subscriber in self.snapshot() {
            subscriber.on_next(msg).await;
        }
    }

    /// Delivers the terminal signal (`on_error` if `cause` is `Some`, else
    /// `on_completed`) to every current subscriber, then empties the set.
    pub async fn dispatch_terminal(&self, cause: Option<&AmiError>) {
        let drained: Vec<_> = std::mem::take(&mut *self.entries.lock().unwrap())
            .into_iter()
            .map(|e| e.subscriber)
            .collect();
        for subscriber in drained {
            match cause {
                Some(e) => subscriber.on_error(e).await,
                None => subscriber.on_completed().await,
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl Default for SubscriberSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    struct Recorder {
        next: AtomicUsize,
        completed: AtomicUsize,
        errored: AtomicUsize,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                next: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                errored: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Subscriber for Recorder {
        async fn on_next(&self, _message: &Message) {
            self.next.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_error(&self, _cause: &AmiError) {
            self.errored.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_completed(&self) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dispatch_next_reaches_all_subscribers_in_order() {
        let set = SubscriberSet::new();
        let a = Recorder::new();
        let b = Recorder::new();
        set.add(a.clone());
        set.add(b.clone());

        set.dispatch_next(&Message::new()).await;
        set.dispatch_next(&Message::new()).await;

        assert_eq!(a.next.load(Ordering::SeqCst), 2);
        assert_eq!(b.next.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn duplicate_add_is_idempotent() {
        let set = SubscriberSet::new();
        let a = Recorder::new();
        let id1 = set.add(a.clone());
        let id2 = set.add(a.clone());
        assert_eq!(id1, id2);
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn terminal_dispatch_empties_the_set_and_fires_once() {
        let set = SubscriberSet::new();
        let a = Recorder::new();
        set.add(a.clone());

        set.dispatch_terminal(None).await;
        assert_eq!(a.completed.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 0);
    }

    #[tokio::test]
    async fn terminal_dispatch_with_cause_fires_on_error() {
        let set = SubscriberSet::new();
        let a = Recorder::new();
        set.add(a.clone());

        set.dispatch_terminal(Some(&AmiError::Cancelled)).await;
        assert_eq!(a.errored.load(Ordering::SeqCst), 1);
        assert_eq!(a.completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn remove_stops_further_dispatch() {
        let set = SubscriberSet::new();
        let a = Recorder::new();
        let id = set.add(a.clone());
        set.remove(id);

        set.dispatch_next(&Message::new()).await;
        assert_eq!(a.next.load(Ordering::SeqCst), 0);
    }
}
