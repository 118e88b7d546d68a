//! Live subscriptions to a transaction log

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use prevail_core::{LogEntry, Subscriber};

/// Handle to a continuous subscription.
///
/// Dropping the handle cancels the subscription, as does [`cancel`]. The
/// subscription also ends by itself when its subscriber returns
/// `ControlFlow::Break`. Ending one subscription never affects the log or
/// any other subscriber.
///
/// [`cancel`]: Subscription::cancel
#[must_use = "dropping a Subscription cancels it"]
#[derive(Debug)]
pub struct Subscription {
    closed: Arc<AtomicBool>,
}

impl Subscription {
    fn open() -> (Self, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        (
            Subscription {
                closed: Arc::clone(&closed),
            },
            closed,
        )
    }

    /// A subscription that already ended during catch-up.
    pub(crate) fn finished() -> Self {
        Subscription {
            closed: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Stop delivery. Entries logged after this call are not delivered.
    pub fn cancel(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether entries are still being delivered.
    pub fn is_active(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct LiveSubscriber<T> {
    subscriber: Box<dyn Subscriber<T>>,
    closed: Arc<AtomicBool>,
}

/// Subscribers that receive each entry after it is logged.
pub(crate) struct SubscriberSet<T> {
    live: Vec<LiveSubscriber<T>>,
}

impl<T> SubscriberSet<T> {
    pub(crate) fn new() -> Self {
        SubscriberSet { live: Vec::new() }
    }

    /// Register a subscriber that has finished catch-up.
    pub(crate) fn register(&mut self, subscriber: Box<dyn Subscriber<T>>) -> Subscription {
        let (subscription, closed) = Subscription::open();
        self.live.push(LiveSubscriber { subscriber, closed });
        subscription
    }

    /// Deliver `entry` to every live subscriber in registration order,
    /// dropping the ones that were cancelled or asked to stop.
    pub(crate) fn publish(&mut self, entry: &LogEntry<T>) {
        self.live.retain_mut(|live| {
            if live.closed.load(Ordering::Acquire) {
                return false;
            }
            match live.subscriber.receive(entry) {
                ControlFlow::Continue(()) => true,
                ControlFlow::Break(()) => {
                    live.closed.store(true, Ordering::Release);
                    false
                }
            }
        });
    }

    /// Number of subscriptions that have not ended.
    pub(crate) fn active(&self) -> usize {
        self.live
            .iter()
            .filter(|live| !live.closed.load(Ordering::Acquire))
            .count()
    }
}
