//! In-process publish/subscribe for channel and lifecycle events.
//!
//! Topics are `channel-0` … `channel-15` (carrying the relay's on/off state)
//! plus `connected` and `disconnected` (no payload).  Any number of
//! subscribers may listen to a topic; each one gets its own unbounded queue,
//! so within a topic every subscriber sees events in publish order.
//!
//! # Subscriber accounting
//!
//! [`ChannelEventBus::subscriber_count`] is the number of live
//! `(subscriber, topic)` registrations.  The connection manager's idle check
//! reads it to decide when the last consumer has gone away.  A
//! [`Subscription`] removes its registrations when it is dropped or when
//! [`Subscription::unsubscribe`] is called.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use sw16_core::Channel;
use tokio::sync::mpsc;
use tracing::trace;

/// A subscribable topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Channel(Channel),
    Connected,
    Disconnected,
}

impl Topic {
    /// The two lifecycle topics.
    pub const LIFECYCLE: [Topic; 2] = [Topic::Connected, Topic::Disconnected];
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Channel(ch) => write!(f, "channel-{ch}"),
            Topic::Connected => f.write_str("connected"),
            Topic::Disconnected => f.write_str("disconnected"),
        }
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connected" => Ok(Topic::Connected),
            "disconnected" => Ok(Topic::Disconnected),
            other => other
                .strip_prefix("channel-")
                .and_then(|n| n.parse::<Channel>().ok())
                .map(Topic::Channel)
                .ok_or_else(|| format!("unknown topic: {other}")),
        }
    }
}

/// An event delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// Latest reported state of one relay.
    Channel { channel: Channel, on: bool },
    Connected,
    Disconnected,
}

impl BusEvent {
    /// The topic this event is published on.
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::Channel { channel, .. } => Topic::Channel(*channel),
            BusEvent::Connected => Topic::Connected,
            BusEvent::Disconnected => Topic::Disconnected,
        }
    }
}

type SubscriberId = u64;

#[derive(Debug, Default)]
struct BusInner {
    topics: Mutex<HashMap<Topic, Vec<(SubscriberId, mpsc::UnboundedSender<BusEvent>)>>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn remove(&self, id: SubscriberId, topics: &[Topic]) {
        let mut map = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        for topic in topics {
            if let Some(subs) = map.get_mut(topic) {
                subs.retain(|(sid, _)| *sid != id);
                if subs.is_empty() {
                    map.remove(topic);
                }
            }
        }
    }
}

/// Cloneable handle to one bus; clones share the same subscriber table.
#[derive(Debug, Clone, Default)]
pub struct ChannelEventBus {
    inner: Arc<BusInner>,
}

impl ChannelEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to a single topic.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        self.subscribe_all([topic])
    }

    /// Subscribes to several topics through one queue.
    ///
    /// Events from all listed topics arrive interleaved in publish order.
    /// Duplicate topics are registered once.
    pub fn subscribe_all(&self, topics: impl IntoIterator<Item = Topic>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut registered: Vec<Topic> = Vec::new();
        let mut map = self.inner.topics.lock().unwrap_or_else(PoisonError::into_inner);
        for topic in topics {
            if registered.contains(&topic) {
                continue;
            }
            map.entry(topic).or_default().push((id, tx.clone()));
            registered.push(topic);
        }
        drop(map);

        trace!(subscriber = id, topics = ?registered, "subscribed");
        Subscription {
            id,
            topics: registered,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers `event` to every subscriber of its topic.
    ///
    /// Returns the number of subscribers the event was queued for.
    pub fn publish(&self, event: BusEvent) -> usize {
        let topic = event.topic();
        let map = self.inner.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(subs) = map.get(&topic) else {
            return 0;
        };
        subs.iter().filter(|(_, tx)| tx.send(event).is_ok()).count()
    }

    /// Total number of live `(subscriber, topic)` registrations.
    pub fn subscriber_count(&self) -> usize {
        let map = self.inner.topics.lock().unwrap_or_else(PoisonError::into_inner);
        map.values().map(Vec::len).sum()
    }
}

/// A live registration on a [`ChannelEventBus`].
///
/// Dropping the subscription unsubscribes it.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    topics: Vec<Topic>,
    rx: mpsc::UnboundedReceiver<BusEvent>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Waits for the next event.
    ///
    /// Returns `None` once the bus itself has been dropped.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        self.rx.recv().await
    }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<BusEvent> {
        self.rx.try_recv().ok()
    }

    /// Topics this subscription is registered for.
    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    /// Removes this subscription from the bus.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.remove(self.id, &self.topics);
            trace!(subscriber = self.id, "unsubscribed");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
