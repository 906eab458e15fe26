//! Per-room publish/subscribe with simulated network delivery.
//!
//! Each publish schedules one independent tokio task per registered
//! handler. Every task waits a random jitter in `[0, max_jitter]` before
//! invoking its handler, so delivery is:
//!
//! - **unordered**: two publishes in quick succession may be observed in
//!   different relative orders by different handlers;
//! - **at-most-once**: a handler unsubscribed while its delivery is still
//!   pending never sees that event; there is no retry and no replay.
//!
//! The bus does not filter echoes. Consumers drop events whose `sender_id`
//! is their own identity (see [`crate::view::RoomView`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use rand::Rng;

use crate::protocol::{DrawOp, Event, EventPayload, UserId};

/// Boxed event handler shared by the delivery tasks.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

/// Statistics for monitoring delivery health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Publish calls (both topics).
    pub published: u64,
    /// Deliveries scheduled (one per handler per publish).
    pub scheduled: u64,
    /// Deliveries that reached their handler.
    pub delivered: u64,
    /// Deliveries skipped because the handler unsubscribed first.
    pub dropped: u64,
}

/// Atomic bus stats, lock-free on the delivery path.
struct AtomicBusStats {
    published: AtomicU64,
    scheduled: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl AtomicBusStats {
    fn new() -> Self {
        Self {
            published: AtomicU64::new(0),
            scheduled: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            scheduled: self.scheduled.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

struct Subscriber {
    id: u64,
    handler: EventHandler,
    active: Arc<AtomicBool>,
}

/// One named channel: room id → registered handlers.
struct Topic {
    name: &'static str,
    rooms: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl Topic {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    fn remove(&self, room_id: &str, id: u64) {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(subscribers) = rooms.get_mut(room_id) {
            subscribers.retain(|s| s.id != id);
            if subscribers.is_empty() {
                rooms.remove(room_id);
            }
        }
    }

    fn handler_count(&self, room_id: &str) -> usize {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room_id)
            .map_or(0, Vec::len)
    }
}

/// Capability returned by `subscribe`; consuming it deregisters the handler.
///
/// Dropping a `Subscription` without calling [`Subscription::unsubscribe`]
/// leaves the handler registered for the lifetime of the bus.
#[must_use = "the handler stays registered until unsubscribe() is called"]
pub struct Subscription {
    topic: Weak<Topic>,
    room_id: String,
    id: u64,
    active: Arc<AtomicBool>,
}

impl Subscription {
    /// Deregister the handler. Deliveries still waiting on their jitter
    /// are discarded.
    pub fn unsubscribe(self) {
        self.active.store(false, Ordering::Release);
        if let Some(topic) = self.topic.upgrade() {
            topic.remove(&self.room_id, self.id);
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }
}

/// Event bus shared by every component of one engine instance.
///
/// Cheap to clone; clones share subscribers and stats.
#[derive(Clone)]
pub struct EventBus {
    events: Arc<Topic>,
    draw_ops: Arc<Topic>,
    max_jitter: Duration,
    next_id: Arc<AtomicU64>,
    stats: Arc<AtomicBusStats>,
}

impl EventBus {
    /// Create a bus whose deliveries wait up to `max_jitter`.
    ///
    /// A zero jitter still delivers asynchronously, on a spawned task.
    pub fn new(max_jitter: Duration) -> Self {
        Self {
            events: Arc::new(Topic::new("events")),
            draw_ops: Arc::new(Topic::new("whiteboard")),
            max_jitter,
            next_id: Arc::new(AtomicU64::new(1)),
            stats: Arc::new(AtomicBusStats::new()),
        }
    }

    /// Register `handler` for every room event published to `room_id`.
    pub fn subscribe<F>(&self, room_id: &str, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(&self.events, room_id, Arc::new(handler))
    }

    /// Register `handler` for whiteboard draw-ops published to `room_id`.
    pub fn subscribe_draw_ops<F>(&self, room_id: &str, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(&self.draw_ops, room_id, Arc::new(handler))
    }

    /// Schedule delivery of a room event to every current handler.
    ///
    /// Returns the number of deliveries scheduled.
    pub fn publish(&self, room_id: &str, sender_id: UserId, payload: EventPayload) -> usize {
        self.dispatch(&self.events, room_id, Event::new(sender_id, payload))
    }

    /// Schedule delivery of a whiteboard op to every current draw handler.
    pub fn publish_draw_op(&self, room_id: &str, sender_id: UserId, op: DrawOp) -> usize {
        self.dispatch(&self.draw_ops, room_id, Event::new(sender_id, EventPayload::Draw(op)))
    }

    /// Number of room-event handlers registered for `room_id`.
    pub fn handler_count(&self, room_id: &str) -> usize {
        self.events.handler_count(room_id)
    }

    /// Number of whiteboard handlers registered for `room_id`.
    pub fn draw_handler_count(&self, room_id: &str) -> usize {
        self.draw_ops.handler_count(room_id)
    }

    /// Delivery statistics (lock-free snapshot).
    pub fn stats(&self) -> BusStats {
        self.stats.snapshot()
    }

    pub fn max_jitter(&self) -> Duration {
        self.max_jitter
    }

    fn register(&self, topic: &Arc<Topic>, room_id: &str, handler: EventHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));

        topic
            .rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(room_id.to_string())
            .or_default()
            .push(Subscriber {
                id,
                handler,
                active: active.clone(),
            });
        log::debug!("Subscribed handler {id} to {} of room {room_id}", topic.name);

        Subscription {
            topic: Arc::downgrade(topic),
            room_id: room_id.to_string(),
            id,
            active,
        }
    }

    fn dispatch(&self, topic: &Topic, room_id: &str, event: Event) -> usize {
        self.stats.published.fetch_add(1, Ordering::Relaxed);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!(
                "Dropping {} for room {room_id}: publish called outside a tokio runtime",
                event.event_type()
            );
            return 0;
        };

        // Snapshot the handlers; later subscribers do not see this event.
        let targets: Vec<(EventHandler, Arc<AtomicBool>)> = {
            let rooms = topic.rooms.read().unwrap_or_else(PoisonError::into_inner);
            match rooms.get(room_id) {
                Some(subscribers) => subscribers
                    .iter()
                    .map(|s| (s.handler.clone(), s.active.clone()))
                    .collect(),
                None => return 0,
            }
        };

        let event = Arc::new(event);
        let mut rng = rand::thread_rng();
        for (handler, active) in &targets {
            let delay = self.jitter(&mut rng);
            let handler = handler.clone();
            let active = active.clone();
            let event = event.clone();
            let stats = self.stats.clone();

            runtime.spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if active.load(Ordering::Acquire) {
                    handler(&event);
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                } else {
                    stats.dropped.fetch_add(1, Ordering::Relaxed);
                }
            });
        }

        self.stats
            .scheduled
            .fetch_add(targets.len() as u64, Ordering::Relaxed);
        targets.len()
    }

    fn jitter(&self, rng: &mut impl Rng) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng.gen_range(0..=max_ms))
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}
