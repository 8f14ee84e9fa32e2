//! Event bus (C10): typed pub/sub over bounded per-priority queues, drained
//! by a fixed worker pool.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Select, Sender};

use crate::error::{Error, Result};

use super::event::{Envelope, Event, Priority, Token};

const PRIORITY_LANES: usize = 4; // Low, Normal, High, Critical

/// Configuration for an [`EventBus`] (§4.10).
#[derive(Clone, Copy, Debug)]
pub struct EventBusConfig {
    pub max_queue_size: u32,
    pub worker_thread_count: u32,
    pub auto_start: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1024,
            worker_thread_count: 2,
            auto_start: true,
        }
    }
}

impl EventBusConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            return Err(Error::invalid_configuration("max_queue_size must be >= 1"));
        }
        if self.worker_thread_count == 0 {
            return Err(Error::invalid_configuration(
                "worker_thread_count must be >= 1",
            ));
        }
        Ok(())
    }
}

type Handler = Box<dyn Fn(&(dyn Any + Send + Sync)) -> Result<()> + Send + Sync>;

struct Subscription {
    token: Token,
    priority: Priority,
    handler: Handler,
}

#[derive(Default)]
struct BusStatsInner {
    total_published: AtomicU64,
    total_processed: AtomicU64,
    total_dropped: AtomicU64,
}

/// A point-in-time read of [`EventBus`] counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct BusStats {
    pub total_published: u64,
    pub total_processed: u64,
    pub total_dropped: u64,
    pub queue_depths_by_priority: [usize; PRIORITY_LANES],
}

struct Lanes {
    senders: [Sender<Envelope>; PRIORITY_LANES],
    receivers: [Receiver<Envelope>; PRIORITY_LANES],
}

/// Typed publish/subscribe bus with bounded priority lanes (§4.10).
pub struct EventBus {
    config: EventBusConfig,
    subscribers: Arc<RwLock<HashMap<TypeId, Vec<Subscription>>>>,
    token_index: RwLock<HashMap<u64, TypeId>>,
    next_token: AtomicU64,
    next_event_id: AtomicU64,
    lanes: Lanes,
    running: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<BusStatsInner>,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Result<Self> {
        config.validate()?;
        let mut senders = Vec::with_capacity(PRIORITY_LANES);
        let mut receivers = Vec::with_capacity(PRIORITY_LANES);
        for _ in 0..PRIORITY_LANES {
            let (tx, rx) = crossbeam_channel::bounded(config.max_queue_size as usize);
            senders.push(tx);
            receivers.push(rx);
        }
        let bus = Self {
            config,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            token_index: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            next_event_id: AtomicU64::new(1),
            lanes: Lanes {
                senders: senders.try_into().expect("exactly PRIORITY_LANES senders"),
                receivers: receivers.try_into().expect("exactly PRIORITY_LANES receivers"),
            },
            running: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
            stats: Arc::new(BusStatsInner::default()),
        };
        if bus.config.auto_start {
            bus.start();
        }
        Ok(bus)
    }

    /// Spawns the worker pool. Idempotent: a no-op if already running.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut workers = self.workers.lock().expect("event bus poisoned");
        for _ in 0..self.config.worker_thread_count {
            let receivers = self.lanes.receivers.clone();
            let subscribers = Arc::clone(&self.subscribers);
            let running = Arc::clone(&self.running);
            let stats = Arc::clone(&self.stats);
            workers.push(std::thread::spawn(move || {
                worker_loop(receivers, subscribers, running, stats);
            }));
        }
    }

    /// Stops accepting new work and joins all workers after a bounded grace
    /// period for in-flight drains.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut workers = self.workers.lock().expect("event bus poisoned");
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    pub fn subscribe_event<E, F>(&self, handler: F, priority: Priority) -> Token
    where
        E: Event + 'static,
        F: Fn(&E) -> Result<()> + Send + Sync + 'static,
    {
        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        let type_id = TypeId::of::<E>();
        let wrapped: Handler = Box::new(move |any| {
            let value = any
                .downcast_ref::<E>()
                .expect("event type matches subscription key");
            handler(value)
        });
        {
            let mut subs = self.subscribers.write().expect("event bus poisoned");
            subs.entry(type_id).or_default().push(Subscription {
                token,
                priority,
                handler: wrapped,
            });
        }
        let _ = self
            .token_index
            .write()
            .expect("event bus poisoned")
            .insert(token.0, type_id);
        token
    }

    /// Removes a handler. In-flight deliveries for it may still fire.
    pub fn unsubscribe_event(&self, token: Token) {
        let type_id = match self
            .token_index
            .write()
            .expect("event bus poisoned")
            .remove(&token.0)
        {
            Some(id) => id,
            None => return,
        };
        if let Some(subs) = self
            .subscribers
            .write()
            .expect("event bus poisoned")
            .get_mut(&type_id)
        {
            subs.retain(|s| s.token != token);
        }
    }

    /// Publication priority is the max subscriber priority registered for
    /// `E`, or `normal` if there are none (SPEC_FULL.md §D.2).
    fn publication_priority<E: Event + 'static>(&self) -> Priority {
        let subs = self.subscribers.read().expect("event bus poisoned");
        subs.get(&TypeId::of::<E>())
            .and_then(|v| v.iter().map(|s| s.priority).max())
            .unwrap_or(Priority::Normal)
    }

    pub fn publish_event<E: Event + 'static>(&self, event: E) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(Error::new(
                crate::error::ErrorKind::ServiceUnavailable,
                "event bus is not running",
            ));
        }
        let priority = self.publication_priority::<E>();
        let envelope = Envelope {
            event_id: self.next_event_id.fetch_add(1, Ordering::Relaxed),
            timestamp: Instant::now(),
            priority,
            payload: Box::new(event),
        };
        let lane = &self.lanes.senders[priority as usize];
        match lane.try_send(envelope) {
            Ok(()) => {
                self.stats.total_published.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(_) => {
                self.stats.total_dropped.fetch_add(1, Ordering::Relaxed);
                Err(Error::storage_full("event queue is full"))
            }
        }
    }

    pub fn stats(&self) -> BusStats {
        let mut queue_depths_by_priority = [0usize; PRIORITY_LANES];
        for (i, r) in self.lanes.receivers.iter().enumerate() {
            queue_depths_by_priority[i] = r.len();
        }
        BusStats {
            total_published: self.stats.total_published.load(Ordering::Relaxed),
            total_processed: self.stats.total_processed.load(Ordering::Relaxed),
            total_dropped: self.stats.total_dropped.load(Ordering::Relaxed),
            queue_depths_by_priority,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    receivers: [Receiver<Envelope>; PRIORITY_LANES],
    subscribers: Arc<RwLock<HashMap<TypeId, Vec<Subscription>>>>,
    running: Arc<AtomicBool>,
    stats: Arc<BusStatsInner>,
) {
    while running.load(Ordering::SeqCst) {
        // Priority order: index 3 (critical) down to 0 (low).
        let mut envelope = None;
        for r in receivers.iter().rev() {
            if let Ok(e) = r.try_recv() {
                envelope = Some(e);
                break;
            }
        }
        let envelope = match envelope {
            Some(e) => e,
            None => {
                let mut select = Select::new();
                for r in &receivers {
                    let _ = select.recv(r);
                }
                match select.select_timeout(Duration::from_millis(100)) {
                    Ok(op) => match receivers[op.index()].try_recv() {
                        Ok(e) => e,
                        Err(_) => continue,
                    },
                    Err(_) => continue,
                }
            }
        };
        dispatch(envelope, &subscribers, &stats);
    }
}

fn dispatch(
    envelope: Envelope,
    subscribers: &RwLock<HashMap<TypeId, Vec<Subscription>>>,
    stats: &BusStatsInner,
) {
    let type_id = (*envelope.payload).type_id();
    let subs = subscribers.read().expect("event bus poisoned");
    if let Some(handlers) = subs.get(&type_id) {
        for sub in handlers {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                (sub.handler)(envelope.payload.as_ref())
            }));
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => log::warn!("event handler returned an error: {err}"),
                Err(_) => log::warn!("event handler panicked"),
            }
        }
    }
    stats.total_processed.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Debug)]
    struct Ping(u32);

    fn bus(worker_thread_count: u32) -> EventBus {
        EventBus::new(EventBusConfig {
            max_queue_size: 16,
            worker_thread_count,
            auto_start: true,
        })
        .unwrap()
    }

    #[test]
    fn publish_delivers_to_subscriber() {
        let bus = bus(1);
        let received = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&received);
        let _token = bus.subscribe_event::<Ping, _>(
            move |p| {
                r.fetch_add(p.0 as usize, Ordering::SeqCst);
                Ok(())
            },
            Priority::Normal,
        );
        bus.publish_event(Ping(7)).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(received.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn unsubscribe_stops_future_delivery() {
        let bus = bus(1);
        let received = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&received);
        let token = bus.subscribe_event::<Ping, _>(
            move |_| {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            Priority::Normal,
        );
        bus.unsubscribe_event(token);
        bus.publish_event(Ping(1)).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(received.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn publish_on_stopped_bus_fails() {
        let bus = bus(1);
        bus.stop();
        let err = bus.publish_event(Ping(1)).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ServiceUnavailable);
    }

    #[test]
    fn full_queue_is_rejected_without_overwrite() {
        let bus = EventBus::new(EventBusConfig {
            max_queue_size: 1,
            worker_thread_count: 1,
            auto_start: false,
        })
        .unwrap();
        // Mark the bus running without spawning workers, so nothing drains
        // the lane and it fills up after one publish.
        bus.running.store(true, Ordering::SeqCst);
        bus.publish_event(Ping(1)).unwrap();
        let err = bus.publish_event(Ping(2)).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::StorageFull);
    }

    #[test]
    fn handler_panic_does_not_abort_dispatch() {
        let bus = bus(1);
        let _t1 = bus.subscribe_event::<Ping, _>(|_| panic!("boom"), Priority::Normal);
        let received = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&received);
        let _t2 = bus.subscribe_event::<Ping, _>(
            move |_| {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            Priority::Normal,
        );
        bus.publish_event(Ping(1)).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }
}
