//! Progress hub
//!
//! In-process pub/sub broker routing progress ticks from running transfers
//! to the connections watching them. Each connection has one session with a
//! bounded channel and at most one subscribed key.
//!
//! Every session also gets a random watch token. Only the token, never the
//! numeric id, lets the transfer port attach a session to an upload or
//! download, so a client cannot steer somebody else's session.
//!
//! Delivery is best-effort: `publish` never blocks. If a session's channel
//! is full the event is dropped for that session only. Events for one key
//! reach a given session in publish order because routing and sending both
//! happen under the hub lock.

mod event;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use keydrop_common::{ProgressEvent, TransferKey};
use rand::RngExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::constants::{SESSION_CHANNEL_CAPACITY, WATCH_TOKEN_BYTES};

pub use event::HubEvent;

/// Identifies one progress connection
pub type ConnectionId = u64;

struct Session {
    sender: mpsc::Sender<HubEvent>,
    subscribed: Option<TransferKey>,
    watch_token: String,
}

#[derive(Default)]
struct HubState {
    sessions: HashMap<ConnectionId, Session>,
    routes: HashMap<TransferKey, HashSet<ConnectionId>>,
    watch_tokens: HashMap<String, ConnectionId>,
}

impl HubState {
    /// Drop `id` from whatever route it is on
    fn detach(&mut self, id: ConnectionId) -> Option<TransferKey> {
        let key = self.sessions.get_mut(&id)?.subscribed.take()?;
        if let Some(subscribers) = self.routes.get_mut(&key) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                self.routes.remove(&key);
            }
        }
        Some(key)
    }

    /// Point a connected session at `key`, replacing any prior route
    fn attach(&mut self, id: ConnectionId, key: TransferKey) -> bool {
        if !self.sessions.contains_key(&id) {
            return false;
        }
        self.detach(id);
        self.routes.entry(key.clone()).or_default().insert(id);
        if let Some(session) = self.sessions.get_mut(&id) {
            session.subscribed = Some(key);
        }
        true
    }

    /// Send `event` to every subscriber of `key`, returning how many got it
    fn deliver(&self, key: &TransferKey, event: &HubEvent) -> usize {
        let Some(subscribers) = self.routes.get(key) else {
            return 0;
        };

        let mut delivered = 0;
        for id in subscribers {
            let Some(session) = self.sessions.get(id) else {
                continue;
            };
            match session.sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::trace!(connection_id = id, key = %key, "subscriber lagging, event dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::trace!(connection_id = id, key = %key, "subscriber gone, event dropped");
                }
            }
        }
        delivered
    }
}

/// Routes transfer progress to subscribed connections
///
/// Constructed once at startup and shared by `Arc` between the transfer
/// coordinator and the progress endpoint.
pub struct ProgressHub {
    state: Mutex<HubState>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHub {
    /// Create a hub with the default per-session buffer
    pub fn new() -> Self {
        Self::with_capacity(SESSION_CHANNEL_CAPACITY)
    }

    /// Create a hub whose sessions buffer at most `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Register a new session
    ///
    /// The session lives until the returned guard is dropped.
    pub fn connect(self: &Arc<Self>) -> (SessionGuard, mpsc::Receiver<HubEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.capacity);

        let watch_token = {
            let mut state = self.lock();
            let watch_token = loop {
                let token = new_watch_token();
                if !state.watch_tokens.contains_key(&token) {
                    break token;
                }
            };
            state.watch_tokens.insert(watch_token.clone(), id);
            state.sessions.insert(
                id,
                Session {
                    sender,
                    subscribed: None,
                    watch_token: watch_token.clone(),
                },
            );
            watch_token
        };

        let guard = SessionGuard {
            hub: Arc::clone(self),
            id,
            watch_token,
        };
        (guard, receiver)
    }

    /// Subscribe a session to `key`, replacing any prior subscription
    ///
    /// Returns false if no session with that id is connected.
    pub fn subscribe(&self, id: ConnectionId, key: TransferKey) -> bool {
        self.lock().attach(id, key)
    }

    /// Subscribe the session holding `watch_token` to `key`
    ///
    /// Returns false if no connected session holds that token.
    pub fn subscribe_watch(&self, watch_token: &str, key: TransferKey) -> bool {
        let mut state = self.lock();
        let Some(&id) = state.watch_tokens.get(watch_token) else {
            return false;
        };
        state.attach(id, key)
    }

    /// Remove a session's subscription, if any
    ///
    /// Safe to call repeatedly and for sessions that never subscribed.
    pub fn unsubscribe(&self, id: ConnectionId) {
        self.lock().detach(id);
    }

    /// Remove a session entirely
    pub fn disconnect(&self, id: ConnectionId) {
        let mut state = self.lock();
        state.detach(id);
        if let Some(session) = state.sessions.remove(&id) {
            state.watch_tokens.remove(&session.watch_token);
        }
    }

    /// Fan a progress tick out to the subscribers of `key`
    ///
    /// Returns the number of sessions the event was queued for.
    pub fn publish(&self, key: &TransferKey, progress: ProgressEvent) -> usize {
        let event = HubEvent::Progress {
            key: key.clone(),
            progress,
        };
        self.lock().deliver(key, &event)
    }

    /// Announce that the transfer for `key` finished and clear its subscribers
    pub fn publish_completion(&self, key: &TransferKey) -> usize {
        self.publish_terminal(key, HubEvent::Complete { key: key.clone() })
    }

    /// Announce that the transfer for `key` failed and clear its subscribers
    pub fn publish_error(&self, key: &TransferKey, reason: &str) -> usize {
        self.publish_terminal(
            key,
            HubEvent::Failed {
                key: key.clone(),
                reason: reason.to_string(),
            },
        )
    }

    /// Re-point every subscriber of `from` at `to`
    ///
    /// Used when a transfer's provisional key is replaced before it is
    /// recorded. Returns how many sessions moved.
    pub fn move_subscribers(&self, from: &TransferKey, to: &TransferKey) -> usize {
        let mut state = self.lock();
        let Some(moved) = state.routes.remove(from) else {
            return 0;
        };

        for id in &moved {
            if let Some(session) = state.sessions.get_mut(id) {
                session.subscribed = Some(to.clone());
            }
        }
        let count = moved.len();
        state.routes.entry(to.clone()).or_default().extend(moved);
        count
    }

    /// Key a session is currently subscribed to
    pub fn subscription_of(&self, id: ConnectionId) -> Option<TransferKey> {
        self.lock().sessions.get(&id)?.subscribed.clone()
    }

    /// Whether a session with this id is connected
    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.lock().sessions.contains_key(&id)
    }

    /// Number of sessions subscribed to `key`
    pub fn subscriber_count(&self, key: &TransferKey) -> usize {
        self.lock().routes.get(key).map_or(0, HashSet::len)
    }

    /// Number of connected sessions
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    fn publish_terminal(&self, key: &TransferKey, event: HubEvent) -> usize {
        let mut state = self.lock();
        let delivered = state.deliver(key, &event);

        if let Some(subscribers) = state.routes.remove(key) {
            for id in subscribers {
                if let Some(session) = state.sessions.get_mut(&id) {
                    session.subscribed = None;
                }
            }
        }
        delivered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.state.lock().expect("progress hub lock poisoned")
    }
}

/// 128 random bits as lowercase hex
fn new_watch_token() -> String {
    let bytes: [u8; WATCH_TOKEN_BYTES] = rand::rng().random();
    hex::encode(bytes)
}

/// RAII guard that removes a session from the hub when dropped
pub struct SessionGuard {
    hub: Arc<ProgressHub>,
    id: ConnectionId,
    watch_token: String,
}

impl SessionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Secret the owner passes as `watch` on the transfer port
    pub fn watch_token(&self) -> &str {
        &self.watch_token
    }

    pub fn hub(&self) -> &Arc<ProgressHub> {
        &self.hub
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.hub.disconnect(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(done: u64) -> ProgressEvent {
        ProgressEvent::new(done, 100, 10.0, false)
    }

    fn drain(rx: &mut mpsc::Receiver<HubEvent>) -> Vec<HubEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_no_cross_key_delivery() {
        let hub = Arc::new(ProgressHub::new());
        let (a, mut rx_a) = hub.connect();
        let (b, mut rx_b) = hub.connect();
        let key_a = TransferKey::generate();
        let key_b = TransferKey::generate();

        assert!(hub.subscribe(a.id(), key_a.clone()));
        assert!(hub.subscribe(b.id(), key_b.clone()));

        assert_eq!(hub.publish(&key_b, tick(10)), 1);

        assert!(drain(&mut rx_a).is_empty());
        let got = drain(&mut rx_b);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].key(), &key_b);
    }

    #[test]
    fn test_two_subscribers_same_key_both_receive() {
        let hub = Arc::new(ProgressHub::new());
        let (a, mut rx_a) = hub.connect();
        let (b, mut rx_b) = hub.connect();
        let key = TransferKey::generate();

        hub.subscribe(a.id(), key.clone());
        hub.subscribe(b.id(), key.clone());

        for done in [10, 20, 30] {
            assert_eq!(hub.publish(&key, tick(done)), 2);
        }

        assert_eq!(drain(&mut rx_a).len(), 3);
        assert_eq!(drain(&mut rx_b).len(), 3);
    }

    #[test]
    fn test_events_arrive_in_publish_order() {
        let hub = Arc::new(ProgressHub::new());
        let (a, mut rx) = hub.connect();
        let key = TransferKey::generate();
        hub.subscribe(a.id(), key.clone());

        for done in 0..=10 {
            hub.publish(&key, tick(done * 10));
        }

        let percents: Vec<u8> = drain(&mut rx)
            .into_iter()
            .map(|e| match e {
                HubEvent::Progress { progress, .. } => progress.progress_percent,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(percents, vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let hub = Arc::new(ProgressHub::new());
        let (a, mut rx) = hub.connect();
        let key = TransferKey::generate();
        hub.subscribe(a.id(), key.clone());

        hub.unsubscribe(a.id());
        assert_eq!(hub.publish(&key, tick(50)), 0);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(hub.subscriber_count(&key), 0);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let hub = Arc::new(ProgressHub::new());
        let (a, _rx) = hub.connect();

        hub.unsubscribe(a.id());
        hub.unsubscribe(a.id());
        hub.unsubscribe(9999);
        hub.disconnect(9999);
        assert!(hub.is_connected(a.id()));
    }

    #[test]
    fn test_resubscribe_replaces_prior() {
        let hub = Arc::new(ProgressHub::new());
        let (a, mut rx) = hub.connect();
        let first = TransferKey::generate();
        let second = TransferKey::generate();

        hub.subscribe(a.id(), first.clone());
        hub.subscribe(a.id(), second.clone());

        assert_eq!(hub.subscription_of(a.id()), Some(second.clone()));
        assert_eq!(hub.subscriber_count(&first), 0);
        assert_eq!(hub.publish(&first, tick(1)), 0);
        assert_eq!(hub.publish(&second, tick(1)), 1);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_subscribe_unknown_connection() {
        let hub = ProgressHub::new();
        assert!(!hub.subscribe(42, TransferKey::generate()));
    }

    #[test]
    fn test_watch_token_subscribes_its_own_session() {
        let hub = Arc::new(ProgressHub::new());
        let (a, mut rx) = hub.connect();
        let key = TransferKey::generate();

        assert_eq!(a.watch_token().len(), WATCH_TOKEN_BYTES * 2);
        assert!(hub.subscribe_watch(a.watch_token(), key.clone()));
        assert_eq!(hub.subscription_of(a.id()), Some(key.clone()));
        assert_eq!(hub.publish(&key, tick(1)), 1);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_watch_rejects_ids_and_unknown_tokens() {
        let hub = Arc::new(ProgressHub::new());
        let (victim, mut rx) = hub.connect();
        let (other, _other_rx) = hub.connect();
        let own = TransferKey::generate();
        let foreign = TransferKey::generate();
        hub.subscribe(victim.id(), own.clone());

        assert_ne!(victim.watch_token(), other.watch_token());
        for guess in [
            victim.id().to_string(),
            other.id().to_string(),
            String::new(),
            "0".repeat(WATCH_TOKEN_BYTES * 2),
        ] {
            assert!(!hub.subscribe_watch(&guess, foreign.clone()), "{guess:?}");
        }

        assert_eq!(hub.subscription_of(victim.id()), Some(own));
        assert_eq!(hub.publish(&foreign, tick(1)), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_watch_token_dies_with_session() {
        let hub = Arc::new(ProgressHub::new());
        let (guard, _rx) = hub.connect();
        let token = guard.watch_token().to_string();
        drop(guard);

        assert!(!hub.subscribe_watch(&token, TransferKey::generate()));
    }

    #[test]
    fn test_guard_drop_removes_session() {
        let hub = Arc::new(ProgressHub::new());
        let key = TransferKey::generate();
        let (guard, _rx) = hub.connect();
        let id = guard.id();
        hub.subscribe(id, key.clone());
        assert_eq!(hub.session_count(), 1);

        drop(guard);

        assert_eq!(hub.session_count(), 0);
        assert_eq!(hub.subscriber_count(&key), 0);
        assert!(!hub.is_connected(id));
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let hub = Arc::new(ProgressHub::with_capacity(2));
        let (slow, mut rx_slow) = hub.connect();
        let (fast, mut rx_fast) = hub.connect();
        let key = TransferKey::generate();
        hub.subscribe(slow.id(), key.clone());
        hub.subscribe(fast.id(), key.clone());

        // Fast reader keeps up; slow reader never reads until the end
        let mut fast_seen = 0;
        for done in 0..5 {
            hub.publish(&key, tick(done));
            fast_seen += drain(&mut rx_fast).len();
        }

        assert_eq!(fast_seen, 5);
        assert_eq!(drain(&mut rx_slow).len(), 2);
    }

    #[test]
    fn test_closed_receiver_does_not_fail_publish() {
        let hub = Arc::new(ProgressHub::new());
        let (a, rx) = hub.connect();
        let key = TransferKey::generate();
        hub.subscribe(a.id(), key.clone());
        drop(rx);

        assert_eq!(hub.publish(&key, tick(1)), 0);
    }

    #[test]
    fn test_terminal_event_clears_subscriptions() {
        let hub = Arc::new(ProgressHub::new());
        let (a, mut rx) = hub.connect();
        let key = TransferKey::generate();
        hub.subscribe(a.id(), key.clone());

        assert_eq!(hub.publish_completion(&key), 1);
        assert_eq!(hub.subscriber_count(&key), 0);
        assert_eq!(hub.subscription_of(a.id()), None);
        assert_eq!(hub.publish(&key, tick(1)), 0);

        let events = drain(&mut rx);
        assert_eq!(events, vec![HubEvent::Complete { key }]);
    }

    #[test]
    fn test_publish_error() {
        let hub = Arc::new(ProgressHub::new());
        let (a, mut rx) = hub.connect();
        let key = TransferKey::generate();
        hub.subscribe(a.id(), key.clone());

        hub.publish_error(&key, "disk full");

        assert_eq!(
            drain(&mut rx),
            vec![HubEvent::Failed {
                key: key.clone(),
                reason: "disk full".to_string()
            }]
        );
        assert_eq!(hub.subscriber_count(&key), 0);
    }

    #[test]
    fn test_move_subscribers() {
        let hub = Arc::new(ProgressHub::new());
        let (a, mut rx) = hub.connect();
        let provisional = TransferKey::generate();
        let last = TransferKey::generate();
        hub.subscribe(a.id(), provisional.clone());

        assert_eq!(hub.move_subscribers(&provisional, &last), 1);
        assert_eq!(hub.subscription_of(a.id()), Some(last.clone()));
        assert_eq!(hub.publish(&provisional, tick(1)), 0);
        assert_eq!(hub.publish(&last, tick(1)), 1);
        assert_eq!(drain(&mut rx).len(), 1);

        assert_eq!(hub.move_subscribers(&provisional, &last), 0);
    }

    #[test]
    fn test_concurrent_subscribe_and_publish() {
        let hub = Arc::new(ProgressHub::new());
        let key = TransferKey::generate();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let hub = Arc::clone(&hub);
                let key = key.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let (guard, _rx) = hub.connect();
                        hub.subscribe(guard.id(), key.clone());
                        hub.publish(&key, tick(1));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(hub.session_count(), 0);
        assert_eq!(hub.subscriber_count(&key), 0);
    }
}
