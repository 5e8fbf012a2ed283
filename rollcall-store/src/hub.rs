//! Change-notification fan-out.
//!
//! Each live subscriber owns a bounded channel. Delivery is `try_send`: a
//! full or closed channel is a failed write and evicts the connection on the
//! spot instead of blocking the publisher. Connections move
//! `Connecting → Open → Closed`; `Closed` is terminal and a client has to
//! subscribe again.
//!
//! The hub never holds its lock across an await, and no critical section of
//! the [`crate::locks::LockRegistry`] ever waits on a subscriber.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use rollcall_core::StoreError;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// A table changed; re-fetch.
    Refresh,
    RosterUpdate,
    /// Payload is the current list of subscriber names.
    Presence,
    /// Keep-alive; payload carries no meaning.
    Ping,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Refresh => "refresh",
            EventKind::RosterUpdate => "roster-update",
            EventKind::Presence => "presence",
            EventKind::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerEvent {
    pub kind: EventKind,
    pub payload: Value,
}

impl ServerEvent {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    /// `event: <type>\ndata: <json>\n\n`
    pub fn to_sse_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.kind.as_str(), self.payload)
    }
}

/// Outcome of one publish cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Display names of connections evicted during this cycle.
    pub evicted: Vec<String>,
}

#[derive(Debug)]
struct Connection {
    name: String,
    state: ConnectionState,
    tx: mpsc::Sender<ServerEvent>,
    /// Last time every event written to this connection had been consumed.
    last_write: Instant,
}

#[derive(Debug, Default)]
struct HubState {
    next_id: ConnectionId,
    connections: HashMap<ConnectionId, Connection>,
}

impl HubState {
    /// Deliver to every open connection, evicting the ones that fail.
    fn broadcast(&mut self, event: &ServerEvent) -> PublishReport {
        let now = Instant::now();
        let mut report = PublishReport::default();
        let mut failed = Vec::new();
        for (id, conn) in self.connections.iter_mut() {
            if conn.state != ConnectionState::Open {
                continue;
            }
            // An empty buffer means the peer consumed everything written so far.
            if conn.tx.capacity() == conn.tx.max_capacity() {
                conn.last_write = now;
            }
            match conn.tx.try_send(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(_) => failed.push(*id),
            }
        }
        for id in failed {
            if let Some(mut conn) = self.connections.remove(&id) {
                conn.state = ConnectionState::Closed;
                warn!(connection = id, name = %conn.name, event = event.kind.as_str(), "subscriber evicted");
                report.evicted.push(conn.name);
            }
        }
        report
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .connections
            .values()
            .filter(|c| c.state == ConnectionState::Open)
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn presence_event(&self) -> ServerEvent {
        ServerEvent::new(EventKind::Presence, json!(self.names()))
    }

    /// Broadcast presence after membership changed. Evictions during this
    /// broadcast are final; presence is not re-sent for them.
    fn announce_presence(&mut self) {
        let event = self.presence_event();
        self.broadcast(&event);
    }
}

#[derive(Debug, Clone)]
pub struct NotificationHub {
    state: Arc<Mutex<HubState>>,
    capacity: usize,
    stale_after: Duration,
}

impl NotificationHub {
    pub fn new(capacity: usize, stale_after: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
            capacity: capacity.max(1),
            stale_after,
        }
    }

    /// Register a subscriber under a display name. Blank names are rejected.
    pub fn subscribe(&self, name: &str) -> Result<Subscription, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Validation(
                "a display name is required to subscribe".to_string(),
            ));
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.connections.insert(
            id,
            Connection {
                name: name.to_string(),
                state: ConnectionState::Connecting,
                tx,
                last_write: Instant::now(),
            },
        );
        if let Some(conn) = state.connections.get_mut(&id) {
            conn.state = ConnectionState::Open;
        }
        state.announce_presence();
        info!(connection = id, name = %name, "subscriber connected");

        Ok(Subscription {
            id,
            name: name.to_string(),
            rx,
            hub: Arc::downgrade(&self.state),
        })
    }

    /// Best-effort delivery to every open connection.
    pub fn publish(&self, kind: EventKind, payload: Value) -> PublishReport {
        let event = ServerEvent::new(kind, payload);
        let mut state = self.state.lock();
        let report = state.broadcast(&event);
        if !report.evicted.is_empty() && kind != EventKind::Presence {
            state.announce_presence();
        }
        debug!(event = kind.as_str(), delivered = report.delivered, "published");
        report
    }

    /// Ping every connection and evict the ones that failed or went stale.
    pub fn keepalive_tick(&self) -> PublishReport {
        let now = Instant::now();
        let mut state = self.state.lock();
        let mut report = state.broadcast(&ServerEvent::new(EventKind::Ping, Value::Null));

        let stale: Vec<ConnectionId> = state
            .connections
            .iter()
            .filter(|(_, c)| now.saturating_duration_since(c.last_write) > self.stale_after)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            if let Some(mut conn) = state.connections.remove(&id) {
                conn.state = ConnectionState::Closed;
                warn!(connection = id, name = %conn.name, "stale subscriber evicted");
                report.evicted.push(conn.name);
            }
        }
        if !report.evicted.is_empty() {
            state.announce_presence();
        }
        report
    }

    /// De-duplicated, sorted display names of open connections.
    pub fn current_subscriber_names(&self) -> Vec<String> {
        self.state.lock().names()
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// State of a connection; anything no longer registered is `Closed`.
    pub fn state_of(&self, id: ConnectionId) -> ConnectionState {
        self.state
            .lock()
            .connections
            .get(&id)
            .map(|c| c.state)
            .unwrap_or(ConnectionState::Closed)
    }

    /// Close every connection. Their streams end once buffered events drain.
    pub fn close_all(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.connections.len();
        for (_, mut conn) in state.connections.drain() {
            conn.state = ConnectionState::Closed;
        }
        info!(closed = count, "all subscribers closed");
        count
    }
}

/// Receiving end of one subscriber connection. Dropping it unregisters the
/// connection.
#[derive(Debug)]
pub struct Subscription {
    id: ConnectionId,
    name: String,
    rx: mpsc::Receiver<ServerEvent>,
    hub: Weak<Mutex<HubState>>,
}

impl Subscription {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next event, or `None` once the connection is closed and drained.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        self.rx.try_recv().ok()
    }

    pub fn poll_recv(&mut self, cx: &mut TaskContext<'_>) -> Poll<Option<ServerEvent>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(state) = self.hub.upgrade() else {
            return;
        };
        let mut state = state.lock();
        if state.connections.remove(&self.id).is_some() {
            debug!(connection = self.id, name = %self.name, "subscriber disconnected");
            state.announce_presence();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn hub(capacity: usize) -> NotificationHub {
        NotificationHub::new(capacity, Duration::from_secs(90))
    }

    fn drain(sub: &mut Subscription) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Some(e) = sub.try_recv() {
            out.push(e);
        }
        out
    }

    #[test]
    fn blank_name_is_rejected() {
        let hub = hub(4);
        assert!(matches!(hub.subscribe("  "), Err(StoreError::Validation(_))));
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn subscribe_opens_and_announces_presence() {
        let hub = hub(8);
        let mut ann = hub.subscribe("Ann").unwrap();
        assert_eq!(hub.state_of(ann.id()), ConnectionState::Open);
        let _bo = hub.subscribe("Bo").unwrap();
        let _ann2 = hub.subscribe("Ann").unwrap();

        assert_eq!(hub.current_subscriber_names(), vec!["Ann", "Bo"]);
        let events = drain(&mut ann);
        let last = events.last().unwrap();
        assert_eq!(last.kind, EventKind::Presence);
        assert_eq!(last.payload, json!(["Ann", "Bo"]));
    }

    #[test]
    fn publish_reaches_every_open_connection() {
        let hub = hub(8);
        let mut a = hub.subscribe("A").unwrap();
        let mut b = hub.subscribe("B").unwrap();
        drain(&mut a);
        drain(&mut b);

        let report = hub.publish(EventKind::Refresh, json!({"table": "Sigma"}));
        assert_eq!(report.delivered, 2);
        assert!(report.evicted.is_empty());
        assert_eq!(drain(&mut a)[0].payload["table"], "Sigma");
        assert_eq!(drain(&mut b).len(), 1);
    }

    #[test]
    fn failed_write_evicts_on_that_publish() {
        let hub = hub(1);
        let mut slow = hub.subscribe("Slow").unwrap();
        drain(&mut slow);
        let mut fast = hub.subscribe("Fast").unwrap();
        // Slow's one buffer slot now holds the presence event for Fast.
        drain(&mut fast);

        let report = hub.publish(EventKind::Refresh, json!({}));
        assert_eq!(report.evicted, vec!["Slow"]);
        assert_eq!(hub.current_subscriber_names(), vec!["Fast"]);
        assert_eq!(hub.state_of(slow.id()), ConnectionState::Closed);

        drain(&mut fast);
        hub.publish(EventKind::Refresh, json!({"n": 2}));
        let received = drain(&mut slow);
        assert!(received.iter().all(|e| e.kind == EventKind::Presence));
        assert_eq!(slow.try_recv(), None);
    }

    #[test]
    fn dropped_subscription_unregisters() {
        let hub = hub(8);
        let sub = hub.subscribe("Ann").unwrap();
        assert_eq!(hub.connection_count(), 1);
        drop(sub);
        assert_eq!(hub.connection_count(), 0);
        assert!(hub.current_subscriber_names().is_empty());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn keepalive_keeps_draining_subscribers() {
        let hub = NotificationHub::new(64, Duration::from_secs(90));
        let mut sub = hub.subscribe("Ann").unwrap();
        for _ in 0..5 {
            drain(&mut sub);
            tokio::time::advance(Duration::from_secs(25)).await;
            let report = hub.keepalive_tick();
            assert_eq!(report.delivered, 1);
            assert!(report.evicted.is_empty());
        }
        assert_eq!(drain(&mut sub)[0].kind, EventKind::Ping);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn keepalive_evicts_subscriber_that_stopped_reading() {
        let hub = NotificationHub::new(64, Duration::from_secs(90));
        let stuck = hub.subscribe("Stuck").unwrap();
        let mut live = hub.subscribe("Live").unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        drain(&mut live);
        assert!(hub.keepalive_tick().evicted.is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        drain(&mut live);
        let report = hub.keepalive_tick();
        assert_eq!(report.evicted, vec!["Stuck"]);
        assert_eq!(hub.state_of(stuck.id()), ConnectionState::Closed);
        assert_eq!(hub.current_subscriber_names(), vec!["Live"]);
    }

    #[tokio::test]
    async fn close_all_ends_streams() {
        let hub = hub(8);
        let mut sub = hub.subscribe("Ann").unwrap();
        assert_eq!(hub.close_all(), 1);
        // Buffered presence drains, then the stream ends.
        while let Some(_) = sub.recv().await {}
        assert_eq!(hub.state_of(sub.id()), ConnectionState::Closed);
    }

    #[test]
    fn sse_frame_format() {
        let event = ServerEvent::new(EventKind::RosterUpdate, json!({"updated": 1}));
        assert_eq!(
            event.to_sse_frame(),
            "event: roster-update\ndata: {\"updated\":1}\n\n"
        );
    }
}
