//! Real-time fan-out of task progress to observer connections
//!
//! The [`ConnectionHub`] maps task IDs to the set of live [`Connection`]s
//! watching them. Messages published for a task reach every connection
//! registered for that task in call order. Connections that fail a send, or
//! stop answering the periodic keepalive ping, are pruned.

mod websocket;

pub use websocket::WsConnection;

use crate::config::HubConfig;
use crate::error::Result;
use crate::types::{HubMessage, TaskId};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Process-unique identity of a connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identifier
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An observer channel the hub can push messages into
#[async_trait]
pub trait Connection: Send + Sync {
    /// Stable identity used for set membership
    fn id(&self) -> ConnectionId;

    /// Whether the underlying channel is live
    fn is_open(&self) -> bool;

    /// Open the underlying channel; called on registration when not yet open
    async fn accept(&self) -> Result<()> {
        Ok(())
    }

    /// Deliver one message
    async fn send(&self, message: &HubMessage) -> Result<()>;

    /// Close the underlying channel
    async fn close(&self);
}

struct TaskConnections {
    // Serializes publishes for one task; acquired before `registrations`, never while holding it.
    publish_gate: Arc<Mutex<()>>,
    connections: HashMap<ConnectionId, Arc<dyn Connection>>,
}

impl TaskConnections {
    fn new() -> Self {
        Self {
            publish_gate: Arc::new(Mutex::new(())),
            connections: HashMap::new(),
        }
    }
}

#[derive(Default)]
struct Registrations {
    tasks: HashMap<TaskId, TaskConnections>,
    // Each connection observes exactly one task
    owners: HashMap<ConnectionId, TaskId>,
}

impl Registrations {
    /// Remove `id` from `task_id`'s set, dropping the set once empty
    fn detach(&mut self, id: ConnectionId, task_id: TaskId) -> Option<Arc<dyn Connection>> {
        let entry = self.tasks.get_mut(&task_id)?;
        let removed = entry.connections.remove(&id);
        if entry.connections.is_empty() {
            self.tasks.remove(&task_id);
        }
        if removed.is_some() && self.owners.get(&id) == Some(&task_id) {
            self.owners.remove(&id);
        }
        removed
    }
}

struct HubInner {
    registrations: Mutex<Registrations>,
    keepalive_started: AtomicBool,
    shutdown: CancellationToken,
    keepalive_interval: Duration,
    send_timeout: Duration,
}

/// Multiplexed registry of observer connections keyed by task
///
/// Cheap to clone; clones share the same registrations.
#[derive(Clone)]
pub struct ConnectionHub {
    inner: Arc<HubInner>,
}

impl ConnectionHub {
    /// Create a hub; the keepalive loop starts with the first registration
    pub fn new(config: &HubConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                registrations: Mutex::new(Registrations::default()),
                keepalive_started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                keepalive_interval: config.keepalive_interval,
                send_timeout: config.send_timeout,
            }),
        }
    }

    /// Register `connection` as an observer of `task_id`
    ///
    /// Registering a connection that is already present is a no-op success.
    /// A connection registered for another task is moved: it leaves the old
    /// task's set without being closed. Otherwise the connection is accepted
    /// if needed, added, and sent a `connection_status` acknowledgement
    /// before any progress published for the task. Returns false if the
    /// connection could not be accepted or acknowledged (it is not left
    /// registered).
    pub async fn register(&self, connection: Arc<dyn Connection>, task_id: TaskId) -> bool {
        if self.inner.shutdown.is_cancelled() {
            return false;
        }

        let id = connection.id();
        if self.inner.registrations.lock().await.owners.get(&id) == Some(&task_id) {
            return true;
        }

        if !connection.is_open()
            && let Err(e) = connection.accept().await
        {
            tracing::warn!(task_id = %task_id, connection = %id, error = %e, "Failed to accept observer connection");
            return false;
        }

        self.ensure_keepalive();

        let ordered = loop {
            let gate = {
                let mut registrations = self.inner.registrations.lock().await;
                let entry = registrations
                    .tasks
                    .entry(task_id)
                    .or_insert_with(TaskConnections::new);
                Arc::clone(&entry.publish_gate)
            };
            let ordered = Arc::clone(&gate).lock_owned().await;

            let mut registrations = self.inner.registrations.lock().await;
            if registrations.owners.get(&id) == Some(&task_id) {
                return true;
            }
            // The set may have been dropped and recreated while waiting for its gate
            let Some(entry) = registrations.tasks.get_mut(&task_id) else {
                continue;
            };
            if !Arc::ptr_eq(&entry.publish_gate, &gate) {
                continue;
            }
            entry.connections.insert(id, Arc::clone(&connection));

            if let Some(previous) = registrations.owners.insert(id, task_id) {
                if let Some(old) = registrations.tasks.get_mut(&previous) {
                    old.connections.remove(&id);
                    if old.connections.is_empty() {
                        registrations.tasks.remove(&previous);
                    }
                }
                tracing::debug!(connection = %id, from = %previous, to = %task_id, "Observer moved to another task");
            }
            break ordered;
        };

        tracing::debug!(task_id = %task_id, connection = %id, "Observer registered");

        let acked = self
            .send_bounded(&*connection, &HubMessage::connected(task_id))
            .await;
        drop(ordered);
        if !acked {
            self.unregister(&*connection, task_id).await;
        }
        acked
    }

    /// Remove `connection` from `task_id`'s set and close it if still open
    ///
    /// Returns whether it was registered. Removing the last connection of a
    /// task drops the task's entry.
    pub async fn unregister(&self, connection: &dyn Connection, task_id: TaskId) -> bool {
        let removed = self
            .inner
            .registrations
            .lock()
            .await
            .detach(connection.id(), task_id);

        match removed {
            Some(stored) => {
                tracing::debug!(task_id = %task_id, connection = %stored.id(), "Observer unregistered");
                if stored.is_open() {
                    stored.close().await;
                }
                true
            }
            None => false,
        }
    }

    /// Send `message` to every connection observing `task_id`
    ///
    /// Connections whose send fails or times out are unregistered after the
    /// send pass. Returns the number of successful deliveries; a task with no
    /// observers is a no-op returning 0.
    pub async fn publish(&self, task_id: TaskId, message: &HubMessage) -> usize {
        let gate = {
            let registrations = self.inner.registrations.lock().await;
            match registrations.tasks.get(&task_id) {
                Some(entry) => Arc::clone(&entry.publish_gate),
                None => return 0,
            }
        };

        let _ordered = gate.lock().await;
        let connections: Vec<Arc<dyn Connection>> = {
            let registrations = self.inner.registrations.lock().await;
            match registrations.tasks.get(&task_id) {
                Some(entry) => entry.connections.values().cloned().collect(),
                None => return 0,
            }
        };

        let results = join_all(connections.iter().map(|conn| async move {
            let delivered = self.send_bounded(&**conn, message).await;
            (conn, delivered)
        }))
        .await;

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (conn, ok) in results {
            if ok {
                delivered += 1;
            } else {
                failed.push(Arc::clone(conn));
            }
        }

        for conn in failed {
            tracing::debug!(task_id = %task_id, connection = %conn.id(), "Dropping observer after failed send");
            self.unregister(&*conn, task_id).await;
        }
        delivered
    }

    /// Send `message` to every registered connection of every task
    pub async fn broadcast_all(&self, message: &HubMessage) -> usize {
        let mut delivered = 0;
        for task_id in self.task_ids().await {
            delivered += self.publish(task_id, message).await;
        }
        delivered
    }

    /// Number of connections observing `task_id`
    pub async fn connection_count(&self, task_id: TaskId) -> usize {
        self.inner
            .registrations
            .lock()
            .await
            .tasks
            .get(&task_id)
            .map_or(0, |entry| entry.connections.len())
    }

    /// Tasks with at least one observer
    pub async fn task_ids(&self) -> Vec<TaskId> {
        self.inner
            .registrations
            .lock()
            .await
            .tasks
            .keys()
            .copied()
            .collect()
    }

    /// Whether the keepalive loop has been started
    pub fn keepalive_started(&self) -> bool {
        self.inner.keepalive_started.load(Ordering::SeqCst)
    }

    /// Stop the keepalive loop and close every connection
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let drained: Vec<Arc<dyn Connection>> = {
            let mut registrations = self.inner.registrations.lock().await;
            registrations.owners.clear();
            registrations
                .tasks
                .drain()
                .flat_map(|(_, entry)| entry.connections.into_values())
                .collect()
        };

        let count = drained.len();
        join_all(drained.iter().map(|conn| conn.close())).await;
        tracing::info!(connections = count, "Connection hub shut down");
    }

    async fn send_bounded(&self, connection: &dyn Connection, message: &HubMessage) -> bool {
        match tokio::time::timeout(self.inner.send_timeout, connection.send(message)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::debug!(connection = %connection.id(), error = %e, "Send to observer failed");
                false
            }
            Err(_) => {
                tracing::debug!(connection = %connection.id(), "Send to observer timed out");
                false
            }
        }
    }

    fn ensure_keepalive(&self) {
        if self.inner.keepalive_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let token = self.inner.shutdown.clone();
        let period = self.inner.keepalive_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                ConnectionHub { inner }.probe_connections().await;
            }
            tracing::debug!("Keepalive loop stopped");
        });
        tracing::debug!(interval_secs = period.as_secs(), "Keepalive loop started");
    }

    /// Ping every connection once and unregister the ones that are closed or fail
    pub(crate) async fn probe_connections(&self) -> usize {
        let snapshot: Vec<(TaskId, Arc<dyn Connection>)> = {
            let registrations = self.inner.registrations.lock().await;
            registrations
                .tasks
                .iter()
                .flat_map(|(task_id, entry)| {
                    entry
                        .connections
                        .values()
                        .map(move |conn| (*task_id, Arc::clone(conn)))
                })
                .collect()
        };

        let ping = HubMessage::ping();
        let results = join_all(snapshot.iter().map(|(task_id, conn)| {
            let ping = &ping;
            async move {
                let alive = conn.is_open() && self.send_bounded(&**conn, ping).await;
                (*task_id, conn, alive)
            }
        }))
        .await;

        let mut pruned = 0;
        for (task_id, conn, alive) in results {
            if !alive && self.unregister(&**conn, task_id).await {
                pruned += 1;
            }
        }
        if pruned > 0 {
            tracing::info!(pruned, "Keepalive pruned dead observer connections");
        }
        pruned
    }
}
