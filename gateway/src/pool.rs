//
// Copyright 2025-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Connection registry
//!
//! The single shared structure of the gateway. It is created at startup,
//! injected into the acceptor and the idle sweep, and torn down at shutdown.
//! Iterating operations take a snapshot of handles under the read lock and
//! release it before touching any connection.

use crate::connection::ConnectionHandle;
use crate::error::{GatewayError, GatewayResult};
use crate::session::SessionState;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Shown to a connection replaced by a newer login under the same name
pub const DUPLICATE_LOGIN_MESSAGE: &str = "&/&RYou have logged in from another connection.&e&/";
/// Shown to a connection closed by the idle sweep
pub const IDLE_MESSAGE: &str = "&/&YYou have been idle too long. Goodbye.&e&/";
/// Shown to every connection when the server stops
pub const SHUTDOWN_MESSAGE: &str = "&/&RThe server is shutting down. Goodbye.&e&/";

#[derive(Debug, Clone)]
struct NameEntry {
    id: Uuid,
    display: String,
}

/// Registry of live connections and the names they have logged in under
#[derive(Debug)]
pub struct ConnectionPool {
    connections: RwLock<HashMap<Uuid, ConnectionHandle>>,
    /// Lowercased name to owning connection
    names: RwLock<HashMap<String, NameEntry>>,
    max_connections: usize,
}

impl ConnectionPool {
    /// Create a new connection pool
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            names: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Register a new connection
    pub async fn register(&self, handle: ConnectionHandle) -> GatewayResult<()> {
        let mut connections = self.connections.write().await;
        if connections.len() >= self.max_connections {
            return Err(GatewayError::ConnectionLimit(self.max_connections));
        }
        let id = handle.id();
        if connections.contains_key(&id) {
            return Err(GatewayError::DuplicateConnection(id));
        }
        connections.insert(id, handle);
        tracing::debug!(session_id = %id, total = connections.len(), "Connection registered");
        Ok(())
    }

    /// Unregister a connection and release any name it holds
    pub async fn unregister(&self, id: Uuid) -> Option<ConnectionHandle> {
        let removed = {
            let mut connections = self.connections.write().await;
            connections.remove(&id)
        };
        if removed.is_some() {
            let mut names = self.names.write().await;
            names.retain(|_, entry| entry.id != id);
            tracing::debug!(session_id = %id, "Connection unregistered");
        }
        removed
    }

    pub async fn get(&self, id: Uuid) -> Option<ConnectionHandle> {
        self.connections.read().await.get(&id).cloned()
    }

    /// Look up the connection logged in under a name, ignoring case
    pub async fn find_by_name(&self, name: &str) -> Option<ConnectionHandle> {
        let names = self.names.read().await;
        let entry = names.get(&name.to_lowercase())?;
        self.connections.read().await.get(&entry.id).cloned()
    }

    /// Make `id` the authoritative connection for `name`.
    ///
    /// A different live connection already holding the name is told to close
    /// before the new entry is written. Returns the evicted connection's id.
    pub async fn register_name(&self, id: Uuid, name: &str) -> GatewayResult<Option<Uuid>> {
        let key = name.to_lowercase();
        let mut names = self.names.write().await;
        let connections = self.connections.read().await;
        if !connections.contains_key(&id) {
            return Err(GatewayError::NotFound(id));
        }

        let evicted = match names.get(&key) {
            Some(entry) if entry.id != id => {
                if let Some(previous) = connections.get(&entry.id) {
                    tracing::info!(
                        session_id = %entry.id,
                        replaced_by = %id,
                        name = %name,
                        "Closing previous connection for reconnecting player"
                    );
                    previous.close(Some(DUPLICATE_LOGIN_MESSAGE.to_string()));
                }
                Some(entry.id)
            }
            _ => None,
        };

        names.insert(
            key,
            NameEntry {
                id,
                display: name.to_string(),
            },
        );
        Ok(evicted)
    }

    pub async fn is_full(&self) -> bool {
        self.connection_count().await >= self.max_connections
    }

    /// Get the number of active connections
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Get all active connection ids
    pub async fn active_sessions(&self) -> Vec<Uuid> {
        self.connections.read().await.keys().copied().collect()
    }

    /// Names currently logged in, sorted
    pub async fn names(&self) -> Vec<String> {
        let names = self.names.read().await;
        let mut list: Vec<String> = names.values().map(|entry| entry.display.clone()).collect();
        list.sort_by_key(|name| name.to_lowercase());
        list
    }

    pub async fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Queue text for a single connection
    pub async fn send(&self, id: Uuid, text: &str) -> GatewayResult<bool> {
        let handle = self.get(id).await.ok_or(GatewayError::NotFound(id))?;
        Ok(handle.send(text))
    }

    /// Send text to every playing connection except `excluding`.
    ///
    /// Returns how many queues accepted it; a full queue drops the message for
    /// that client only.
    pub async fn broadcast(&self, text: &str, excluding: Option<Uuid>) -> usize {
        let targets: Vec<ConnectionHandle> = {
            let connections = self.connections.read().await;
            connections
                .values()
                .filter(|handle| Some(handle.id()) != excluding)
                .filter(|handle| handle.state() == SessionState::Playing)
                .cloned()
                .collect()
        };
        targets
            .iter()
            .filter(|handle| handle.send(text))
            .count()
    }

    /// Send text to specific connections
    pub async fn broadcast_to(&self, ids: &[Uuid], text: &str) -> usize {
        let targets: Vec<ConnectionHandle> = {
            let connections = self.connections.read().await;
            ids.iter()
                .filter_map(|id| connections.get(id).cloned())
                .collect()
        };
        targets
            .iter()
            .filter(|handle| handle.send(text))
            .count()
    }

    /// Close every playing connection idle for longer than `threshold`
    pub async fn sweep_idle(&self, threshold: chrono::Duration, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut closed = Vec::new();
        for handle in self.snapshot().await {
            if handle.state() != SessionState::Playing || handle.is_closing() {
                continue;
            }
            let idle = now - handle.last_activity();
            if idle > threshold {
                tracing::info!(
                    session_id = %handle.id(),
                    idle_seconds = idle.num_seconds(),
                    "Disconnecting idle connection"
                );
                handle.close(Some(IDLE_MESSAGE.to_string()));
                closed.push(handle.id());
            }
        }
        closed
    }

    /// Run [`sweep_idle`](Self::sweep_idle) every `interval` until cancelled
    pub async fn run_idle_sweep(
        self: Arc<Self>,
        interval: std::time::Duration,
        threshold: chrono::Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let closed = self.sweep_idle(threshold, Utc::now()).await;
                    if !closed.is_empty() {
                        tracing::info!(count = closed.len(), "Idle sweep closed connections");
                    }
                }
            }
        }
        tracing::debug!("Idle sweep stopped");
    }

    /// Tell every connection to close, returning how many were signalled
    pub async fn close_all(&self, message: &str) -> usize {
        let handles = self.snapshot().await;
        for handle in &handles {
            handle.close(Some(message.to_string()));
        }
        handles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use tokio::sync::mpsc;

    fn handle() -> (ConnectionHandle, mpsc::Receiver<Outbound>) {
        ConnectionHandle::new("127.0.0.1:4000", 16)
    }

    fn playing() -> (ConnectionHandle, mpsc::Receiver<Outbound>) {
        let (handle, rx) = handle();
        handle.set_state(SessionState::Playing);
        (handle, rx)
    }

    #[tokio::test]
    async fn test_pool_creation() {
        let pool = ConnectionPool::new(10);
        assert_eq!(pool.connection_count().await, 0);
        assert!(!pool.is_full().await);
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let pool = ConnectionPool::new(10);
        let (handle, _rx) = handle();
        let id = handle.id();

        pool.register(handle.clone()).await.unwrap();
        assert_eq!(pool.connection_count().await, 1);
        assert!(matches!(
            pool.register(handle).await,
            Err(GatewayError::DuplicateConnection(dup)) if dup == id
        ));

        assert!(pool.unregister(id).await.is_some());
        assert!(pool.unregister(id).await.is_none());
        assert_eq!(pool.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let pool = ConnectionPool::new(2);
        let mut receivers = Vec::new();
        for _ in 0..2 {
            let (handle, rx) = handle();
            receivers.push(rx);
            pool.register(handle).await.unwrap();
        }
        assert!(pool.is_full().await);
        let (extra, _rx) = handle();
        assert!(matches!(
            pool.register(extra).await,
            Err(GatewayError::ConnectionLimit(2))
        ));
    }

    #[tokio::test]
    async fn test_idle_sweep_threshold() {
        let pool = ConnectionPool::new(10);
        let now = Utc::now();

        let (stale, _stale_rx) = playing();
        stale.touch_at(now - chrono::Duration::minutes(31));
        let (fresh, _fresh_rx) = playing();
        fresh.touch_at(now - chrono::Duration::minutes(29));
        let (login, _login_rx) = handle();
        login.touch_at(now - chrono::Duration::minutes(90));

        pool.register(stale.clone()).await.unwrap();
        pool.register(fresh.clone()).await.unwrap();
        pool.register(login.clone()).await.unwrap();

        let closed = pool.sweep_idle(chrono::Duration::minutes(30), now).await;
        assert_eq!(closed, vec![stale.id()]);
        assert!(stale.is_closing());
        assert_eq!(stale.take_close_message().as_deref(), Some(IDLE_MESSAGE));
        assert!(!fresh.is_closing());
        assert!(!login.is_closing());
    }

    #[tokio::test]
    async fn test_reconnection_evicts_previous() {
        let pool = ConnectionPool::new(10);
        let (first, _first_rx) = playing();
        let (second, _second_rx) = playing();
        pool.register(first.clone()).await.unwrap();
        pool.register(second.clone()).await.unwrap();

        assert_eq!(pool.register_name(first.id(), "Aldric").await.unwrap(), None);
        assert_eq!(
            pool.find_by_name("aldric").await.map(|h| h.id()),
            Some(first.id())
        );

        let evicted = pool.register_name(second.id(), "ALDRIC").await.unwrap();
        assert_eq!(evicted, Some(first.id()));
        assert!(first.is_closing());
        assert_eq!(
            first.take_close_message().as_deref(),
            Some(DUPLICATE_LOGIN_MESSAGE)
        );
        assert_eq!(
            pool.find_by_name("Aldric").await.map(|h| h.id()),
            Some(second.id())
        );

        // The old connection leaving must not release the new owner's name
        pool.unregister(first.id()).await;
        assert_eq!(
            pool.find_by_name("aldric").await.map(|h| h.id()),
            Some(second.id())
        );
        assert_eq!(pool.names().await, vec!["ALDRIC".to_string()]);
    }

    #[tokio::test]
    async fn test_register_name_same_connection() {
        let pool = ConnectionPool::new(10);
        let (conn, _rx) = playing();
        pool.register(conn.clone()).await.unwrap();
        pool.register_name(conn.id(), "Mira").await.unwrap();
        assert_eq!(pool.register_name(conn.id(), "mira").await.unwrap(), None);
        assert!(!conn.is_closing());

        assert!(matches!(
            pool.register_name(Uuid::new_v4(), "Ghost").await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender_and_non_playing() {
        let pool = ConnectionPool::new(10);
        let (speaker, mut speaker_rx) = playing();
        let (listener, mut listener_rx) = playing();
        let (login, mut login_rx) = handle();
        for h in [&speaker, &listener, &login] {
            pool.register(h.clone()).await.unwrap();
        }

        let sent = pool.broadcast("hello", Some(speaker.id())).await;
        assert_eq!(sent, 1);
        assert_eq!(listener_rx.recv().await, Some(Outbound::Text("hello".into())));
        assert!(speaker_rx.try_recv().is_err());
        assert!(login_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_to_specific() {
        let pool = ConnectionPool::new(10);
        let (a, mut a_rx) = handle();
        let (b, mut b_rx) = handle();
        pool.register(a.clone()).await.unwrap();
        pool.register(b.clone()).await.unwrap();

        let sent = pool.broadcast_to(&[b.id(), Uuid::new_v4()], "psst").await;
        assert_eq!(sent, 1);
        assert_eq!(b_rx.recv().await, Some(Outbound::Text("psst".into())));
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops_for_one_client() {
        let pool = ConnectionPool::new(10);
        let (slow, _slow_rx) = ConnectionHandle::new("slow", 1);
        slow.set_state(SessionState::Playing);
        let (fast, mut fast_rx) = playing();
        pool.register(slow.clone()).await.unwrap();
        pool.register(fast.clone()).await.unwrap();

        assert_eq!(pool.broadcast("one", None).await, 2);
        assert_eq!(pool.broadcast("two", None).await, 1);
        assert_eq!(fast_rx.recv().await, Some(Outbound::Text("one".into())));
        assert_eq!(fast_rx.recv().await, Some(Outbound::Text("two".into())));
    }

    #[tokio::test]
    async fn test_close_all() {
        let pool = ConnectionPool::new(10);
        let (a, _a_rx) = handle();
        let (b, _b_rx) = playing();
        pool.register(a.clone()).await.unwrap();
        pool.register(b.clone()).await.unwrap();

        assert_eq!(pool.close_all(SHUTDOWN_MESSAGE).await, 2);
        assert!(a.is_closing() && b.is_closing());
        assert_eq!(b.take_close_message().as_deref(), Some(SHUTDOWN_MESSAGE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sweep_task_stops_on_cancel() {
        let pool = Arc::new(ConnectionPool::new(10));
        let (stale, _rx) = playing();
        stale.touch_at(Utc::now() - chrono::Duration::hours(2));
        pool.register(stale.clone()).await.unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&pool).run_idle_sweep(
            std::time::Duration::from_secs(60),
            chrono::Duration::minutes(30),
            cancel.clone(),
        ));

        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert!(stale.is_closing());

        cancel.cancel();
        task.await.unwrap();
    }
}
