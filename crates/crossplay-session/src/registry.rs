//! The connector registry: every established session in the process.
//!
//! One registry is created at startup and handed by reference to the
//! listener, the sessions and the ping responder. It is the only state
//! several sessions mutate, so all mutation goes through
//! [`register`](ConnectorRegistry::register) and
//! [`deregister`](ConnectorRegistry::deregister), each one short critical
//! section on a `std::sync::RwLock`. Readers get a cloned
//! [`snapshot`](ConnectorRegistry::snapshot), never a view into the map.
//!
//! # Lifecycle
//!
//! ```text
//! register() ──→ Registration ──(drop / release)──→ deregister()
//!                                                        │
//! shutdown() ──→ signal every session ──→ wait until the map is empty
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use crossplay_protocol::{BackendStatus, DisconnectReason, SessionId};
use tokio::sync::{Notify, mpsc, watch};

use crate::{SessionError, SessionState};

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Commands other components may send to a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Close the session with this reason.
    Close(DisconnectReason),
    /// Show a chat line to the player.
    SendMessage(String),
}

/// Handle to a running session. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    username: String,
    addr: SocketAddr,
    state: watch::Receiver<SessionState>,
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(
        id: SessionId,
        username: impl Into<String>,
        addr: SocketAddr,
        state: watch::Receiver<SessionState>,
        commands: mpsc::Sender<SessionCommand>,
    ) -> Self {
        Self {
            id,
            username: username.into(),
            addr,
            state,
            commands,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// The client's address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The session's current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Asks the session to close.
    pub async fn close(&self, reason: DisconnectReason) -> Result<(), SessionError> {
        self.commands
            .send(SessionCommand::Close(reason))
            .await
            .map_err(|_| SessionError::Closed(self.id))
    }

    /// Sends a chat line to the player.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.commands
            .send(SessionCommand::SendMessage(text.into()))
            .await
            .map_err(|_| SessionError::Closed(self.id))
    }

    /// Waits until the session reaches `Closed`.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        // An error means the session task dropped its sender, which only
        // happens once it is done.
        let _ = state.wait_for(|s| s.is_terminal()).await;
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Proof of registration. Dropping it deregisters the session exactly once.
///
/// Holds the registry weakly, so a session never keeps it alive.
#[derive(Debug)]
pub struct Registration {
    id: SessionId,
    registry: Weak<ConnectorRegistry>,
    released: AtomicBool,
}

impl Registration {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Deregisters now. Later calls, and the eventual drop, do nothing.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.deregister(self.id);
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// ConnectorRegistry
// ---------------------------------------------------------------------------

/// Counters exposed for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    pub live: usize,
    pub registered: u64,
    pub deregistered: u64,
    /// Registrations refused: duplicates, or during shutdown.
    pub rejected: u64,
}

/// Tracks every established session.
#[derive(Debug)]
pub struct ConnectorRegistry {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    status: RwLock<Option<BackendStatus>>,
    shutdown: watch::Sender<bool>,
    drained: Notify,
    registered: AtomicU64,
    deregistered: AtomicU64,
    rejected: AtomicU64,
}

impl ConnectorRegistry {
    pub fn new() -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            status: RwLock::new(None),
            shutdown,
            drained: Notify::new(),
            registered: AtomicU64::new(0),
            deregistered: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    /// Adds an established session.
    ///
    /// # Errors
    /// - [`SessionError::ShuttingDown`] once shutdown has begun
    /// - [`SessionError::AlreadyRegistered`] for a duplicate id
    pub fn register(self: &Arc<Self>, handle: SessionHandle) -> Result<Registration, SessionError> {
        let id = handle.id();
        {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            // Checked under the write lock so shutdown cannot miss a
            // session that slips in concurrently.
            if self.is_shutting_down() {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(SessionError::ShuttingDown);
            }
            if sessions.contains_key(&id) {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::error!(session_id = %id, "session registered twice");
                return Err(SessionError::AlreadyRegistered(id));
            }
            sessions.insert(id, handle);
        }
        self.registered.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(session_id = %id, "session registered");
        Ok(Registration {
            id,
            registry: Arc::downgrade(self),
            released: AtomicBool::new(false),
        })
    }

    /// Removes a session. Returns `false` if it was not registered.
    ///
    /// Usually called through [`Registration`]; a `false` return from a
    /// direct call means something deregistered twice.
    pub fn deregister(&self, id: SessionId) -> bool {
        let (removed, now_empty) = {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            let removed = sessions.remove(&id).is_some();
            (removed, sessions.is_empty())
        };
        if !removed {
            tracing::error!(session_id = %id, "deregister of unknown session");
            return false;
        }
        self.deregistered.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(session_id = %id, "session deregistered");
        if now_empty {
            self.drained.notify_waiters();
        }
        true
    }

    /// A stable copy of the registered sessions.
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Finds a session by the player's username.
    pub fn find_by_name(&self, username: &str) -> Option<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|h| h.username() == username)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            live: self.len(),
            registered: self.registered.load(Ordering::Relaxed),
            deregistered: self.deregistered.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Sends a chat line to every registered session.
    ///
    /// Returns how many sessions accepted it. Sessions that close while
    /// the broadcast runs are skipped.
    pub async fn broadcast(&self, text: &str) -> usize {
        let mut delivered = 0;
        for handle in self.snapshot() {
            if handle.send_message(text).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    // -- Backend status cache --

    /// The last backend status the ping refresher stored.
    pub fn cached_status(&self) -> Option<BackendStatus> {
        self.status.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn update_status(&self, status: BackendStatus) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = Some(status);
    }

    // -- Shutdown --

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// A receiver that flips to `true` when shutdown begins.
    ///
    /// Every session watches it, registered or not.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Resolves once shutdown has begun, immediately if it already has.
    pub async fn wait_shutdown(&self) {
        let mut signal = self.shutdown.subscribe();
        // The sender lives in `self`, so this cannot fail while we wait.
        let _ = signal.wait_for(|s| *s).await;
    }

    /// Closes every session and waits until all have deregistered.
    ///
    /// Idempotent: a second call only waits for the same barrier.
    pub async fn shutdown(&self) {
        let first = !self.shutdown.send_replace(true);
        if first {
            tracing::info!(live = self.len(), "registry shutting down");
        }
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            // Register interest before checking, so a deregistration in
            // between is not missed.
            drained.as_mut().enable();
            if self.is_empty() {
                break;
            }
            drained.await;
        }
        if first {
            tracing::info!(stats = ?self.stats(), "registry drained");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr};

    fn handle(id: u64) -> (SessionHandle, mpsc::Receiver<SessionCommand>) {
        let (tx, rx) = mpsc::channel(8);
        let (_state_tx, state_rx) = watch::channel(SessionState::Established);
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 19132));
        (
            SessionHandle::new(SessionId(id), format!("player{id}"), addr, state_rx, tx),
            rx,
        )
    }

    #[test]
    fn test_register_and_snapshot() {
        let registry = ConnectorRegistry::new();
        let (h, _rx) = handle(1);
        let reg = registry.register(h).unwrap();
        assert_eq!(reg.id(), SessionId(1));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot()[0].username(), "player1");
        assert!(registry.find_by_name("player1").is_some());
        assert!(registry.find_by_name("nobody").is_none());
    }

    #[test]
    fn test_register_duplicate_is_rejected() {
        let registry = ConnectorRegistry::new();
        let (a, _ra) = handle(1);
        let (b, _rb) = handle(1);
        let _reg = registry.register(a).unwrap();
        let err = registry.register(b).unwrap_err();
        assert!(matches!(err, SessionError::AlreadyRegistered(SessionId(1))));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.stats().rejected, 1);
    }

    #[test]
    fn test_registration_drop_deregisters_once() {
        let registry = ConnectorRegistry::new();
        let (h, _rx) = handle(1);
        let reg = registry.register(h).unwrap();
        reg.release();
        reg.release();
        drop(reg);
        let stats = registry.stats();
        assert_eq!(stats.live, 0);
        assert_eq!(stats.registered, 1);
        assert_eq!(stats.deregistered, 1);
    }

    #[test]
    fn test_deregister_unknown_returns_false() {
        let registry = ConnectorRegistry::new();
        assert!(!registry.deregister(SessionId(9)));
        assert_eq!(registry.stats().deregistered, 0);
    }

    #[test]
    fn test_registration_outliving_registry_is_harmless() {
        let registry = ConnectorRegistry::new();
        let (h, _rx) = handle(1);
        let reg = registry.register(h).unwrap();
        drop(registry);
        drop(reg);
    }

    #[test]
    fn test_snapshot_is_independent_of_later_changes() {
        let registry = ConnectorRegistry::new();
        let (a, _ra) = handle(1);
        let (b, _rb) = handle(2);
        let reg_a = registry.register(a).unwrap();
        let _reg_b = registry.register(b).unwrap();
        let snap = registry.snapshot();
        drop(reg_a);
        assert_eq!(snap.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_status_cache() {
        let registry = ConnectorRegistry::new();
        assert!(registry.cached_status().is_none());
        registry.update_status(BackendStatus {
            motd: "Test.".into(),
            online_players: 1,
            max_players: 101,
            version_name: "1.21.1".into(),
            protocol: 767,
            latency_ms: Some(3),
        });
        assert_eq!(registry.cached_status().unwrap().max_players, 101);
    }

    #[tokio::test]
    async fn test_handle_commands_reach_session() {
        let (h, mut rx) = handle(1);
        h.send_message("hello").await.unwrap();
        h.close(DisconnectReason::from_category(
            crossplay_protocol::DisconnectCategory::ServerShutdown,
        ))
        .await
        .unwrap();
        assert_eq!(rx.recv().await, Some(SessionCommand::SendMessage("hello".into())));
        assert!(matches!(rx.recv().await, Some(SessionCommand::Close(_))));
    }

    #[tokio::test]
    async fn test_handle_on_dead_session_errors() {
        let (h, rx) = handle(4);
        drop(rx);
        assert!(matches!(
            h.send_message("x").await,
            Err(SessionError::Closed(SessionId(4)))
        ));
    }

    #[tokio::test]
    async fn test_broadcast_counts_live_sessions() {
        let registry = ConnectorRegistry::new();
        let (a, mut ra) = handle(1);
        let (b, rb) = handle(2);
        let _reg_a = registry.register(a).unwrap();
        let _reg_b = registry.register(b).unwrap();
        drop(rb);
        assert_eq!(registry.broadcast("server restarting").await, 1);
        assert_eq!(
            ra.recv().await,
            Some(SessionCommand::SendMessage("server restarting".into()))
        );
    }

    #[tokio::test]
    async fn test_shutdown_on_empty_registry_returns() {
        let registry = ConnectorRegistry::new();
        registry.shutdown().await;
        registry.shutdown().await;
        assert!(registry.is_shutting_down());
        let (h, _rx) = handle(1);
        assert!(matches!(registry.register(h), Err(SessionError::ShuttingDown)));
    }
}
