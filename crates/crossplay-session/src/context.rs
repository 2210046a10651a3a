//! Per-session state shared with the translators.
//!
//! Most translators are pure. The few that need session state (runtime id
//! allocation, the entity map, teleport confirmation) receive a
//! `&SessionContext` explicitly. Fields that are fixed during login are
//! write-once; the caches use short `std::sync::Mutex` sections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use crossplay_protocol::edition_a::CodecVersion;
use crossplay_protocol::{RuntimeId, SessionId, Vec3};

use crate::{AuthData, ClientData, SessionError};

#[derive(Debug, Default)]
struct EntityMap {
    /// Backend entity id → client runtime id.
    by_backend: HashMap<i32, RuntimeId>,
    /// The backend's id for the player's own entity.
    player: Option<i32>,
}

/// Session-scoped translation state.
#[derive(Debug)]
pub struct SessionContext {
    id: SessionId,
    auth: OnceLock<AuthData>,
    client_data: OnceLock<ClientData>,
    codec_version: OnceLock<CodecVersion>,
    next_runtime_id: AtomicU64,
    entities: Mutex<EntityMap>,
    pending_teleport: Mutex<Option<i32>>,
    position: Mutex<Option<Vec3>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Critical sections never panic midway, so a poisoned lock still
    // holds consistent data.
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionContext {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            auth: OnceLock::new(),
            client_data: OnceLock::new(),
            codec_version: OnceLock::new(),
            next_runtime_id: AtomicU64::new(RuntimeId::PLAYER.0 + 1),
            entities: Mutex::new(EntityMap::default()),
            pending_teleport: Mutex::new(None),
            position: Mutex::new(None),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    // -- Write-once login data --

    /// Stores the authentication data. Fails if it was already set.
    pub fn set_auth(&self, auth: AuthData) -> Result<(), SessionError> {
        self.auth
            .set(auth)
            .map_err(|_| SessionError::AlreadySet("auth data"))
    }

    pub fn auth(&self) -> Option<&AuthData> {
        self.auth.get()
    }

    /// The player's username, once known.
    pub fn username(&self) -> Option<&str> {
        self.auth.get().map(|a| a.username.as_str())
    }

    pub fn set_client_data(&self, data: ClientData) -> Result<(), SessionError> {
        self.client_data
            .set(data)
            .map_err(|_| SessionError::AlreadySet("client data"))
    }

    pub fn client_data(&self) -> Option<&ClientData> {
        self.client_data.get()
    }

    pub fn set_codec_version(&self, version: CodecVersion) -> Result<(), SessionError> {
        self.codec_version
            .set(version)
            .map_err(|_| SessionError::AlreadySet("codec version"))
    }

    pub fn codec_version(&self) -> Option<CodecVersion> {
        self.codec_version.get().copied()
    }

    /// Returns `true` once both login pieces have arrived.
    pub fn is_authenticated(&self) -> bool {
        self.auth.get().is_some() && self.client_data.get().is_some()
    }

    // -- Runtime ids --

    /// Hands out the next runtime id. Never returns [`RuntimeId::PLAYER`].
    pub fn allocate_runtime_id(&self) -> RuntimeId {
        RuntimeId(self.next_runtime_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Records which backend entity id is the player.
    pub fn bind_player_entity(&self, entity_id: i32) {
        let mut map = lock(&self.entities);
        if let Some(old) = map.player.replace(entity_id) {
            map.by_backend.remove(&old);
        }
        map.by_backend.insert(entity_id, RuntimeId::PLAYER);
    }

    /// Returns the runtime id for a backend entity, allocating one the
    /// first time the entity is seen.
    pub fn map_entity(&self, entity_id: i32) -> RuntimeId {
        let mut map = lock(&self.entities);
        if let Some(id) = map.by_backend.get(&entity_id) {
            return *id;
        }
        let id = self.allocate_runtime_id();
        map.by_backend.insert(entity_id, id);
        id
    }

    /// Looks up a backend entity without allocating.
    pub fn runtime_id_for(&self, entity_id: i32) -> Option<RuntimeId> {
        lock(&self.entities).by_backend.get(&entity_id).copied()
    }

    /// Forgets a backend entity. The player's own entity is never removed.
    pub fn forget_entity(&self, entity_id: i32) -> Option<RuntimeId> {
        let mut map = lock(&self.entities);
        if map.player == Some(entity_id) {
            return None;
        }
        map.by_backend.remove(&entity_id)
    }

    /// Number of tracked backend entities, the player included.
    pub fn entity_count(&self) -> usize {
        lock(&self.entities).by_backend.len()
    }

    // -- Movement --

    /// Remembers a server teleport that the client must confirm.
    pub fn set_pending_teleport(&self, teleport_id: i32) {
        *lock(&self.pending_teleport) = Some(teleport_id);
    }

    /// Takes the unconfirmed teleport, if any.
    pub fn take_pending_teleport(&self) -> Option<i32> {
        lock(&self.pending_teleport).take()
    }

    pub fn set_position(&self, position: Vec3) {
        *lock(&self.position) = Some(position);
    }

    /// Last known player position, in client coordinates.
    pub fn position(&self) -> Option<Vec3> {
        *lock(&self.position)
    }
}
