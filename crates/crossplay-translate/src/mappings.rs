//! Id mapping tables between the two editions.
//!
//! The tables themselves are data maintained elsewhere. Translators only
//! see the [`MappingTables`] lookups, where `None` means "no translation
//! available".

use std::collections::HashMap;

/// Lookups from backend ids to client ids.
pub trait MappingTables: Send + Sync + 'static {
    /// Backend block state → client block runtime id.
    fn block(&self, block_state: i32) -> Option<u32>;

    /// Backend sound id → client sound event id.
    fn sound(&self, sound_id: i32) -> Option<u32>;

    /// Backend entity type → client entity identifier (`minecraft:pig`).
    fn entity_identifier(&self, entity_type: i32) -> Option<&str>;
}

/// Maps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyMappings;

impl MappingTables for EmptyMappings {
    fn block(&self, _block_state: i32) -> Option<u32> {
        None
    }

    fn sound(&self, _sound_id: i32) -> Option<u32> {
        None
    }

    fn entity_identifier(&self, _entity_type: i32) -> Option<&str> {
        None
    }
}

/// In-memory tables, filled once at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticMappings {
    blocks: HashMap<i32, u32>,
    sounds: HashMap<i32, u32>,
    entities: HashMap<i32, String>,
}

impl StaticMappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block(mut self, block_state: i32, runtime_id: u32) -> Self {
        self.blocks.insert(block_state, runtime_id);
        self
    }

    pub fn with_sound(mut self, sound_id: i32, event: u32) -> Self {
        self.sounds.insert(sound_id, event);
        self
    }

    pub fn with_entity(mut self, entity_type: i32, identifier: impl Into<String>) -> Self {
        self.entities.insert(entity_type, identifier.into());
        self
    }

    /// Total number of entries across all tables.
    pub fn len(&self) -> usize {
        self.blocks.len() + self.sounds.len() + self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MappingTables for StaticMappings {
    fn block(&self, block_state: i32) -> Option<u32> {
        self.blocks.get(&block_state).copied()
    }

    fn sound(&self, sound_id: i32) -> Option<u32> {
        self.sounds.get(&sound_id).copied()
    }

    fn entity_identifier(&self, entity_type: i32) -> Option<&str> {
        self.entities.get(&entity_type).map(String::as_str)
    }
}
