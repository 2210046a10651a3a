//! Packet translation for Crossplay.
//!
//! A translator turns one packet of one edition into zero or more packets
//! of the other. The [`TranslatorRegistry`] holds one translator per
//! packet kind and direction, built once at startup:
//!
//! ```text
//! client packet ──dispatch──→ upstream translator   ──→ backend packets
//! backend packet ──dispatch──→ downstream translator ──→ client packets
//! ```
//!
//! Dispatch never fails. A kind without a translator, an id missing from
//! the [`MappingTables`], or a translator error all drop that one packet
//! and are counted in [`TranslateStats`].

mod downstream;
mod error;
mod mappings;
mod registry;
mod upstream;

pub use error::TranslateError;
pub use mappings::{EmptyMappings, MappingTables, StaticMappings};
pub use registry::{
    Direction, Routable, TranslateStats, Translator, TranslatorRegistry, TranslatorRegistryBuilder,
};
pub use upstream::{EYE_HEIGHT, MAX_CHAT_LEN};
