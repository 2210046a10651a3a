//! The translator registry: packet kind → conversion function.
//!
//! Built once at startup through [`TranslatorRegistryBuilder`] and never
//! mutated afterwards, so every session task can dispatch through the
//! same `Arc<TranslatorRegistry>` without locking.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossplay_protocol::{edition_a, edition_b};
use crossplay_session::SessionContext;

use crate::{MappingTables, TranslateError, downstream, upstream};

/// Which way a packet travels through the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to backend.
    Upstream,
    /// Backend to client.
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upstream => f.write_str("upstream"),
            Self::Downstream => f.write_str("downstream"),
        }
    }
}

/// A translation function from one packet to zero or more packets of the
/// other edition.
pub type Translator<In, Out> =
    fn(&In, &SessionContext, &dyn MappingTables) -> Result<Vec<Out>, TranslateError>;

/// A packet type the registry can route.
///
/// Implemented for both editions' packet enums; picks the dispatch table
/// by type, so a packet can never be looked up in the wrong direction.
pub trait Routable: Sized + 'static {
    /// The fieldless tag the table is keyed by.
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;
    /// What this packet translates into.
    type Output;

    const DIRECTION: Direction;

    fn kind(&self) -> Self::Kind;

    fn table(registry: &TranslatorRegistry) -> &HashMap<Self::Kind, Translator<Self, Self::Output>>;
}

impl Routable for edition_a::Packet {
    type Kind = edition_a::PacketKind;
    type Output = edition_b::Packet;

    const DIRECTION: Direction = Direction::Upstream;

    fn kind(&self) -> Self::Kind {
        edition_a::Packet::kind(self)
    }

    fn table(registry: &TranslatorRegistry) -> &HashMap<Self::Kind, Translator<Self, Self::Output>> {
        &registry.upstream
    }
}

impl Routable for edition_b::Packet {
    type Kind = edition_b::PacketKind;
    type Output = edition_a::Packet;

    const DIRECTION: Direction = Direction::Downstream;

    fn kind(&self) -> Self::Kind {
        edition_b::Packet::kind(self)
    }

    fn table(registry: &TranslatorRegistry) -> &HashMap<Self::Kind, Translator<Self, Self::Output>> {
        &registry.downstream
    }
}

/// Snapshot of the dispatch counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TranslateStats {
    /// Packets that produced output (possibly empty) without error.
    pub translated: u64,
    /// Packets with no translator, or with no mapping-table entry.
    pub unmapped: u64,
    /// Packets whose translator returned an error.
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    translated: AtomicU64,
    unmapped: AtomicU64,
    failed: AtomicU64,
}

/// Immutable dispatch tables for both directions.
pub struct TranslatorRegistry {
    upstream: HashMap<edition_a::PacketKind, Translator<edition_a::Packet, edition_b::Packet>>,
    downstream: HashMap<edition_b::PacketKind, Translator<edition_b::Packet, edition_a::Packet>>,
    mappings: Arc<dyn MappingTables>,
    counters: Counters,
}

impl fmt::Debug for TranslatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslatorRegistry")
            .field("upstream", &self.upstream.len())
            .field("downstream", &self.downstream.len())
            .finish()
    }
}

impl TranslatorRegistry {
    /// A registry holding every built-in translator.
    pub fn with_defaults(mappings: Arc<dyn MappingTables>) -> Self {
        let mut builder = TranslatorRegistryBuilder::new();
        upstream::register(&mut builder);
        downstream::register(&mut builder);
        builder.build(mappings)
    }

    pub fn builder() -> TranslatorRegistryBuilder {
        TranslatorRegistryBuilder::new()
    }

    /// Translates one inbound packet for the opposite link.
    ///
    /// Never fails: an unmapped kind, a missing table entry, or a
    /// translator error all yield an empty list and a log line.
    pub fn dispatch<P: Routable>(&self, packet: &P, ctx: &SessionContext) -> Vec<P::Output> {
        let kind = packet.kind();
        let Some(translate) = P::table(self).get(&kind) else {
            self.counters.unmapped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                session_id = %ctx.id(),
                direction = %P::DIRECTION,
                kind = ?kind,
                "no translator, dropping packet"
            );
            return Vec::new();
        };

        match translate(packet, ctx, self.mappings.as_ref()) {
            Ok(out) => {
                self.counters.translated.fetch_add(1, Ordering::Relaxed);
                out
            }
            Err(e) if e.is_unmapped() => {
                self.counters.unmapped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    session_id = %ctx.id(),
                    direction = %P::DIRECTION,
                    kind = ?kind,
                    error = %e,
                    "no mapping, dropping packet"
                );
                Vec::new()
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    session_id = %ctx.id(),
                    direction = %P::DIRECTION,
                    kind = ?kind,
                    error = %e,
                    "translation failed, dropping packet"
                );
                Vec::new()
            }
        }
    }

    /// Returns `true` if a translator is registered for `kind`.
    pub fn handles<P: Routable>(&self, kind: P::Kind) -> bool {
        P::table(self).contains_key(&kind)
    }

    pub fn stats(&self) -> TranslateStats {
        TranslateStats {
            translated: self.counters.translated.load(Ordering::Relaxed),
            unmapped: self.counters.unmapped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

/// Collects translators before the registry is frozen.
#[derive(Default)]
pub struct TranslatorRegistryBuilder {
    upstream: HashMap<edition_a::PacketKind, Translator<edition_a::Packet, edition_b::Packet>>,
    downstream: HashMap<edition_b::PacketKind, Translator<edition_b::Packet, edition_a::Packet>>,
}

impl TranslatorRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client → backend translator, replacing any previous one.
    pub fn upstream(
        &mut self,
        kind: edition_a::PacketKind,
        translator: Translator<edition_a::Packet, edition_b::Packet>,
    ) -> &mut Self {
        self.upstream.insert(kind, translator);
        self
    }

    /// Registers a backend → client translator, replacing any previous one.
    pub fn downstream(
        &mut self,
        kind: edition_b::PacketKind,
        translator: Translator<edition_b::Packet, edition_a::Packet>,
    ) -> &mut Self {
        self.downstream.insert(kind, translator);
        self
    }

    pub fn build(self, mappings: Arc<dyn MappingTables>) -> TranslatorRegistry {
        TranslatorRegistry {
            upstream: self.upstream,
            downstream: self.downstream,
            mappings,
            counters: Counters::default(),
        }
    }
}
