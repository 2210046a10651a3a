//! Session layer for Crossplay.
//!
//! This crate holds everything that is per player but independent of how
//! packets are translated:
//!
//! 1. **Lifecycle**: the [`SessionState`] machine every session moves
//!    through, forward only.
//! 2. **Identity**: [`AuthData`] from the client, [`ClientData`]
//!    capabilities, and the [`IdentityService`] seam for verification.
//! 3. **Translation state**: [`SessionContext`], handed explicitly to the
//!    translators that need it.
//! 4. **Registry**: the process-wide [`ConnectorRegistry`] of established
//!    sessions, with its shutdown barrier.
//!
//! # How it fits in the stack
//!
//! ```text
//! Gateway (above)  ← drives the state machine, owns both links
//!     ↕
//! Session Layer (this crate)  ← identity, state, registry
//!     ↕
//! Protocol Layer (below)  ← SessionId, DisconnectReason, packet types
//! ```

mod auth;
mod client_data;
mod context;
mod error;
mod registry;
mod state;

pub use auth::{AuthData, IdentityService, MAX_USERNAME_LEN, OfflineIdentity, Profile, offline_uuid};
pub use client_data::{ClientData, DEFAULT_LANGUAGE, DeviceOs, InputMode};
pub use context::SessionContext;
pub use error::SessionError;
pub use registry::{
    ConnectorRegistry, Registration, RegistryStats, SessionCommand, SessionHandle,
};
pub use state::SessionState;
