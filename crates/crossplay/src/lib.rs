//! # Crossplay
//!
//! Protocol translation gateway between two editions of a game network
//! protocol.
//!
//! Clients speak the datagram edition to the gateway; the gateway opens
//! one stream-edition link per player to a single backend and translates
//! packets both ways. Discovery probes are answered with the backend's
//! status, refreshed in the background.
//!
//! ```text
//! client ⇄ DatagramTransport ⇄ session engine ⇄ TcpDownstream ⇄ backend
//!                                   │
//!                      TranslatorRegistry + SessionContext
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use crossplay::prelude::*;
//!
//! # async fn start() -> Result<(), GatewayError> {
//! let config = GatewayConfig::from_json(r#"{"remote":{"port":25566}}"#)?;
//! let gateway = Gateway::builder().config(config).build().await?;
//! gateway.run().await
//! # }
//! ```

mod config;
mod downstream;
mod error;
mod link;
mod ping;
mod server;
mod session;

pub use config::{AuthMode, GatewayConfig, ListenerConfig, PingConfig, RemoteConfig, SessionConfig};
pub use downstream::{Downstream, TcpDownstream};
pub use error::{DownstreamError, GatewayError};
pub use ping::{PingResponder, StatusSource, spawn_refresh};
pub use server::{Gateway, GatewayBuilder};

pub mod prelude {
    pub use crate::{Gateway, GatewayBuilder, GatewayConfig, GatewayError};
    pub use crossplay_protocol::{DisconnectCategory, DisconnectReason};
    pub use crossplay_session::{ConnectorRegistry, IdentityService, SessionHandle};
    pub use crossplay_translate::{MappingTables, StaticMappings};
}
