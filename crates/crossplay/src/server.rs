//! `Gateway` builder and accept loop.
//!
//! This is the entry point for running a gateway. It ties together all
//! the layers: transport → protocol → session → translate.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossplay_protocol::SessionId;
use crossplay_session::{ConnectorRegistry, IdentityService, OfflineIdentity};
use crossplay_transport::{DatagramTransport, QueryHandler, Transport, TransportError};
use crossplay_translate::{EmptyMappings, MappingTables, TranslateStats, TranslatorRegistry};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::GatewayConfig;
use crate::downstream::TcpDownstream;
use crate::ping::{PingResponder, spawn_refresh};
use crate::session::handle_connection;
use crate::GatewayError;

/// Shared gateway state passed to each session task.
///
/// Everything here is either immutable after startup or internally
/// synchronized, so sessions never lock it as a whole.
pub(crate) struct GatewayState<D> {
    pub(crate) config: GatewayConfig,
    pub(crate) registry: Arc<ConnectorRegistry>,
    pub(crate) translators: TranslatorRegistry,
    pub(crate) downstream: Arc<D>,
    next_session: AtomicU64,
}

impl<D> GatewayState<D> {
    pub(crate) fn new(
        config: GatewayConfig,
        registry: Arc<ConnectorRegistry>,
        translators: TranslatorRegistry,
        downstream: Arc<D>,
    ) -> Self {
        Self {
            config,
            registry,
            translators,
            downstream,
            next_session: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_session_id(&self) -> SessionId {
        SessionId(self.next_session.fetch_add(1, Ordering::Relaxed))
    }
}

/// Builder for configuring and starting a gateway.
///
/// # Example
///
/// ```rust,no_run
/// use crossplay::{Gateway, GatewayConfig};
///
/// # async fn start() -> Result<(), crossplay::GatewayError> {
/// let gateway = Gateway::builder()
///     .config(GatewayConfig::default())
///     .build()
///     .await?;
/// gateway.run().await
/// # }
/// ```
pub struct GatewayBuilder<I = OfflineIdentity> {
    config: GatewayConfig,
    identity: I,
    mappings: Arc<dyn MappingTables>,
}

impl GatewayBuilder {
    /// Creates a builder with default config, offline identity and no
    /// mapping tables.
    pub fn new() -> Self {
        Self {
            config: GatewayConfig::default(),
            identity: OfflineIdentity,
            mappings: Arc::new(EmptyMappings),
        }
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: IdentityService> GatewayBuilder<I> {
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the client-facing listen address.
    pub fn bind(mut self, address: impl Into<String>, port: u16) -> Self {
        self.config.bedrock.address = address.into();
        self.config.bedrock.port = port;
        self
    }

    /// Overrides the backend address.
    pub fn remote(mut self, addr: SocketAddr) -> Self {
        self.config.remote.address = addr.ip().to_string();
        self.config.remote.port = addr.port();
        self
    }

    /// Sets the identity service used in online mode.
    pub fn identity<J: IdentityService>(self, identity: J) -> GatewayBuilder<J> {
        GatewayBuilder {
            config: self.config,
            identity,
            mappings: self.mappings,
        }
    }

    pub fn mappings(mut self, mappings: Arc<dyn MappingTables>) -> Self {
        self.mappings = mappings;
        self
    }

    /// Binds the listener and starts the status refresher.
    pub async fn build(self) -> Result<Gateway<I>, GatewayError> {
        let config = self.config.validated();
        let registry = ConnectorRegistry::new();

        let responder = Arc::new(PingResponder::new(
            config.bedrock.clone(),
            config.ping.clone(),
            Arc::clone(&registry),
        ));
        let query: Arc<dyn QueryHandler> = responder.clone();
        let transport =
            DatagramTransport::bind(&config.bedrock.bind_addr(), config.bedrock.mtu, query).await?;
        let local_addr = transport.local_addr();
        responder.set_port(local_addr.port());

        let downstream = Arc::new(
            TcpDownstream::new(config.remote.clone(), self.identity)
                .with_probe_timeout(config.ping.probe_timeout),
        );
        let refresh = spawn_refresh(
            Arc::clone(&downstream),
            Arc::clone(&registry),
            config.ping.refresh_interval,
        );

        tracing::info!(
            %local_addr,
            remote = %format_args!("{}:{}", config.remote.address, config.remote.port),
            auth = ?config.remote.auth,
            "gateway bound"
        );

        let translators = TranslatorRegistry::with_defaults(self.mappings);
        let state = Arc::new(GatewayState::new(config, registry, translators, downstream));
        Ok(Gateway {
            state,
            transport: Mutex::new(transport),
            local_addr,
            responder,
            refresh,
        })
    }
}

/// A bound gateway.
///
/// Call [`run()`](Self::run) to start accepting clients and
/// [`shutdown()`](Self::shutdown) to stop.
pub struct Gateway<I = OfflineIdentity> {
    state: Arc<GatewayState<TcpDownstream<I>>>,
    transport: Mutex<DatagramTransport>,
    local_addr: SocketAddr,
    responder: Arc<PingResponder>,
    refresh: JoinHandle<()>,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }
}

impl<I: IdentityService> Gateway<I> {
    /// Returns the address clients connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The live session registry.
    pub fn registry(&self) -> &Arc<ConnectorRegistry> {
        &self.state.registry
    }

    pub fn responder(&self) -> &PingResponder {
        &self.responder
    }

    pub fn translation_stats(&self) -> TranslateStats {
        self.state.translators.stats()
    }

    /// Runs the accept loop.
    ///
    /// Spawns one task per accepted client. Returns once
    /// [`shutdown()`](Self::shutdown) begins.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let mut transport = self.transport.lock().await;
        tracing::info!(local_addr = %self.local_addr, "gateway running");

        loop {
            tokio::select! {
                biased;
                () = self.state.registry.wait_shutdown() => break,
                accepted = transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(handle_connection(conn, state));
                    }
                    Err(TransportError::Shutdown) => break,
                    Err(e) => tracing::error!(error = %e, "accept failed"),
                },
            }
        }
        tracing::info!("accept loop stopped");
        Ok(())
    }

    /// Closes every session, waits for them to deregister, then closes
    /// the listener. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<(), GatewayError> {
        self.state.registry.shutdown().await;
        let transport = self.transport.lock().await;
        transport.shutdown().await?;
        Ok(())
    }
}

impl<I> Drop for Gateway<I> {
    fn drop(&mut self) {
        self.refresh.abort();
    }
}
