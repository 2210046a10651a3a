//! Per-client session engine.
//!
//! Each accepted client gets its own Tokio task running [`handle_connection`].
//! The flow is:
//!   1. Network settings → pick the codec version, enable compression
//!   2. Login and client data, in either order → offer (empty) packs
//!   3. Pack answer → open the backend link
//!   4. Register, then translate both ways until either side ends
//!   5. Close: tell the client why, close both links, deregister
//!
//! Every way out of steps 1 to 4 is a [`GatewayError`]; the task has one
//! exit path, so teardown runs exactly once.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use crossplay_protocol::edition_a::{
    self, DEFAULT_VERSION, PackResponse, PlayStatus, SUPPORTED_VERSIONS, select_version,
};
use crossplay_protocol::{BincodeCodec, Codec, edition_b};
use crossplay_session::{
    AuthData, ClientData, Registration, SessionCommand, SessionContext, SessionError,
    SessionHandle, SessionState,
};
use crossplay_transport::Connection;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use crate::GatewayError;
use crate::downstream::Downstream;
use crate::error::DownstreamError;
use crate::link::{recv_packet, send_packet};
use crate::server::GatewayState;

/// Commands queued per session before senders wait.
const COMMAND_BACKLOG: usize = 32;

/// Chunk radius asked for when the client data carries none.
const DEFAULT_CHUNK_RADIUS: i32 = 8;

const BACKEND_CLOSED: &str = "Connection to the server was closed";

/// Runs one client from accept to close and returns why it ended.
pub(crate) async fn handle_connection<C, D>(conn: C, gateway: Arc<GatewayState<D>>) -> GatewayError
where
    C: Connection,
    D: Downstream,
{
    let id = gateway.next_session_id();
    let addr = conn.peer_addr();
    tracing::debug!(session_id = %id, %addr, conn_id = %conn.id(), "client connected");

    let (state, _) = watch::channel(SessionState::Connecting);
    let session = Session {
        ctx: SessionContext::new(id),
        inbound: conn,
        addr,
        gateway,
        state,
    };
    session.run().await
}

struct Session<C, D: Downstream> {
    ctx: SessionContext,
    inbound: C,
    addr: SocketAddr,
    gateway: Arc<GatewayState<D>>,
    state: watch::Sender<SessionState>,
}

impl<C: Connection, D: Downstream> Session<C, D> {
    async fn run(self) -> GatewayError {
        let mut backend = None;
        let mut registration = None;

        let Err(end) = self.drive(&mut backend, &mut registration).await;

        self.close(&end, backend.take()).await;
        // Dropping the registration deregisters, once.
        drop(registration);
        self.transition(SessionState::Closed);

        let reason = end.disconnect_reason();
        let username = self.ctx.username().unwrap_or("-");
        if end.is_orderly() {
            tracing::info!(
                session_id = %self.ctx.id(),
                %username,
                category = ?reason.category,
                "session closed: {end}"
            );
        } else {
            tracing::warn!(
                session_id = %self.ctx.id(),
                %username,
                addr = %self.addr,
                category = ?reason.category,
                "session failed: {end}"
            );
        }
        end
    }

    fn current(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Moves forward if the lifecycle allows it; otherwise stays put.
    fn transition(&self, to: SessionState) {
        let id = self.ctx.id();
        self.state.send_if_modified(|current| {
            if !current.can_transition_to(to) {
                return false;
            }
            tracing::debug!(session_id = %id, from = %current, %to, "session state");
            *current = to;
            true
        });
    }

    async fn drive(
        &self,
        backend: &mut Option<D::Connection>,
        registration: &mut Option<Registration>,
    ) -> Result<Infallible, GatewayError> {
        // --- Step 1-3: Client handshake ---
        self.transition(SessionState::AwaitingAuth);
        let limit = self.gateway.config.session.handshake_timeout;
        timeout(limit, self.login())
            .await
            .map_err(|_| GatewayError::HandshakeTimeout(limit))??;

        let link = backend.insert(self.link().await?);
        self.transition(SessionState::Established);

        // --- Step 4: Register and forward ---
        let (commands_tx, mut commands_rx) = mpsc::channel(COMMAND_BACKLOG);
        let username = self.ctx.username().unwrap_or_default();
        let handle = SessionHandle::new(
            self.ctx.id(),
            username,
            self.addr,
            self.state.subscribe(),
            commands_tx,
        );
        let registered = self.gateway.registry.register(handle).map_err(|e| match e {
            SessionError::ShuttingDown => GatewayError::ShuttingDown,
            e => e.into(),
        })?;
        *registration = Some(registered);
        tracing::info!(
            session_id = %self.ctx.id(),
            %username,
            addr = %self.addr,
            "session established"
        );

        let radius = self
            .ctx
            .client_data()
            .and_then(|d| d.view_distance)
            .unwrap_or(DEFAULT_CHUNK_RADIUS);
        let settings = edition_a::Packet::RequestChunkRadius { radius };
        for packet in self.gateway.translators.dispatch(&settings, &self.ctx) {
            self.send_backend(link, &packet).await?;
        }

        self.forward(link, &mut commands_rx).await
    }

    /// Runs the client handshake until linking may start.
    async fn login(&self) -> Result<(), GatewayError> {
        loop {
            let packet = tokio::select! {
                biased;
                () = self.gateway.registry.wait_shutdown() => return Err(GatewayError::ShuttingDown),
                packet = self.recv_client() => packet?,
            };
            if self.on_login_packet(packet).await? {
                return Ok(());
            }
        }
    }

    /// Handles one handshake packet. Returns `true` once linking may start.
    async fn on_login_packet(&self, packet: edition_a::Packet) -> Result<bool, GatewayError> {
        use edition_a::Packet;

        match packet {
            Packet::RequestNetworkSettings { protocol_version } => {
                if self.ctx.codec_version().is_some() {
                    tracing::debug!(session_id = %self.ctx.id(), "repeated network settings request");
                    return Ok(false);
                }
                let Some(version) = select_version(protocol_version) else {
                    let status = if protocol_version < SUPPORTED_VERSIONS[0].protocol {
                        PlayStatus::FailedClient
                    } else {
                        PlayStatus::FailedServer
                    };
                    self.send_client(&Packet::PlayStatus { status }).await?;
                    return Err(GatewayError::UnsupportedVersion(protocol_version));
                };
                self.ctx.set_codec_version(version)?;

                let threshold = self.gateway.config.bedrock.compression_threshold;
                self.send_client(&Packet::NetworkSettings {
                    compression_threshold: threshold,
                })
                .await?;
                // The settings reply itself goes out uncompressed.
                self.inbound.set_compression_threshold(Some(usize::from(threshold)));
                tracing::debug!(session_id = %self.ctx.id(), version = version.name, "codec selected");
                Ok(false)
            }
            Packet::Login {
                protocol_version,
                username,
                uuid,
                xuid,
                token,
            } => {
                let version = self
                    .ctx
                    .codec_version()
                    .ok_or(GatewayError::Handshake("login before network settings"))?;
                if protocol_version != version.protocol {
                    return Err(GatewayError::Handshake("login protocol differs from network settings"));
                }
                let auth = AuthData {
                    username,
                    uuid,
                    xuid,
                    token,
                };
                auth.validate()?;
                self.ctx.set_auth(auth)?;
                self.maybe_offer_packs().await?;
                Ok(false)
            }
            Packet::ClientData { payload } => {
                if self.ctx.codec_version().is_none() {
                    return Err(GatewayError::Handshake("client data before network settings"));
                }
                self.ctx.set_client_data(ClientData::parse(&payload)?)?;
                self.maybe_offer_packs().await?;
                Ok(false)
            }
            Packet::ResourcePackClientResponse { status } => {
                if self.current() != SessionState::AwaitingHandshakeAck {
                    tracing::debug!(session_id = %self.ctx.id(), "pack answer before offer dropped");
                    return Ok(false);
                }
                if status == PackResponse::Failed {
                    return Err(GatewayError::PacksRefused);
                }
                let game_version = self.ctx.codec_version().unwrap_or(DEFAULT_VERSION).name;
                self.send_client(&Packet::ResourcePackStack {
                    must_accept: false,
                    packs: Vec::new(),
                    game_version: game_version.to_string(),
                })
                .await?;
                self.transition(SessionState::LinkingDownstream);
                Ok(true)
            }
            other => {
                self.on_gated(other).await?;
                Ok(false)
            }
        }
    }

    /// Offers packs once both login pieces are in.
    async fn maybe_offer_packs(&self) -> Result<(), GatewayError> {
        if self.current() != SessionState::AwaitingAuth || !self.ctx.is_authenticated() {
            return Ok(());
        }
        self.send_client(&edition_a::Packet::PlayStatus {
            status: PlayStatus::LoginSuccess,
        })
        .await?;
        self.send_client(&edition_a::Packet::ResourcePacksInfo {
            must_accept: false,
            packs: Vec::new(),
        })
        .await?;
        self.transition(SessionState::AwaitingHandshakeAck);
        Ok(())
    }

    /// Handles a packet that arrived before the session is established.
    ///
    /// Latency probes are answered here; the backend never sees anything
    /// from an unlinked client.
    async fn on_gated(&self, packet: edition_a::Packet) -> Result<(), GatewayError> {
        match packet {
            edition_a::Packet::NetworkStackLatency {
                timestamp,
                needs_response: true,
            } => {
                self.send_client(&edition_a::Packet::NetworkStackLatency {
                    timestamp,
                    needs_response: false,
                })
                .await
            }
            edition_a::Packet::Disconnect { .. } => Err(GatewayError::ClientQuit),
            other => {
                tracing::debug!(
                    session_id = %self.ctx.id(),
                    kind = ?other.kind(),
                    state = %self.current(),
                    "dropped before link"
                );
                Ok(())
            }
        }
    }

    /// Opens the backend link while still serving the client.
    async fn link(&self) -> Result<D::Connection, GatewayError> {
        let auth = self
            .ctx
            .auth()
            .ok_or(GatewayError::Handshake("linking without login"))?;
        let limit = self.gateway.config.session.linking_timeout;

        let connect = self.gateway.downstream.connect(auth);
        let deadline = tokio::time::sleep(limit);
        tokio::pin!(connect, deadline);

        loop {
            tokio::select! {
                biased;
                () = self.gateway.registry.wait_shutdown() => return Err(GatewayError::ShuttingDown),
                linked = &mut connect => return Ok(linked?),
                () = &mut deadline => return Err(DownstreamError::Timeout(limit).into()),
                packet = self.recv_client() => self.on_gated(packet?).await?,
            }
        }
    }

    async fn forward(
        &self,
        backend: &D::Connection,
        commands: &mut mpsc::Receiver<SessionCommand>,
    ) -> Result<Infallible, GatewayError> {
        tokio::select! {
            () = self.gateway.registry.wait_shutdown() => Err(GatewayError::ShuttingDown),
            end = self.run_commands(commands) => end,
            end = self.pump_upstream(backend) => end,
            end = self.pump_downstream(backend) => end,
        }
    }

    async fn run_commands(
        &self,
        commands: &mut mpsc::Receiver<SessionCommand>,
    ) -> Result<Infallible, GatewayError> {
        while let Some(command) = commands.recv().await {
            match command {
                SessionCommand::Close(reason) => return Err(GatewayError::Kicked(reason)),
                SessionCommand::SendMessage(text) => {
                    self.send_client(&edition_a::Packet::system_text(text)).await?;
                }
            }
        }
        // Every handle is gone; nothing more can arrive.
        std::future::pending().await
    }

    /// Client → backend.
    async fn pump_upstream(&self, backend: &D::Connection) -> Result<Infallible, GatewayError> {
        let idle = self.gateway.config.session.idle_timeout;
        loop {
            let packet = timeout(idle, self.recv_client())
                .await
                .map_err(|_| GatewayError::IdleTimeout(idle))??;
            if matches!(packet, edition_a::Packet::Disconnect { .. }) {
                return Err(GatewayError::ClientQuit);
            }
            for out in self.gateway.translators.dispatch(&packet, &self.ctx) {
                self.send_backend(backend, &out).await?;
            }
        }
    }

    /// Backend → client.
    async fn pump_downstream(&self, backend: &D::Connection) -> Result<Infallible, GatewayError> {
        loop {
            let packet = self.recv_backend(backend).await?;
            if let edition_b::Packet::Disconnect { reason } = &packet {
                return Err(GatewayError::BackendClosed(reason.to_legacy()));
            }
            for out in self.gateway.translators.dispatch(&packet, &self.ctx) {
                self.send_client(&out).await?;
            }
        }
    }

    async fn close(&self, end: &GatewayError, backend: Option<D::Connection>) {
        self.transition(SessionState::Closing);
        let id = self.ctx.id();

        if end.client_reachable() {
            let reason = end.disconnect_reason();
            if let Err(e) = self.send_client(&edition_a::Packet::disconnect(reason.message)).await {
                tracing::debug!(session_id = %id, error = %e, "disconnect not delivered");
            }
        }
        if let Err(e) = self.inbound.close().await {
            tracing::debug!(session_id = %id, error = %e, "client close failed");
        }
        if let Some(backend) = backend {
            if let Err(e) = backend.close().await {
                tracing::debug!(session_id = %id, error = %e, "backend close failed");
            }
        }
    }

    // -- Link helpers --

    async fn recv_client(&self) -> Result<edition_a::Packet, GatewayError> {
        recv_packet::<_, edition_a::Packet, GatewayError>(&self.inbound)
            .await?
            .ok_or(GatewayError::ClientQuit)
    }

    async fn send_client(&self, packet: &edition_a::Packet) -> Result<(), GatewayError> {
        send_packet::<_, _, GatewayError>(&self.inbound, packet).await
    }

    async fn recv_backend(&self, backend: &D::Connection) -> Result<edition_b::Packet, GatewayError> {
        match backend.recv().await.map_err(GatewayError::BackendLink)? {
            Some(bytes) => Ok(BincodeCodec.decode(&bytes)?),
            None => Err(GatewayError::BackendClosed(BACKEND_CLOSED.to_string())),
        }
    }

    async fn send_backend(
        &self,
        backend: &D::Connection,
        packet: &edition_b::Packet,
    ) -> Result<(), GatewayError> {
        let bytes = BincodeCodec.encode(packet)?;
        backend.send(&bytes).await.map_err(GatewayError::BackendLink)
    }
}
