//! The downstream connector: opens a session's backend link.
//!
//! ```text
//! connect ──→ Handshake(login) ──→ LoginStart
//!        ←── LoginChallenge?  ──→ LoginChallengeResponse   (online mode)
//!        ←── SetCompression?      applied before the next frame
//!        ←── LoginSuccess         link ready for play packets
//! ```
//!
//! Attempts are never retried here; a failed link fails the session.

use std::future::Future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crossplay_protocol::BackendStatus;
use crossplay_protocol::edition_b::status::StatusJson;
use crossplay_protocol::edition_b::{self, NextState, PROTOCOL_VERSION};
use crossplay_session::{AuthData, IdentityService, OfflineIdentity, offline_uuid};
use crossplay_transport::{Connection, StreamConnection};

use crate::config::{AuthMode, RemoteConfig};
use crate::error::DownstreamError;
use crate::link::{recv_packet, send_packet};

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens backend links on behalf of sessions.
pub trait Downstream: Send + Sync + 'static {
    type Connection: Connection;

    /// Opens a logged-in backend link for the player in `auth`.
    fn connect(
        &self,
        auth: &AuthData,
    ) -> impl Future<Output = Result<Self::Connection, DownstreamError>> + Send;
}

/// The TCP connector for the backend edition.
///
/// In online mode the player is verified through the identity service and
/// the login challenge is answered, but the link itself stays plaintext:
/// no encryption is negotiated.
#[derive(Debug)]
pub struct TcpDownstream<I = OfflineIdentity> {
    remote: RemoteConfig,
    identity: I,
    probe_timeout: Duration,
}

impl<I: IdentityService> TcpDownstream<I> {
    pub fn new(remote: RemoteConfig, identity: I) -> Self {
        Self {
            remote,
            identity,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Bounds the whole status exchange in [`probe_status`](Self::probe_status).
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn remote(&self) -> &RemoteConfig {
        &self.remote
    }

    async fn resolve(&self) -> Result<SocketAddr, DownstreamError> {
        let host = (self.remote.address.as_str(), self.remote.port);
        tokio::net::lookup_host(host)
            .await
            .map_err(|e| DownstreamError::Unreachable(format!("{}: {e}", self.remote.address)))?
            .next()
            .ok_or_else(|| {
                DownstreamError::Unreachable(format!("no address for {}", self.remote.address))
            })
    }

    /// Connects and sends the handshake choosing `next`.
    async fn open(&self, next: NextState) -> Result<StreamConnection, DownstreamError> {
        let addr = self.resolve().await?;
        let conn = StreamConnection::connect(addr)
            .await
            .map_err(|e| DownstreamError::Unreachable(format!("{addr}: {e}")))?;
        send_packet::<_, _, DownstreamError>(
            &conn,
            &edition_b::Packet::Handshake {
                protocol_version: PROTOCOL_VERSION,
                server_address: self.remote.address.clone(),
                server_port: self.remote.port,
                next_state: next,
            },
        )
        .await?;
        Ok(conn)
    }

    async fn login(&self, conn: &StreamConnection, auth: &AuthData) -> Result<(), DownstreamError> {
        let uuid = match self.remote.auth {
            AuthMode::Offline => Some(offline_uuid(&auth.username)),
            AuthMode::Online => None,
        };
        send_packet::<_, _, DownstreamError>(
            conn,
            &edition_b::Packet::LoginStart {
                username: auth.username.clone(),
                uuid,
            },
        )
        .await?;

        loop {
            let packet = recv_packet::<_, edition_b::Packet, DownstreamError>(conn)
                .await?
                .ok_or_else(|| DownstreamError::Rejected("connection closed during login".into()))?;
            match packet {
                edition_b::Packet::LoginChallenge {
                    server_id,
                    verify_token,
                } => {
                    if self.remote.auth == AuthMode::Offline {
                        return Err(DownstreamError::ProtocolMismatch(
                            "backend requires online authentication".into(),
                        ));
                    }
                    let profile = self.identity.verify(&auth.username, &auth.token).await?;
                    tracing::debug!(username = %profile.name, %server_id, "identity verified");
                    send_packet::<_, _, DownstreamError>(
                        conn,
                        &edition_b::Packet::LoginChallengeResponse {
                            verify_token,
                            session_token: auth.token.clone(),
                        },
                    )
                    .await?;
                }
                edition_b::Packet::SetCompression { threshold } => {
                    // Negative disables compression.
                    conn.set_compression_threshold(usize::try_from(threshold).ok());
                }
                edition_b::Packet::LoginSuccess { uuid, username } => {
                    tracing::debug!(%username, %uuid, "backend login complete");
                    return Ok(());
                }
                edition_b::Packet::LoginDisconnect { reason } => {
                    return Err(DownstreamError::Rejected(reason.plain()));
                }
                other => {
                    return Err(DownstreamError::ProtocolMismatch(format!(
                        "unexpected {:?} during login",
                        other.kind()
                    )));
                }
            }
        }
    }

    /// Asks the backend for its status and measures the round trip.
    ///
    /// Opens a fresh connection each time and never takes longer than
    /// the probe timeout.
    pub async fn probe_status(&self) -> Result<BackendStatus, DownstreamError> {
        tokio::time::timeout(self.probe_timeout, self.exchange_status())
            .await
            .map_err(|_| DownstreamError::Timeout(self.probe_timeout))?
    }

    async fn exchange_status(&self) -> Result<BackendStatus, DownstreamError> {
        let conn = self.open(NextState::Status).await?;
        let result = read_status(&conn).await;
        let _ = conn.close().await;
        result
    }
}

async fn read_status(conn: &StreamConnection) -> Result<BackendStatus, DownstreamError> {
    send_packet::<_, _, DownstreamError>(conn, &edition_b::Packet::StatusRequest).await?;
    let json = match recv_packet::<_, edition_b::Packet, DownstreamError>(conn).await? {
        Some(edition_b::Packet::StatusResponse { json }) => json,
        Some(other) => {
            return Err(DownstreamError::ProtocolMismatch(format!(
                "expected status response, got {:?}",
                other.kind()
            )));
        }
        None => return Err(DownstreamError::Rejected("closed during status".into())),
    };
    let status = StatusJson::parse(&json)?;

    let payload: i64 = rand::random();
    let sent = Instant::now();
    send_packet::<_, _, DownstreamError>(conn, &edition_b::Packet::PingRequest { payload }).await?;
    // A backend that answers status but not ping still has a status.
    let latency_ms = match recv_packet::<_, edition_b::Packet, DownstreamError>(conn).await {
        Ok(Some(edition_b::Packet::PongResponse { payload: echoed })) if echoed == payload => {
            Some(sent.elapsed().as_millis() as u64)
        }
        _ => None,
    };

    Ok(BackendStatus {
        motd: status.description.text().to_string(),
        online_players: status.players.online,
        max_players: status.players.max,
        version_name: status.version.name,
        protocol: status.version.protocol,
        latency_ms,
    })
}

impl<I: IdentityService> Downstream for TcpDownstream<I> {
    type Connection = StreamConnection;

    async fn connect(&self, auth: &AuthData) -> Result<StreamConnection, DownstreamError> {
        let conn = self.open(NextState::Login).await?;
        if let Err(e) = self.login(&conn, auth).await {
            let _ = conn.close().await;
            return Err(e);
        }
        tracing::info!(
            username = %auth.username,
            backend = %conn.peer_addr(),
            "backend link open"
        );
        Ok(conn)
    }
}
