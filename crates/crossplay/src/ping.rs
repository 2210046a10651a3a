//! Discovery replies mirrored from the backend.
//!
//! The datagram socket pump calls [`PingResponder::on_query`] inline, so
//! it only ever reads the registry's cached [`BackendStatus`]. A separate
//! task ([`spawn_refresh`]) keeps that cache fresh and leaves the last
//! good value in place when a probe fails.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use crossplay_protocol::edition_a::{DEFAULT_VERSION, GameMode};
use crossplay_protocol::{Advertisement, BackendStatus};
use crossplay_session::{ConnectorRegistry, IdentityService};
use crossplay_transport::QueryHandler;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{ListenerConfig, PingConfig};
use crate::downstream::TcpDownstream;
use crate::error::DownstreamError;

const EDITION_LABEL: &str = "MCPE";

/// Anything that can report the backend's status.
pub trait StatusSource: Send + Sync + 'static {
    fn probe(&self) -> impl Future<Output = Result<BackendStatus, DownstreamError>> + Send;
}

impl<I: IdentityService> StatusSource for TcpDownstream<I> {
    async fn probe(&self) -> Result<BackendStatus, DownstreamError> {
        self.probe_status().await
    }
}

/// Answers discovery probes from the cached status.
#[derive(Debug)]
pub struct PingResponder {
    listener: ListenerConfig,
    ping: PingConfig,
    registry: Arc<ConnectorRegistry>,
    guid: u64,
    port: AtomicU16,
}

impl PingResponder {
    pub fn new(listener: ListenerConfig, ping: PingConfig, registry: Arc<ConnectorRegistry>) -> Self {
        let port = AtomicU16::new(listener.port);
        Self {
            listener,
            ping,
            registry,
            guid: rand::random(),
            port,
        }
    }

    /// Sets the advertised port once the socket is bound.
    pub fn set_port(&self, port: u16) {
        self.port.store(port, Ordering::Relaxed);
    }

    /// Builds the reply for the current moment.
    pub fn advertisement(&self) -> Advertisement {
        let status = self.registry.cached_status();

        let (motd, sub_motd) = match status.as_ref().filter(|_| self.ping.passthrough_motd) {
            Some(status) => {
                // A two-line backend MOTD fills both advertised lines.
                let mut lines = status.motd.lines();
                let first = lines.next().unwrap_or_default().to_string();
                let second = lines
                    .next()
                    .map(str::to_string)
                    .unwrap_or_else(|| self.listener.sub_motd.clone());
                (first, second)
            }
            None => (self.listener.motd.clone(), self.listener.sub_motd.clone()),
        };

        let (online_players, max_players) =
            match status.as_ref().filter(|_| self.ping.passthrough_player_counts) {
                Some(status) => (status.online_players, status.max_players),
                None => (self.registry.len() as u32, self.listener.max_players),
            };

        let port = self.port.load(Ordering::Relaxed);
        Advertisement {
            edition: EDITION_LABEL.to_string(),
            motd,
            protocol: DEFAULT_VERSION.protocol,
            version: DEFAULT_VERSION.name.to_string(),
            online_players,
            max_players,
            server_guid: self.guid,
            sub_motd,
            game_mode: GameMode::Survival.label().to_string(),
            port_v4: port,
            port_v6: port,
        }
    }
}

impl QueryHandler for PingResponder {
    fn on_query(&self, addr: SocketAddr) -> Option<String> {
        if self.registry.is_shutting_down() {
            return None;
        }
        tracing::trace!(%addr, "discovery probe");
        Some(self.advertisement().encode())
    }
}

/// Probes `source` every `interval` and stores the result in the registry.
///
/// Failures keep the previous status. The task ends when the registry
/// starts shutting down.
pub fn spawn_refresh<S: StatusSource>(
    source: Arc<S>,
    registry: Arc<ConnectorRegistry>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failing = false;

        loop {
            tokio::select! {
                biased;
                () = registry.wait_shutdown() => break,
                _ = ticker.tick() => {}
            }
            match source.probe().await {
                Ok(status) => {
                    if failing {
                        tracing::info!("backend status probe recovered");
                        failing = false;
                    }
                    registry.update_status(status);
                }
                Err(e) if !failing => {
                    tracing::warn!(error = %e, "backend status probe failed, keeping last status");
                    failing = true;
                }
                Err(e) => tracing::debug!(error = %e, "backend status probe still failing"),
            }
        }
        tracing::debug!("status refresh stopped");
    })
}
