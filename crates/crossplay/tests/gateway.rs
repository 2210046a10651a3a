//! Integration tests: a datagram client through the gateway to a scripted
//! stream backend, over real loopback sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crossplay::prelude::*;
use crossplay_protocol::edition_a::{self, DEFAULT_VERSION, PackResponse, PlayStatus, TextKind};
use crossplay_protocol::edition_b::status::{StatusDescription, StatusJson, StatusPlayers, StatusVersion};
use crossplay_protocol::edition_b::{self, ChatPosition, NextState, PROTOCOL_VERSION};
use crossplay_protocol::{Advertisement, BincodeCodec, Codec, TextComponent};
use crossplay_transport::{
    Connection, DatagramClient, DatagramConnection, StreamConnection, StreamTransport, Transport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

// =========================================================================
// Scripted backend
// =========================================================================

struct Backend {
    addr: SocketAddr,
    /// Logged-in play links, in login order.
    logins: mpsc::UnboundedReceiver<StreamConnection>,
}

impl Backend {
    async fn next_login(&mut self) -> StreamConnection {
        tokio::time::timeout(WAIT, self.logins.recv())
            .await
            .expect("no login reached the backend")
            .expect("backend stopped")
    }
}

async fn recv_b(conn: &StreamConnection) -> Option<edition_b::Packet> {
    let bytes = conn.recv().await.ok()??;
    BincodeCodec.decode(&bytes).ok()
}

async fn send_b(conn: &StreamConnection, packet: &edition_b::Packet) {
    let _ = conn.send(&BincodeCodec.encode(packet).unwrap()).await;
}

fn status_json() -> String {
    StatusJson {
        version: StatusVersion {
            name: "1.21.1".into(),
            protocol: PROTOCOL_VERSION,
        },
        players: StatusPlayers { max: 101, online: 1 },
        description: StatusDescription::Plain("Test.".into()),
    }
    .to_json()
    .unwrap()
}

async fn serve_status(conn: StreamConnection) {
    while let Some(packet) = recv_b(&conn).await {
        let reply = match packet {
            edition_b::Packet::StatusRequest => edition_b::Packet::StatusResponse { json: status_json() },
            edition_b::Packet::PingRequest { payload } => edition_b::Packet::PongResponse { payload },
            _ => return,
        };
        send_b(&conn, &reply).await;
    }
}

async fn serve_login(conn: StreamConnection, logins: mpsc::UnboundedSender<StreamConnection>) {
    let Some(edition_b::Packet::LoginStart { username, uuid }) = recv_b(&conn).await else {
        return;
    };
    send_b(&conn, &edition_b::Packet::SetCompression { threshold: 64 }).await;
    conn.set_compression_threshold(Some(64));
    send_b(&conn, &edition_b::Packet::LoginSuccess {
        uuid: uuid.unwrap_or_else(Uuid::nil),
        username,
    })
    .await;
    let _ = logins.send(conn);
}

async fn start_backend() -> Backend {
    let mut transport = StreamTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap();
    let (tx, logins) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok(conn) = transport.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                match recv_b(&conn).await {
                    Some(edition_b::Packet::Handshake {
                        next_state: NextState::Status,
                        ..
                    }) => serve_status(conn).await,
                    Some(edition_b::Packet::Handshake {
                        next_state: NextState::Login,
                        ..
                    }) => serve_login(conn, tx).await,
                    _ => {}
                }
            });
        }
    });

    Backend { addr, logins }
}

/// An address nothing listens on.
async fn dead_backend() -> SocketAddr {
    let transport = StreamTransport::bind("127.0.0.1:0").await.unwrap();
    transport.local_addr().unwrap()
}

// =========================================================================
// Gateway and client helpers
// =========================================================================

async fn start_gateway(remote: SocketAddr) -> (Arc<Gateway>, JoinHandle<Result<(), GatewayError>>) {
    let mut config = GatewayConfig::default();
    config.ping.refresh_interval = Duration::from_millis(100);
    let gateway = Gateway::builder()
        .config(config)
        .bind("127.0.0.1", 0)
        .remote(remote)
        .build()
        .await
        .unwrap();
    let gateway = Arc::new(gateway);
    let runner = Arc::clone(&gateway);
    let task = tokio::spawn(async move { runner.run().await });
    (gateway, task)
}

struct Client {
    conn: DatagramConnection,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        Self {
            conn: DatagramClient::connect(addr).await.unwrap(),
        }
    }

    async fn send(&self, packet: &edition_a::Packet) {
        self.conn
            .send(&BincodeCodec.encode(packet).unwrap())
            .await
            .unwrap();
    }

    async fn recv(&self) -> edition_a::Packet {
        let bytes = tokio::time::timeout(WAIT, self.conn.recv())
            .await
            .expect("client timed out")
            .unwrap()
            .expect("link closed");
        BincodeCodec.decode(&bytes).unwrap()
    }

    /// Runs the client handshake through the pack answer.
    async fn join(addr: SocketAddr, username: &str) -> Self {
        let client = Self::connect(addr).await;
        client
            .send(&edition_a::Packet::RequestNetworkSettings {
                protocol_version: DEFAULT_VERSION.protocol,
            })
            .await;
        let edition_a::Packet::NetworkSettings {
            compression_threshold,
        } = client.recv().await
        else {
            panic!("expected NetworkSettings");
        };
        client
            .conn
            .set_compression_threshold(Some(usize::from(compression_threshold)));

        client
            .send(&edition_a::Packet::Login {
                protocol_version: DEFAULT_VERSION.protocol,
                username: username.into(),
                uuid: Uuid::new_v4(),
                xuid: "2535".into(),
                token: "tok".into(),
            })
            .await;
        client
            .send(&edition_a::Packet::ClientData {
                payload: r#"{"LanguageCode":"en_US","ViewDistance":12}"#.into(),
            })
            .await;
        assert_eq!(client.recv().await, edition_a::Packet::PlayStatus {
            status: PlayStatus::LoginSuccess
        });
        assert!(matches!(
            client.recv().await,
            edition_a::Packet::ResourcePacksInfo { .. }
        ));

        client
            .send(&edition_a::Packet::ResourcePackClientResponse {
                status: PackResponse::Completed,
            })
            .await;
        assert!(matches!(
            client.recv().await,
            edition_a::Packet::ResourcePackStack { .. }
        ));
        client
    }
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_chat_round_trip() {
    let mut backend = start_backend().await;
    let (gateway, _run) = start_gateway(backend.addr).await;

    let client = Client::join(gateway.local_addr(), "Test").await;
    let link = backend.next_login().await;

    // The gateway sends the client's settings first.
    match recv_b(&link).await {
        Some(edition_b::Packet::ClientSettings { locale, view_distance, .. }) => {
            assert_eq!(locale, "en_us");
            assert_eq!(view_distance, 12);
        }
        other => panic!("expected ClientSettings, got {other:?}"),
    }

    client
        .send(&edition_a::Packet::Text {
            kind: TextKind::Chat,
            source: "Test".into(),
            message: "hello backend".into(),
        })
        .await;
    assert_eq!(
        recv_b(&link).await,
        Some(edition_b::Packet::ClientChat {
            message: "hello backend".into()
        })
    );

    send_b(&link, &edition_b::Packet::ChatMessage {
        message: TextComponent::new("Test"),
        sender: Some("Test".into()),
        position: ChatPosition::Chat,
    })
    .await;
    match client.recv().await {
        edition_a::Packet::Text { kind, message, .. } => {
            assert_eq!(kind, TextKind::Chat);
            assert_eq!(message, "Test: Test");
        }
        other => panic!("expected Text, got {other:?}"),
    }

    assert_eq!(gateway.registry().len(), 1);
    assert!(gateway.registry().find_by_name("Test").is_some());
    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_ping_mirrors_backend_status() {
    let backend = start_backend().await;
    let (gateway, _run) = start_gateway(backend.addr).await;

    wait_until("status cache", || gateway.registry().cached_status().is_some()).await;
    let reply = DatagramClient::ping(gateway.local_addr(), WAIT).await.unwrap();
    let ad = Advertisement::parse(&reply).unwrap();
    assert_eq!(ad.motd, "Test.");
    assert_eq!(ad.online_players, 1);
    assert_eq!(ad.max_players, 101);
    assert_eq!(ad.protocol, DEFAULT_VERSION.protocol);
    assert_eq!(ad.port_v4, gateway.local_addr().port());

    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_sessions_register_exactly_once() {
    const PLAYERS: usize = 8;
    let backend = start_backend().await;
    let (gateway, _run) = start_gateway(backend.addr).await;
    let addr = gateway.local_addr();

    let joins: Vec<_> = (0..PLAYERS)
        .map(|i| tokio::spawn(async move { Client::join(addr, &format!("Player{i}")).await }))
        .collect();
    let mut clients = Vec::new();
    for join in joins {
        clients.push(join.await.unwrap());
    }

    let registry = Arc::clone(gateway.registry());
    wait_until("all registered", || registry.len() == PLAYERS).await;
    let mut names: Vec<_> = registry.snapshot().iter().map(|h| h.username().to_string()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), PLAYERS);

    for client in &clients {
        client.conn.close().await.unwrap();
    }
    wait_until("all deregistered", || registry.is_empty()).await;
    let stats = registry.stats();
    assert_eq!(stats.registered, PLAYERS as u64);
    assert_eq!(stats.deregistered, PLAYERS as u64);

    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_backend_unreachable_disconnects_client() {
    let remote = dead_backend().await;
    let (gateway, _run) = start_gateway(remote).await;

    let client = Client::join(gateway.local_addr(), "Test").await;
    assert_eq!(
        client.recv().await,
        edition_a::Packet::disconnect("Could not connect to the server")
    );
    assert_eq!(gateway.registry().stats().registered, 0);

    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_backend_kick_reaches_client() {
    let mut backend = start_backend().await;
    let (gateway, _run) = start_gateway(backend.addr).await;

    let client = Client::join(gateway.local_addr(), "Test").await;
    let link = backend.next_login().await;
    let registry = Arc::clone(gateway.registry());
    wait_until("registered", || registry.len() == 1).await;

    send_b(&link, &edition_b::Packet::Disconnect {
        reason: TextComponent::new("Kicked by an operator"),
    })
    .await;
    assert_eq!(
        client.recv().await,
        edition_a::Packet::disconnect("Kicked by an operator")
    );
    wait_until("deregistered", || registry.is_empty()).await;
    assert_eq!(registry.stats().deregistered, 1);

    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_reaches_every_player() {
    let backend = start_backend().await;
    let (gateway, _run) = start_gateway(backend.addr).await;

    let alice = Client::join(gateway.local_addr(), "Alice").await;
    let bob = Client::join(gateway.local_addr(), "Bob").await;
    let registry = Arc::clone(gateway.registry());
    wait_until("registered", || registry.len() == 2).await;

    assert_eq!(registry.broadcast("Restart in 5").await, 2);
    for client in [&alice, &bob] {
        assert_eq!(
            client.recv().await,
            edition_a::Packet::system_text("Restart in 5")
        );
    }

    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_sessions_and_stops_accepting() {
    let mut backend = start_backend().await;
    let (gateway, run) = start_gateway(backend.addr).await;

    let client = Client::join(gateway.local_addr(), "Test").await;
    let _link = backend.next_login().await;
    let registry = Arc::clone(gateway.registry());
    wait_until("registered", || registry.len() == 1).await;

    gateway.shutdown().await.unwrap();
    assert!(registry.is_empty());
    assert_eq!(
        client.recv().await,
        edition_a::Packet::disconnect(DisconnectCategory::ServerShutdown.default_message())
    );
    tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();

    // A second shutdown is a no-op.
    gateway.shutdown().await.unwrap();
    assert!(DatagramClient::ping(gateway.local_addr(), Duration::from_millis(200))
        .await
        .is_err());
}
