//! Integration tests for the datagram and stream transports.
//!
//! These bind real sockets on 127.0.0.1 with OS-assigned ports and drive
//! a client and server end against each other.

#[cfg(feature = "datagram")]
mod datagram {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use crossplay_transport::{
        Connection, DatagramClient, DatagramTransport, QueryHandler, Transport,
    };

    struct FixedQuery(Option<String>);

    impl QueryHandler for FixedQuery {
        fn on_query(&self, _addr: SocketAddr) -> Option<String> {
            self.0.clone()
        }
    }

    async fn bind(advertisement: Option<&str>) -> DatagramTransport {
        let query = Arc::new(FixedQuery(advertisement.map(str::to_string)));
        DatagramTransport::bind("127.0.0.1:0", 1400, query)
            .await
            .expect("should bind")
    }

    #[tokio::test]
    async fn test_datagram_connect_send_receive() {
        let mut transport = bind(None).await;
        let addr = transport.local_addr();

        let client = DatagramClient::connect(addr)
            .await
            .expect("client should connect");
        let server = transport.accept().await.expect("should accept");
        // The client binds the unspecified address, so only ports match.
        assert_eq!(
            server.peer_addr().port(),
            client.local_addr().unwrap().port()
        );
        assert_eq!(client.peer_addr(), addr);

        client.send(b"hello from client").await.unwrap();
        let got = server.recv().await.unwrap().unwrap();
        assert_eq!(got, b"hello from client");

        server.send(b"hello from server").await.unwrap();
        let got = client.recv().await.unwrap().unwrap();
        assert_eq!(got, b"hello from server");
    }

    #[tokio::test]
    async fn test_datagram_large_packet_is_split_and_reassembled() {
        let mut transport = bind(None).await;
        let client = DatagramClient::connect(transport.local_addr())
            .await
            .unwrap();
        let server = transport.accept().await.unwrap();

        // Several MTUs worth of incompressible-looking data.
        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 31 % 251) as u8).collect();
        server.send(&data).await.unwrap();
        let got = client.recv().await.unwrap().unwrap();
        assert_eq!(got, data);
    }

    #[tokio::test]
    async fn test_datagram_compression_applies_both_ways() {
        let mut transport = bind(None).await;
        let client = DatagramClient::connect(transport.local_addr())
            .await
            .unwrap();
        let server = transport.accept().await.unwrap();

        server.set_compression_threshold(Some(16));
        client.set_compression_threshold(Some(16));

        let big = b"abcdefgh".repeat(64);
        client.send(&big).await.unwrap();
        assert_eq!(server.recv().await.unwrap().unwrap(), big);

        client.send(b"tiny").await.unwrap();
        assert_eq!(server.recv().await.unwrap().unwrap(), b"tiny");

        server.send(&big).await.unwrap();
        assert_eq!(client.recv().await.unwrap().unwrap(), big);
    }

    #[tokio::test]
    async fn test_datagram_packets_keep_their_order() {
        let mut transport = bind(None).await;
        let client = DatagramClient::connect(transport.local_addr())
            .await
            .unwrap();
        let server = transport.accept().await.unwrap();

        for i in 0..50u8 {
            client.send(&[i]).await.unwrap();
        }
        for i in 0..50u8 {
            assert_eq!(server.recv().await.unwrap().unwrap(), vec![i]);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_datagram_concurrent_sends_are_all_delivered() {
        let mut transport = bind(None).await;
        let client = DatagramClient::connect(transport.local_addr())
            .await
            .unwrap();
        let server = transport.accept().await.unwrap();

        let large = vec![7u8; 4_000];
        let sends = async {
            tokio::join!(
                async {
                    for _ in 0..20 {
                        server.send(&large).await.unwrap();
                    }
                },
                async {
                    for i in 0..20u8 {
                        server.send(&[i]).await.unwrap();
                    }
                },
            )
        };
        let receives = async {
            let mut small = Vec::new();
            for _ in 0..40 {
                let got = tokio::time::timeout(Duration::from_secs(2), client.recv())
                    .await
                    .expect("every packet should arrive")
                    .unwrap()
                    .unwrap();
                if got.len() == 1 {
                    small.push(got[0]);
                } else {
                    assert_eq!(got, large);
                }
            }
            small
        };
        let (((), ()), small) = tokio::join!(sends, receives);
        assert_eq!(small, (0..20u8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_datagram_close_reaches_peer() {
        let mut transport = bind(None).await;
        let client = DatagramClient::connect(transport.local_addr())
            .await
            .unwrap();
        let server = transport.accept().await.unwrap();

        client.close().await.unwrap();
        client.close().await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), server.recv())
            .await
            .expect("server should notice the disconnect");
        assert!(got.unwrap().is_none());
        assert!(client.send(b"late").await.is_err());
    }

    #[tokio::test]
    async fn test_datagram_ping_returns_advertisement() {
        let transport = bind(Some("MCPE;Crossplay;1;1.0;0;10;1;Sub;Survival;1;0;0;")).await;
        let adv = DatagramClient::ping(transport.local_addr(), Duration::from_secs(2))
            .await
            .expect("should get a pong");
        assert!(adv.starts_with("MCPE;Crossplay;"));
        // Probing does not open a connection.
        assert_eq!(transport.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_datagram_ping_dropped_by_handler_times_out() {
        let transport = bind(None).await;
        let err = DatagramClient::ping(transport.local_addr(), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_datagram_shutdown_stops_accept() {
        let mut transport = bind(None).await;
        transport.shutdown().await.unwrap();
        // The pump owned the accept sender, so accept now reports shutdown.
        let res = tokio::time::timeout(Duration::from_secs(2), transport.accept())
            .await
            .expect("accept should return after shutdown");
        assert!(res.is_err());
    }
}

#[cfg(feature = "stream")]
mod stream {
    use std::time::Duration;

    use crossplay_transport::{Connection, StreamConnection, StreamTransport, Transport};

    async fn connected() -> (StreamConnection, StreamConnection) {
        let mut transport = StreamTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().unwrap();
        let server = tokio::spawn(async move { transport.accept().await.expect("should accept") });
        let client = StreamConnection::connect(addr)
            .await
            .expect("client should connect");
        (client, server.await.unwrap())
    }

    #[tokio::test]
    async fn test_stream_send_receive_both_ways() {
        let (client, server) = connected().await;

        client.send(b"ping").await.unwrap();
        assert_eq!(server.recv().await.unwrap().unwrap(), b"ping");

        server.send(b"pong").await.unwrap();
        assert_eq!(client.recv().await.unwrap().unwrap(), b"pong");
    }

    #[tokio::test]
    async fn test_stream_compression_threshold_switch() {
        let (client, server) = connected().await;

        // Uncompressed until both sides agree on a threshold.
        client.send(b"before").await.unwrap();
        assert_eq!(server.recv().await.unwrap().unwrap(), b"before");

        client.set_compression_threshold(Some(32));
        server.set_compression_threshold(Some(32));
        assert_eq!(client.compression_threshold(), Some(32));

        let big = vec![b'z'; 4096];
        server.send(&big).await.unwrap();
        client.send(b"small").await.unwrap();
        assert_eq!(client.recv().await.unwrap().unwrap(), big);
        assert_eq!(server.recv().await.unwrap().unwrap(), b"small");
    }

    #[tokio::test]
    async fn test_stream_debug_shows_peer_and_threshold() {
        let (client, _server) = connected().await;
        client.set_compression_threshold(Some(64));

        let shown = format!("{client:?}");
        assert!(shown.starts_with("StreamConnection"));
        assert!(shown.contains(&client.peer_addr().to_string()));
        assert!(shown.contains("Some(64)"));
    }

    #[tokio::test]
    async fn test_stream_peer_close_yields_none() {
        let (client, server) = connected().await;
        client.close().await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(2), server.recv())
            .await
            .expect("server should see EOF");
        assert!(got.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stream_local_close_wakes_receiver() {
        let (client, _server) = connected().await;
        client.close().await.unwrap();
        assert!(client.recv().await.unwrap().is_none());
        assert!(client.send(b"late").await.is_err());
    }

    #[tokio::test]
    async fn test_stream_transport_shutdown_stops_accept() {
        let mut transport = StreamTransport::bind("127.0.0.1:0").await.unwrap();
        transport.shutdown().await.unwrap();
        assert!(transport.accept().await.is_err());
    }
}
