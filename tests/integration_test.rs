//! Integration tests for Stealth Relay
//!
//! Drives the relay over loopback sockets:
//! - Address header and encrypted payload end to end
//! - SOCKS5 front end through the relay
//! - Malformed headers, admission control and emergency lockdown
//! - DNS forwarder deny list and upstream forwarding

use hickory_proto::op::{Message, MessageType, Query, ResponseCode};
use hickory_proto::rr::{rdata::A, Name, RData, RecordType};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use stealth_relay::crypto::{Cipher, CipherKind};
use stealth_relay::obfuscation::ObfuscationConfig;
use stealth_relay::protocol::Address;
use stealth_relay::proxy::RelayClient;
#[cfg(feature = "socks5")]
use stealth_relay::proxy::Socks5Server;
use stealth_relay::relay::RelayContext;
use stealth_relay::server::{TcpRelayServer, UdpForwarder, UdpForwarderConfig};
use stealth_relay::transport::{CipherStream, TcpTransport, TransportConfig};
use stealth_relay::{Error, Lockdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const SECRET: &str = "integration-secret";

fn test_context(lockdown: Lockdown, io_timeout: Duration) -> RelayContext {
    let transport = TcpTransport::new(TransportConfig {
        allow_reserved_destinations: true,
        io_timeout,
        ..Default::default()
    });
    RelayContext::new(transport, ObfuscationConfig::disabled(), lockdown)
}

async fn start_relay(
    cipher: Cipher,
    lockdown: Lockdown,
    io_timeout: Duration,
    per_ip_limit: u32,
) -> (SocketAddr, JoinHandle<stealth_relay::Result<()>>) {
    let server = TcpRelayServer::bind(
        "127.0.0.1:0",
        cipher,
        test_context(lockdown, io_timeout),
        per_ip_limit,
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    (addr, tokio::spawn(server.run()))
}

/// Destination that echoes everything back until EOF
async fn start_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (mut r, mut w) = socket.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

/// Encrypted relay stream to the echo destination, payload round trip
#[tokio::test]
async fn test_end_to_end_relay() {
    for kind in CipherKind::ALL {
        let cipher = Cipher::new(kind, SECRET).unwrap();
        let (relay_addr, _server) =
            start_relay(cipher.clone(), Lockdown::new(), Duration::from_secs(5), 96).await;
        let echo_addr = start_echo().await;

        let client = RelayClient::new(relay_addr.to_string(), cipher);
        let mut stream = client.connect(&Address::from(echo_addr)).await.unwrap();

        let payload: Vec<u8> = (0..50_000u32).map(|i| (i * 7) as u8).collect();
        let (mut r, mut w) = tokio::io::split(&mut stream);
        let writer = async {
            w.write_all(&payload).await.unwrap();
            w.flush().await.unwrap();
        };
        let reader = async {
            let mut received = vec![0u8; payload.len()];
            r.read_exact(&mut received).await.unwrap();
            received
        };
        let ((), received) = timeout(Duration::from_secs(10), async { tokio::join!(writer, reader) })
            .await
            .unwrap();

        assert_eq!(received, payload, "{} relayed bytes differ", kind);
    }
}

/// Local SOCKS5 application → relay → echo
#[cfg(feature = "socks5")]
#[tokio::test]
async fn test_socks5_through_relay() {
    let cipher = Cipher::new(CipherKind::ChaCha20Ietf, SECRET).unwrap();
    let (relay_addr, _server) =
        start_relay(cipher.clone(), Lockdown::new(), Duration::from_secs(5), 96).await;
    let echo_addr = start_echo().await;

    let socks = Socks5Server::bind("127.0.0.1:0").await.unwrap();
    let socks_addr = socks.local_addr().unwrap();
    let relay = RelayClient::new(relay_addr.to_string(), cipher);
    tokio::spawn(async move { socks.run(relay).await });

    let mut app = TcpStream::connect(socks_addr).await.unwrap();
    app.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method = [0u8; 2];
    app.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [0x05, 0x00]);

    let mut request = vec![0x05, 0x01, 0x00];
    request.extend_from_slice(&Address::from(echo_addr).to_bytes().unwrap());
    app.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    app.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x00);

    app.write_all(b"through the relay").await.unwrap();
    let mut echoed = [0u8; 17];
    timeout(Duration::from_secs(5), app.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed, b"through the relay");
}

/// An unknown address type is closed without a reply and nothing is dialed
#[tokio::test]
async fn test_bad_address_type_dials_nothing() {
    let cipher = Cipher::new(CipherKind::Aes256Cfb, SECRET).unwrap();
    let (relay_addr, _server) =
        start_relay(cipher.clone(), Lockdown::new(), Duration::from_secs(5), 96).await;

    let dest = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest_addr = dest.local_addr().unwrap();

    let socket = TcpStream::connect(relay_addr).await.unwrap();
    let mut stream = CipherStream::new(socket, cipher.new_state());
    // Valid IPv4 layout with type 0x02
    let mut header = vec![0x02];
    if let SocketAddr::V4(v4) = dest_addr {
        header.extend_from_slice(&v4.ip().octets());
    }
    header.extend_from_slice(&dest_addr.port().to_be_bytes());
    stream.write_all(&header).await.unwrap();

    // Closed without a byte; the close may surface as a reset
    let mut buf = Vec::new();
    let n = timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);

    assert!(timeout(Duration::from_millis(300), dest.accept()).await.is_err());
}

/// A client with the wrong secret decrypts to garbage and gets silence
#[tokio::test]
async fn test_wrong_secret_gets_no_reply() {
    let cipher = Cipher::new(CipherKind::Aes256Cfb, SECRET).unwrap();
    let (relay_addr, _server) =
        start_relay(cipher, Lockdown::new(), Duration::from_secs(5), 96).await;
    let echo_addr = start_echo().await;

    let wrong = Cipher::new(CipherKind::Aes256Cfb, "not-the-secret").unwrap();
    let client = RelayClient::new(relay_addr.to_string(), wrong);
    let mut stream = client.connect(&Address::from(echo_addr)).await.unwrap();

    stream.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    let echoed = timeout(Duration::from_secs(2), stream.read_exact(&mut buf)).await;
    assert!(!matches!(echoed, Ok(Ok(_))));
}

/// Connections over the per-IP limit are dropped without a handshake
#[tokio::test]
async fn test_rate_limit_drops_excess_connections() {
    let cipher = Cipher::new(CipherKind::Aes256Cfb, SECRET).unwrap();
    let (relay_addr, _server) =
        start_relay(cipher, Lockdown::new(), Duration::from_secs(5), 2).await;

    let mut sockets = Vec::new();
    for _ in 0..3 {
        sockets.push(TcpStream::connect(relay_addr).await.unwrap());
    }

    let mut open = 0;
    for socket in sockets.iter_mut() {
        let mut buf = [0u8; 1];
        // Admitted sockets wait for their header; dropped ones read EOF
        match timeout(Duration::from_millis(500), socket.read(&mut buf)).await {
            Err(_) => open += 1,
            Ok(_) => {}
        }
    }
    assert_eq!(open, 2);
}

/// Lockdown mid-transfer releases the destination and stops the listener
#[tokio::test]
async fn test_lockdown_mid_transfer() {
    let cipher = Cipher::new(CipherKind::Aes128Cfb, SECRET).unwrap();
    let lockdown = Lockdown::new();
    let (relay_addr, server) =
        start_relay(cipher.clone(), lockdown.clone(), Duration::from_secs(1), 96).await;

    let dest = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest_addr = dest.local_addr().unwrap();

    let client = RelayClient::new(relay_addr.to_string(), cipher);
    let mut stream = client.connect(&Address::from(dest_addr)).await.unwrap();
    let (mut upstream, _) = dest.accept().await.unwrap();

    stream.write_all(b"before").await.unwrap();
    let mut buf = [0u8; 6];
    upstream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"before");

    let feeder = tokio::spawn(async move {
        while stream.write_all(b"more data").await.is_ok() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });

    lockdown.trigger();

    let released = timeout(Duration::from_secs(3), async {
        let mut sink = [0u8; 1024];
        loop {
            match upstream.read(&mut sink).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    assert!(released.is_ok(), "destination still held after lockdown");

    let result = timeout(Duration::from_secs(1), server).await.unwrap().unwrap();
    assert!(matches!(result, Err(Error::EmergencyLockdown)));

    feeder.abort();
    assert!(TcpStream::connect(relay_addr).await.is_err());
}

/// Both ends are released once traffic stops for one idle timeout
#[tokio::test]
async fn test_idle_relay_is_closed() {
    let cipher = Cipher::new(CipherKind::Aes256Ctr, SECRET).unwrap();
    let (relay_addr, _server) =
        start_relay(cipher.clone(), Lockdown::new(), Duration::from_secs(1), 96).await;

    let dest = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest_addr = dest.local_addr().unwrap();

    let client = RelayClient::new(relay_addr.to_string(), cipher);
    let mut stream = client.connect(&Address::from(dest_addr)).await.unwrap();
    let (mut upstream, _) = dest.accept().await.unwrap();

    let mut buf = [0u8; 16];
    let upstream_eof = timeout(Duration::from_secs(3), upstream.read(&mut buf))
        .await
        .expect("destination not released");
    assert_eq!(upstream_eof.unwrap_or(0), 0);

    let client_eof = timeout(Duration::from_secs(3), stream.read(&mut buf))
        .await
        .expect("client not released");
    assert_eq!(client_eof.unwrap_or(0), 0);
}

fn dns_query(id: u16, name: &str) -> Vec<u8> {
    let mut message = Message::new();
    message.set_id(id).set_recursion_desired(true);
    message.add_query(Query::query(Name::from_ascii(name).unwrap(), RecordType::A));
    message.to_vec().unwrap()
}

#[tokio::test]
async fn test_dns_forwarder() {
    // Upstream that answers every query with its question and QR set
    let upstream = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        while let Ok((n, from)) = upstream.recv_from(&mut buf).await {
            let mut answer = buf[..n].to_vec();
            answer[2] |= 0x80;
            let _ = upstream.send_to(&answer, from).await;
        }
    });

    let forwarder = UdpForwarder::bind(
        UdpForwarderConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            upstreams: vec![upstream_addr],
            pool_size: 2,
            deny_names: vec!["Tracker.Example.".into()],
            ..Default::default()
        },
        Lockdown::new(),
    )
    .await
    .unwrap();
    let forwarder_addr = forwarder.local_addr().unwrap();
    tokio::spawn(forwarder.run());

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.connect(forwarder_addr).await.unwrap();
    let mut buf = [0u8; 512];

    let query = dns_query(0x1234, "allowed.example");
    client.send(&query).await.unwrap();
    let n = timeout(Duration::from_secs(2), client.recv(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..2], &[0x12, 0x34]);
    assert_eq!(buf[2] & 0x80, 0x80);
    assert_eq!(&buf[3..n], &query[3..]);

    client.send(&dns_query(0xABCD, "tracker.example")).await.unwrap();
    let n = timeout(Duration::from_secs(2), client.recv(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let answer = Message::from_vec(&buf[..n]).unwrap();
    assert_eq!(answer.id(), 0xABCD);
    assert_eq!(answer.message_type(), MessageType::Response);
    assert_eq!(answer.response_code(), ResponseCode::NoError);
    assert_eq!(answer.answers().len(), 1);
    assert_eq!(
        answer.answers()[0].data(),
        Some(&RData::A(A(Ipv4Addr::UNSPECIFIED)))
    );
}
