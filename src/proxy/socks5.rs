//! SOCKS5 front end (RFC 1928, CONNECT only)
//!
//! The request's ATYP/ADDR/PORT tail uses the same encoding as the relay
//! header, so it is parsed with [`Address::read_from`] and forwarded as is.

use super::{ProxyError, RelayClient};
use crate::obfuscation::{read_exact_with_retry, RetryConfig};
use crate::protocol::{Address, HANDSHAKE_TIMEOUT};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn};

/// SOCKS5 version
const SOCKS_VERSION: u8 = 0x05;

/// Authentication methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum AuthMethod {
    NoAuth = 0x00,
    UsernamePassword = 0x02,
    NoAcceptable = 0xFF,
}

/// SOCKS5 commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Command {
    Connect = 0x01,
    Bind = 0x02,
    UdpAssociate = 0x03,
}

impl TryFrom<u8> for Command {
    type Error = ProxyError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Command::Connect),
            0x02 => Ok(Command::Bind),
            0x03 => Ok(Command::UdpAssociate),
            _ => Err(ProxyError::UnsupportedCommand(value)),
        }
    }
}

/// Reply codes
#[derive(Debug, Clone, Copy)]
#[repr(u8)]
enum Reply {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

/// Local SOCKS5 server that tunnels every CONNECT through a relay
pub struct Socks5Server {
    listener: TcpListener,
    /// Optional username/password authentication
    auth: Option<(String, String)>,
}

impl Socks5Server {
    /// Create a new SOCKS5 server
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, ProxyError> {
        let listener = TcpListener::bind(addr).await?;
        info!("SOCKS5 server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            auth: None,
        })
    }

    /// Enable username/password authentication
    pub fn with_auth(mut self, username: String, password: String) -> Self {
        self.auth = Some((username, password));
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProxyError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve local clients
    pub async fn run(&self, relay: RelayClient) -> Result<(), ProxyError> {
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            debug!("New SOCKS5 connection from {}", peer_addr);

            let relay = relay.clone();
            let auth = self.auth.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, auth, relay).await {
                    warn!("SOCKS5 connection from {} failed: {}", peer_addr, e);
                }
            });
        }
    }

    async fn handle_connection(
        mut stream: TcpStream,
        auth: Option<(String, String)>,
        relay: RelayClient,
    ) -> Result<(), ProxyError> {
        let negotiation = Self::negotiate(&mut stream, &auth, relay.retry());
        let dest = tokio::time::timeout(HANDSHAKE_TIMEOUT, negotiation)
            .await
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??;

        let mut remote = match relay.connect(&dest).await {
            Ok(remote) => remote,
            Err(e) => {
                stream.write_all(&make_reply(Reply::GeneralFailure)).await.ok();
                return Err(e);
            }
        };
        stream.write_all(&make_reply(Reply::Succeeded)).await?;

        let (up, down) = tokio::io::copy_bidirectional(&mut stream, &mut remote).await?;
        debug!("SOCKS5 {} closed: {} bytes up, {} bytes down", dest, up, down);
        Ok(())
    }

    /// Greeting, optional authentication and the CONNECT request
    async fn negotiate(
        stream: &mut TcpStream,
        auth: &Option<(String, String)>,
        retry: &RetryConfig,
    ) -> Result<Address, ProxyError> {
        let mut buf = [0u8; 255];
        read_exact_with_retry(stream, &mut buf[..2], retry).await?;

        if buf[0] != SOCKS_VERSION {
            return Err(ProxyError::InvalidSocksVersion(buf[0]));
        }

        let nmethods = buf[1] as usize;
        read_exact_with_retry(stream, &mut buf[..nmethods], retry).await?;
        let offered = &buf[..nmethods];

        let method = match auth {
            Some(_) if offered.contains(&(AuthMethod::UsernamePassword as u8)) => {
                AuthMethod::UsernamePassword
            }
            None if offered.contains(&(AuthMethod::NoAuth as u8)) => AuthMethod::NoAuth,
            _ => AuthMethod::NoAcceptable,
        };
        stream.write_all(&[SOCKS_VERSION, method as u8]).await?;

        match method {
            AuthMethod::NoAcceptable => return Err(ProxyError::AuthenticationFailed),
            AuthMethod::UsernamePassword => {
                if let Some((expected_user, expected_pass)) = auth {
                    // Subnegotiation version, then length-prefixed fields
                    stream.read_u8().await?;
                    let username = read_field(stream).await?;
                    let password = read_field(stream).await?;

                    let success =
                        username == expected_user.as_bytes() && password == expected_pass.as_bytes();
                    stream.write_all(&[0x01, if success { 0x00 } else { 0x01 }]).await?;

                    if !success {
                        return Err(ProxyError::AuthenticationFailed);
                    }
                }
            }
            AuthMethod::NoAuth => {}
        }

        // VER CMD RSV
        read_exact_with_retry(stream, &mut buf[..3], retry).await?;
        if buf[0] != SOCKS_VERSION {
            return Err(ProxyError::InvalidSocksVersion(buf[0]));
        }

        let command = Command::try_from(buf[1]);
        let dest = match Address::read_from(stream).await {
            Ok(dest) => dest,
            Err(e) => {
                stream.write_all(&make_reply(Reply::AddressTypeNotSupported)).await.ok();
                return Err(e.into());
            }
        };

        match command {
            Ok(Command::Connect) => {
                debug!("SOCKS5 CONNECT {}", dest);
                Ok(dest)
            }
            Ok(other) => {
                stream.write_all(&make_reply(Reply::CommandNotSupported)).await?;
                Err(ProxyError::UnsupportedCommand(other as u8))
            }
            Err(e) => {
                stream.write_all(&make_reply(Reply::CommandNotSupported)).await?;
                Err(e)
            }
        }
    }
}

async fn read_field(stream: &mut TcpStream) -> Result<Vec<u8>, ProxyError> {
    let len = stream.read_u8().await? as usize;
    let mut field = vec![0u8; len];
    stream.read_exact(&mut field).await?;
    Ok(field)
}

/// Reply with an unspecified bound address; the real one is on the relay
fn make_reply(reply: Reply) -> Vec<u8> {
    let mut buf = vec![SOCKS_VERSION, reply as u8, 0x00, 0x01];
    buf.extend_from_slice(&Ipv4Addr::UNSPECIFIED.octets());
    buf.extend_from_slice(&0u16.to_be_bytes());
    buf
}
