//! Destination address header
//!
//! ```text
//! +------+----------------------------+----------+
//! | ATYP | ADDR                       | PORT     |
//! +------+----------------------------+----------+
//! |  1   | 4 / 16 / 1 + LEN           | 2 (BE)   |
//! +------+----------------------------+----------+
//! ```

use super::{ProtocolError, ADDRESS_TYPE_MASK};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Address types (low nibble of the first header byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressType {
    Ipv4 = 0x01,
    Domain = 0x03,
    Ipv6 = 0x04,
}

impl TryFrom<u8> for AddressType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value & ADDRESS_TYPE_MASK {
            0x01 => Ok(AddressType::Ipv4),
            0x03 => Ok(AddressType::Domain),
            0x04 => Ok(AddressType::Ipv6),
            _ => Err(ProtocolError::UnknownAddressType(value)),
        }
    }
}

/// Relay destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ipv4(Ipv4Addr, u16),
    Ipv6(Ipv6Addr, u16),
    Domain(String, u16),
}

impl Address {
    /// Address type on the wire
    pub fn address_type(&self) -> AddressType {
        match self {
            Address::Ipv4(..) => AddressType::Ipv4,
            Address::Ipv6(..) => AddressType::Ipv6,
            Address::Domain(..) => AddressType::Domain,
        }
    }

    /// Destination port
    pub fn port(&self) -> u16 {
        match self {
            Address::Ipv4(_, port) | Address::Ipv6(_, port) | Address::Domain(_, port) => *port,
        }
    }

    /// Host part without the port
    pub fn host(&self) -> String {
        match self {
            Address::Ipv4(ip, _) => ip.to_string(),
            Address::Ipv6(ip, _) => ip.to_string(),
            Address::Domain(name, _) => name.clone(),
        }
    }

    /// Socket address, if no name resolution is needed
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Address::Ipv4(ip, port) => Some(SocketAddr::new((*ip).into(), *port)),
            Address::Ipv6(ip, port) => Some(SocketAddr::new((*ip).into(), *port)),
            Address::Domain(..) => None,
        }
    }

    /// Read one header from a (decrypted) stream
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let atyp = AddressType::try_from(reader.read_u8().await?)?;

        let address = match atyp {
            AddressType::Ipv4 => {
                let mut ip = [0u8; 4];
                reader.read_exact(&mut ip).await?;
                let port = reader.read_u16().await?;
                Address::Ipv4(Ipv4Addr::from(ip), port)
            }
            AddressType::Ipv6 => {
                let mut ip = [0u8; 16];
                reader.read_exact(&mut ip).await?;
                let port = reader.read_u16().await?;
                Address::Ipv6(Ipv6Addr::from(ip), port)
            }
            AddressType::Domain => {
                let len = reader.read_u8().await? as usize;
                let mut name = vec![0u8; len];
                reader.read_exact(&mut name).await?;
                let port = reader.read_u16().await?;

                let name = String::from_utf8(name).map_err(|_| ProtocolError::InvalidDomain)?;
                if name.contains('\0') {
                    return Err(ProtocolError::NulInAddress);
                }
                if name.is_empty() {
                    return Err(ProtocolError::InvalidDomain);
                }
                Address::Domain(name, port)
            }
        };

        Ok(address)
    }

    /// Serialize to the wire header
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::with_capacity(19);
        buf.push(self.address_type() as u8);

        match self {
            Address::Ipv4(ip, _) => buf.extend_from_slice(&ip.octets()),
            Address::Ipv6(ip, _) => buf.extend_from_slice(&ip.octets()),
            Address::Domain(name, _) => {
                let len = u8::try_from(name.len()).map_err(|_| ProtocolError::InvalidDomain)?;
                if len == 0 {
                    return Err(ProtocolError::InvalidDomain);
                }
                buf.push(len);
                buf.extend_from_slice(name.as_bytes());
            }
        }

        buf.extend_from_slice(&self.port().to_be_bytes());
        Ok(buf)
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(a) => Address::Ipv4(*a.ip(), a.port()),
            SocketAddr::V6(a) => Address::Ipv6(*a.ip(), a.port()),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(ip, port) => write!(f, "{}:{}", ip, port),
            Address::Ipv6(ip, port) => write!(f, "[{}]:{}", ip, port),
            Address::Domain(name, port) => write!(f, "{}:{}", name, port),
        }
    }
}

/// Read the destination header under the handshake deadline
pub async fn parse_request<R>(reader: &mut R, deadline: Duration) -> Result<Address, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    tokio::time::timeout(deadline, Address::read_from(reader))
        .await
        .map_err(|_| ProtocolError::HandshakeTimeout)?
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(bytes: &[u8]) -> Result<Address, ProtocolError> {
        let mut reader = bytes;
        parse_request(&mut reader, Duration::from_secs(1)).await
    }

    #[tokio::test]
    async fn test_ipv4_header() {
        let addr = parse(&[0x01, 93, 184, 216, 34, 0x00, 0x50]).await.unwrap();
        assert_eq!(addr.to_string(), "93.184.216.34:80");
        assert_eq!(addr.address_type(), AddressType::Ipv4);
    }

    #[tokio::test]
    async fn test_high_nibble_is_ignored() {
        let addr = parse(&[0xF1, 10, 0, 0, 1, 0x1F, 0x90]).await.unwrap();
        assert_eq!(addr.to_string(), "10.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_domain_header() {
        let mut header = vec![0x03, 11];
        header.extend_from_slice(b"example.com");
        header.extend_from_slice(&443u16.to_be_bytes());

        let addr = parse(&header).await.unwrap();
        assert_eq!(addr.to_string(), "example.com:443");
        assert_eq!(addr.to_bytes().unwrap(), header);
    }

    #[tokio::test]
    async fn test_ipv6_header() {
        let mut header = vec![0x04];
        header.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        header.extend_from_slice(&[0x00, 0x16]);

        let addr = parse(&header).await.unwrap();
        assert_eq!(addr.to_string(), "[::1]:22");
    }

    #[tokio::test]
    async fn test_unknown_address_type() {
        let err = parse(&[0x02, 1, 2, 3, 4, 0, 80]).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownAddressType(0x02)));
    }

    #[tokio::test]
    async fn test_nul_in_domain() {
        let mut header = vec![0x03, 5];
        header.extend_from_slice(b"a\0b.c");
        header.extend_from_slice(&[0, 80]);

        let err = parse(&header).await.unwrap_err();
        assert!(matches!(err, ProtocolError::NulInAddress));
    }

    #[tokio::test]
    async fn test_truncated_header() {
        let err = parse(&[0x01, 1, 2]).await.unwrap_err();
        match err {
            ProtocolError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_header_times_out() {
        let (mut client, _server) = tokio::io::duplex(64);
        let err = parse_request(&mut client, Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::HandshakeTimeout));
    }
}
