//! Name resolution used by the blacklist checker

use async_trait::async_trait;
use hickory_resolver::{
    config::{ResolverConfig, ResolverOpts},
    error::ResolveErrorKind,
    TokioAsyncResolver,
};
use std::io;
use std::net::Ipv4Addr;
use tracing::{trace, warn};

/// Resolves DNSBL lookup names to A records
#[async_trait]
pub trait DnsblResolver: Send + Sync + 'static {
    /// IPv4 addresses `name` resolves to; an empty list means "no record"
    async fn lookup_ipv4(&self, name: &str) -> io::Result<Vec<Ipv4Addr>>;
}

/// A-record resolver built on hickory-dns
#[derive(Clone)]
pub struct HickoryResolver {
    resolver: TokioAsyncResolver,
}

impl HickoryResolver {
    /// Resolver using the system configuration (`/etc/resolv.conf` on Unix),
    /// or hickory's default name servers when that cannot be read
    pub fn from_system_conf() -> Self {
        match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => Self { resolver },
            Err(e) => {
                warn!("Cannot read system DNS configuration, using defaults: {}", e);
                Self::with_config(ResolverConfig::default(), ResolverOpts::default())
            }
        }
    }

    /// Resolver asking the given name servers
    pub fn with_config(config: ResolverConfig, opts: ResolverOpts) -> Self {
        trace!("DNSBL resolver config {:?} opts {:?}", config, opts);
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

impl Default for HickoryResolver {
    fn default() -> Self {
        Self::from_system_conf()
    }
}

impl std::fmt::Debug for HickoryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HickoryResolver")
    }
}

#[async_trait]
impl DnsblResolver for HickoryResolver {
    async fn lookup_ipv4(&self, name: &str) -> io::Result<Vec<Ipv4Addr>> {
        // Lookup names are absolute; no search-domain expansion
        let fqdn = if name.ends_with('.') {
            name.to_owned()
        } else {
            format!("{}.", name)
        };

        match self.resolver.ipv4_lookup(fqdn).await {
            Ok(lookup) => Ok(lookup.iter().map(|a| a.0).collect()),
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Ok(Vec::new()),
                _ => Err(io::Error::new(io::ErrorKind::Other, e)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{Message, MessageType, ResponseCode};
    use hickory_proto::rr::{rdata::A, RData, Record};
    use hickory_resolver::config::NameServerConfigGroup;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    /// Answers `127.0.0.2` for names under `listed.test.` and NXDOMAIN for
    /// everything else
    async fn start_zone() -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let (n, peer) = socket.recv_from(&mut buf).await.unwrap();
                let request = Message::from_vec(&buf[..n]).unwrap();
                let query = request.queries()[0].clone();

                let mut response = Message::new();
                response
                    .set_id(request.id())
                    .set_message_type(MessageType::Response)
                    .set_recursion_desired(request.recursion_desired())
                    .set_recursion_available(true);
                response.add_query(query.clone());

                if query.name().to_ascii().ends_with("listed.test.") {
                    response.set_response_code(ResponseCode::NoError);
                    response.add_answer(Record::from_rdata(
                        query.name().clone(),
                        60,
                        RData::A(A(Ipv4Addr::new(127, 0, 0, 2))),
                    ));
                } else {
                    response.set_response_code(ResponseCode::NXDomain);
                }
                socket.send_to(&response.to_vec().unwrap(), peer).await.unwrap();
            }
        });
        addr
    }

    fn resolver_for(zone: SocketAddr) -> HickoryResolver {
        let servers = NameServerConfigGroup::from_ips_clear(&[zone.ip()], zone.port(), true);
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(2);
        opts.attempts = 1;
        HickoryResolver::with_config(ResolverConfig::from_parts(None, vec![], servers), opts)
    }

    #[tokio::test]
    async fn test_listed_name_resolves() {
        let resolver = resolver_for(start_zone().await);
        let ips = resolver.lookup_ipv4("4.3.2.1.listed.test").await.unwrap();
        assert_eq!(ips, vec![Ipv4Addr::new(127, 0, 0, 2)]);
    }

    #[tokio::test]
    async fn test_nxdomain_is_an_empty_answer() {
        let resolver = resolver_for(start_zone().await);
        let ips = resolver.lookup_ipv4("4.3.2.1.clean.test.").await.unwrap();
        assert!(ips.is_empty());
    }
}
