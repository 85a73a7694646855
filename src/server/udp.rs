//! UDP DNS forwarder
//!
//! A fixed pool of upstream sockets, each owned by exactly one worker task
//! that writes a query, waits for the matching response, and sends it back
//! to the client. The receive loop only picks a queue; it never touches an
//! upstream socket.

use super::dns::{extract_domain_name, normalize_name, respond_with_zero};
use super::rate_limit::RateLimiter;
use crate::lockdown::Lockdown;
use crate::{Error, Result};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, trace, warn};

/// Largest DNS packet handled
pub const MAX_PACKET_SIZE: usize = 9038;

/// Forwarder configuration
#[derive(Debug, Clone)]
pub struct UdpForwarderConfig {
    /// Address the forwarder answers on
    pub listen: SocketAddr,
    /// Upstream resolvers; pool sockets are spread over them round-robin
    pub upstreams: Vec<SocketAddr>,
    /// Number of upstream sockets (and workers)
    pub pool_size: usize,
    /// Pending queries per worker before new ones are dropped
    pub queue_depth: usize,
    /// Deadline for each upstream exchange and each reply
    pub io_timeout: Duration,
    /// Client IP text prefixes allowed to query; empty allows everyone
    pub allow_prefixes: Vec<String>,
    /// Names answered with 0.0.0.0 instead of being forwarded
    pub deny_names: Vec<String>,
    /// Queries per client IP per second
    pub per_ip_limit: u32,
}

impl Default for UdpForwarderConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 53)),
            upstreams: vec![
                SocketAddr::from(([1, 1, 1, 1], 53)),
                SocketAddr::from(([9, 9, 9, 9], 53)),
            ],
            pool_size: 8,
            queue_depth: 16,
            io_timeout: Duration::from_secs(10),
            allow_prefixes: Vec::new(),
            deny_names: Vec::new(),
            per_ip_limit: 96,
        }
    }
}

/// A query waiting in a forwarder queue
#[derive(Debug)]
struct ForwardQuery {
    client: SocketAddr,
    packet: Vec<u8>,
    name: Option<String>,
}

/// UDP DNS forwarder with a fixed upstream socket pool
pub struct UdpForwarder {
    socket: Arc<UdpSocket>,
    queues: Vec<mpsc::Sender<ForwardQuery>>,
    workers: Vec<JoinHandle<()>>,
    deny: Arc<RwLock<HashSet<String>>>,
    rate_limiter: RateLimiter,
    allow_prefixes: Vec<String>,
    io_timeout: Duration,
    lockdown: Lockdown,
}

impl UdpForwarder {
    /// Bind the listening socket and start the pool
    pub async fn bind(config: UdpForwarderConfig, lockdown: Lockdown) -> Result<Self> {
        if config.upstreams.is_empty() {
            return Err(Error::Config("forwarder needs at least one upstream".into()));
        }

        let socket = Arc::new(UdpSocket::bind(config.listen).await?);
        let pool_size = config.pool_size.max(1);

        let mut queues = Vec::with_capacity(pool_size);
        let mut workers = Vec::with_capacity(pool_size);
        for index in 0..pool_size {
            let upstream_addr = config.upstreams[index % config.upstreams.len()];
            let upstream = UdpSocket::bind(unspecified_for(upstream_addr)).await?;
            upstream.connect(upstream_addr).await?;

            let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
            queues.push(tx);
            workers.push(tokio::spawn(forwarder_worker(
                index,
                rx,
                upstream,
                socket.clone(),
                config.io_timeout,
            )));
        }

        let deny = config.deny_names.iter().map(|n| normalize_name(n)).collect();
        info!(
            "DNS forwarder on {} with {} upstream sockets",
            socket.local_addr()?,
            pool_size
        );

        Ok(Self {
            socket,
            queues,
            workers,
            deny: Arc::new(RwLock::new(deny)),
            rate_limiter: RateLimiter::new(config.per_ip_limit, Duration::from_secs(1)),
            allow_prefixes: config.allow_prefixes,
            io_timeout: config.io_timeout,
            lockdown,
        })
    }

    /// Address the forwarder is listening on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Replace the deny list
    pub fn set_deny_list<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: HashSet<String> = names.into_iter().map(|n| normalize_name(n.as_ref())).collect();
        *self.deny.write() = names;
    }

    fn is_denied(&self, name: &str) -> bool {
        self.deny.read().contains(name)
    }

    fn is_allowed_client(&self, ip: IpAddr) -> bool {
        if self.allow_prefixes.is_empty() {
            return true;
        }
        let ip = ip.to_string();
        self.allow_prefixes.iter().any(|prefix| ip.starts_with(prefix.as_str()))
    }

    /// Receive and dispatch queries until lockdown or a socket error
    pub async fn run(self) -> Result<()> {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];

        loop {
            let (len, client) = tokio::select! {
                _ = self.lockdown.triggered() => {
                    warn!("DNS forwarder stopping for emergency lockdown");
                    return Err(Error::EmergencyLockdown);
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(r) => r,
                    Err(e) => return Err(e.into()),
                },
            };

            if !self.rate_limiter.add(client.ip()) {
                continue;
            }
            if !self.is_allowed_client(client.ip()) {
                debug!("{} is not allowed to query", client.ip());
                continue;
            }

            let packet = buf[..len].to_vec();
            let name = extract_domain_name(&packet);

            if let Some(name) = name.as_deref() {
                if self.is_denied(name) {
                    debug!("Black-holing \"{}\" for {}", name, client.ip());
                    if let Some(answer) = respond_with_zero(&packet) {
                        match timeout(self.io_timeout, self.socket.send_to(&answer, client)).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => debug!("Reply to {} failed: {}", client, e),
                            Err(_) => debug!("Reply to {} timed out", client),
                        }
                    }
                    continue;
                }
            }

            let index = rand::thread_rng().gen_range(0..self.queues.len());
            trace!("Forwarder {} takes {:?} from {}", index, name, client);
            match self.queues[index].try_send(ForwardQuery { client, packet, name }) {
                Ok(()) => {}
                Err(TrySendError::Full(query)) => {
                    warn!("Forwarder {} is backlogged, dropping query from {}", index, query.client);
                }
                Err(TrySendError::Closed(_)) => {
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        format!("forwarder {} has stopped", index),
                    )));
                }
            }
        }
    }
}

impl Drop for UdpForwarder {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

fn unspecified_for(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}

/// Sole owner of one upstream socket
async fn forwarder_worker(
    index: usize,
    mut queue: mpsc::Receiver<ForwardQuery>,
    upstream: UdpSocket,
    server: Arc<UdpSocket>,
    io_timeout: Duration,
) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    while let Some(query) = queue.recv().await {
        let deadline = Instant::now() + io_timeout;

        match timeout_at(deadline, upstream.send(&query.packet)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                debug!("Forwarder {} write failed: {}", index, e);
                continue;
            }
            Err(_) => {
                debug!("Forwarder {} write timed out", index);
                continue;
            }
        }

        // Skip late answers to queries that already timed out
        let len = loop {
            match timeout_at(deadline, upstream.recv(&mut buf)).await {
                Ok(Ok(n)) if n >= 2 && query.packet.len() >= 2 && buf[..2] == query.packet[..2] => {
                    break Some(n)
                }
                Ok(Ok(_)) => trace!("Forwarder {} discarded a stale response", index),
                Ok(Err(e)) => {
                    debug!("Forwarder {} read failed: {}", index, e);
                    break None;
                }
                Err(_) => {
                    debug!("Forwarder {} read timed out", index);
                    break None;
                }
            }
        };
        let Some(len) = len else { continue };

        match timeout(io_timeout, server.send_to(&buf[..len], query.client)).await {
            Ok(Ok(_)) => debug!("Forwarded answer for {:?} to {}", query.name, query.client.ip()),
            Ok(Err(e)) => debug!("Reply to {} failed: {}", query.client, e),
            Err(_) => debug!("Reply to {} timed out", query.client),
        }
    }
}
