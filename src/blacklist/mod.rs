//! DNS-based blacklist (DNSBL) checker
//!
//! To ask provider `bl.example.net` about `1.2.3.4`, resolve
//! `4.3.2.1.bl.example.net`; an answer in `127.0.0.0/16` means "listed".
//!
//! All providers are asked at once and share one deadline:
//! - the first positive answer wins and the remaining lookups are aborted
//! - once every provider has answered negatively the verdict is "not listed"
//! - if the deadline passes first the verdict is also "not listed"
//!
//! Errors and timeouts count as negative answers. The checker is fail-open
//! so a stalled provider can never hold up the caller.

mod resolver;

pub use resolver::{DnsblResolver, HickoryResolver};

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

/// Shared deadline of one check
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Public DNSBL providers queried by default
pub const DEFAULT_PROVIDERS: [&str; 20] = [
    "b.barracudacentral.org",
    "bl.spamcop.net",
    "cbl.abuseat.org",
    "dnsbl-1.uceprotect.net",
    "dnsbl-2.uceprotect.net",
    "dnsbl-3.uceprotect.net",
    "dnsbl.sorbs.net",
    "spam.dnsbl.sorbs.net",
    "ix.dnsbl.manitu.net",
    "truncate.gbudb.net",
    "zen.spamhaus.org",
    "noptr.spamrats.com",
    "spam.spamrats.com",
    "spam.dnsbl.anonmails.de",
    "singular.ttk.pte.hu",
    "psbl.surriel.com",
    "z.mailspike.net",
    "bl.mailspike.net",
    "dnsbl.kempt.net",
    "dnsbl.zapbl.net",
];

/// Name to resolve when asking `provider` about `suspect`
pub fn lookup_name(suspect: Ipv4Addr, provider: &str) -> String {
    let [a, b, c, d] = suspect.octets();
    format!("{}.{}.{}.{}.{}", d, c, b, a, provider)
}

/// Whether a resolved address is a positive listing (127.0.0.0/16)
pub fn is_blacklist_indication(ip: Ipv4Addr) -> bool {
    let [a, b, _, _] = ip.octets();
    a == 127 && b == 0
}

/// Concurrent DNSBL checker
#[derive(Clone)]
pub struct BlacklistChecker {
    providers: Arc<[String]>,
    timeout: Duration,
    resolver: Arc<dyn DnsblResolver>,
}

impl BlacklistChecker {
    /// Checker resolving through the system's name servers
    pub fn new(providers: Vec<String>, timeout: Duration) -> Self {
        Self::with_resolver(providers, timeout, Arc::new(HickoryResolver::from_system_conf()))
    }

    /// Checker using a custom resolver
    pub fn with_resolver(
        providers: Vec<String>,
        timeout: Duration,
        resolver: Arc<dyn DnsblResolver>,
    ) -> Self {
        Self {
            providers: providers.into(),
            timeout,
            resolver,
        }
    }

    /// Checker with the default providers and deadline
    pub fn with_defaults() -> Self {
        Self::new(
            DEFAULT_PROVIDERS.iter().map(|p| p.to_string()).collect(),
            DEFAULT_TIMEOUT,
        )
    }

    pub fn providers(&self) -> &[String] {
        &self.providers
    }

    /// Name of the first provider listing `suspect`, or `None`
    pub async fn is_blacklisted(&self, suspect: IpAddr) -> Option<String> {
        let suspect = match suspect {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(ip) => ip.to_ipv4_mapped()?,
        };
        if self.providers.is_empty() {
            return None;
        }

        let deadline = Instant::now() + self.timeout;
        let (tx, mut rx) = mpsc::channel(self.providers.len());
        // Dropping the set aborts lookups still in flight
        let mut lookups = JoinSet::new();

        for provider in self.providers.iter() {
            let name = lookup_name(suspect, provider);
            let provider = provider.clone();
            let resolver = self.resolver.clone();
            let tx = tx.clone();

            lookups.spawn(async move {
                let listed = match timeout_at(deadline, resolver.lookup_ipv4(&name)).await {
                    Ok(Ok(ips)) => ips.into_iter().any(is_blacklist_indication),
                    Ok(Err(e)) => {
                        trace!("DNSBL lookup {} failed: {}", name, e);
                        false
                    }
                    Err(_) => false,
                };
                let _ = tx.send((provider, listed)).await;
            });
        }
        drop(tx);

        let mut replies = 0;
        loop {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some((provider, true))) => {
                    debug!("{} is listed by {}", suspect, provider);
                    return Some(provider);
                }
                Ok(Some((_, false))) => {
                    replies += 1;
                    if replies == self.providers.len() {
                        return None;
                    }
                }
                Ok(None) => return None,
                Err(_) => {
                    debug!("DNSBL check of {} reached its deadline", suspect);
                    return None;
                }
            }
        }
    }
}

impl std::fmt::Debug for BlacklistChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlacklistChecker")
            .field("providers", &self.providers.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    enum Answer {
        Listed(Ipv4Addr),
        NoRecord,
        Fail,
        Stall,
    }

    /// Answers by provider suffix and counts lookups
    struct MockResolver {
        answers: HashMap<String, Answer>,
        lookups: AtomicUsize,
    }

    impl MockResolver {
        fn new(answers: &[(&str, Answer)]) -> Arc<Self> {
            Arc::new(Self {
                answers: answers
                    .iter()
                    .map(|(p, a)| (p.to_string(), a.clone()))
                    .collect(),
                lookups: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DnsblResolver for MockResolver {
        async fn lookup_ipv4(&self, name: &str) -> io::Result<Vec<Ipv4Addr>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let answer = self
                .answers
                .iter()
                .find(|(provider, _)| name.ends_with(provider.as_str()))
                .map(|(_, a)| a.clone())
                .unwrap_or(Answer::NoRecord);

            match answer {
                Answer::Listed(ip) => Ok(vec![ip]),
                Answer::NoRecord => Ok(Vec::new()),
                Answer::Fail => Err(io::Error::new(io::ErrorKind::Other, "SERVFAIL")),
                Answer::Stall => std::future::pending().await,
            }
        }
    }

    fn checker(providers: &[&str], resolver: Arc<MockResolver>) -> BlacklistChecker {
        BlacklistChecker::with_resolver(
            providers.iter().map(|p| p.to_string()).collect(),
            DEFAULT_TIMEOUT,
            resolver,
        )
    }

    fn suspect() -> IpAddr {
        "1.2.3.4".parse().unwrap()
    }

    #[test]
    fn test_lookup_name() {
        assert_eq!(
            lookup_name(Ipv4Addr::new(1, 2, 3, 4), "bl.example.net"),
            "4.3.2.1.bl.example.net"
        );
    }

    #[test]
    fn test_indication_range() {
        assert!(is_blacklist_indication(Ipv4Addr::new(127, 0, 0, 2)));
        assert!(is_blacklist_indication(Ipv4Addr::new(127, 0, 255, 255)));
        assert!(!is_blacklist_indication(Ipv4Addr::new(127, 1, 0, 2)));
        assert!(!is_blacklist_indication(Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_positive_wins_before_deadline() {
        let resolver = MockResolver::new(&[("p1", Answer::Listed(Ipv4Addr::new(127, 0, 0, 2)))]);
        let checker = checker(&["p1", "p2", "p3", "p4"], resolver);

        let start = Instant::now();
        assert_eq!(checker.is_blacklisted(suspect()).await.as_deref(), Some("p1"));
        assert!(start.elapsed() < DEFAULT_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_positive_beats_stalled_providers() {
        let resolver = MockResolver::new(&[
            ("slow1", Answer::Stall),
            ("slow2", Answer::Stall),
            ("p1", Answer::Listed(Ipv4Addr::new(127, 0, 0, 4))),
        ]);
        let checker = checker(&["slow1", "slow2", "p1"], resolver);

        let start = Instant::now();
        assert_eq!(checker.is_blacklisted(suspect()).await.as_deref(), Some("p1"));
        assert!(start.elapsed() < DEFAULT_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_stalled_fails_open_at_deadline() {
        let resolver = MockResolver::new(&[
            ("p1", Answer::Stall),
            ("p2", Answer::Stall),
            ("p3", Answer::Stall),
        ]);
        let checker = checker(&["p1", "p2", "p3"], resolver);

        let start = Instant::now();
        assert_eq!(checker.is_blacklisted(suspect()).await, None);
        assert_eq!(start.elapsed(), DEFAULT_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_negative_returns_immediately() {
        let resolver = MockResolver::new(&[
            ("p2", Answer::Fail),
            ("p3", Answer::Listed(Ipv4Addr::new(10, 0, 0, 1))),
        ]);
        let checker = checker(&["p1", "p2", "p3"], resolver.clone());

        let start = Instant::now();
        assert_eq!(checker.is_blacklisted(suspect()).await, None);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_ipv6_suspect_is_not_looked_up() {
        let resolver = MockResolver::new(&[("p1", Answer::Listed(Ipv4Addr::new(127, 0, 0, 2)))]);
        let checker = checker(&["p1"], resolver.clone());

        assert_eq!(checker.is_blacklisted("2001:db8::1".parse().unwrap()).await, None);
        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_providers() {
        let checker = checker(&[], MockResolver::new(&[]));
        assert_eq!(checker.is_blacklisted(suspect()).await, None);
    }

    #[tokio::test]
    async fn test_default_providers() {
        let checker = BlacklistChecker::with_defaults();
        assert_eq!(checker.providers().len(), 20);
        assert!(checker.providers().iter().any(|p| p == "zen.spamhaus.org"));
    }
}
