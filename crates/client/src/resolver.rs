//! Host name resolution with a TTL cache and coalesced lookups.

use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Turns a host name into candidate addresses.
#[async_trait]
pub trait Resolve: Send + Sync + 'static {
    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolves through the system resolver (`getaddrinfo`) on the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct GaiResolver;

#[async_trait]
impl Resolve for GaiResolver {
    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addresses: Vec<IpAddr> = tokio::net::lookup_host((host, 0)).await?.map(|address| address.ip()).collect();
        if addresses.is_empty() {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {host}")));
        }
        Ok(addresses)
    }
}

type Lookup = Shared<BoxFuture<'static, Result<Arc<[IpAddr]>, Arc<io::Error>>>>;

enum Entry {
    Resolved { addresses: Arc<[IpAddr]>, expires: Instant },
    Pending(Lookup),
}

/// Memoizes resolutions for a TTL.
///
/// Concurrent misses for one host share a single underlying lookup. Failures
/// are handed to every waiter of that lookup and then forgotten, so the next
/// call tries again.
pub struct ResolverCache {
    resolver: Arc<dyn Resolve>,
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl std::fmt::Debug for ResolverCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverCache").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl ResolverCache {
    pub fn new(resolver: Arc<dyn Resolve>, ttl: Duration) -> Self {
        Self { resolver, ttl, entries: Mutex::new(HashMap::new()) }
    }

    /// Returns the addresses of `host`, ordered for connection attempts.
    ///
    /// IP literals are returned as is without a lookup.
    pub async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        if let Ok(ip) = host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        let lookup = {
            let now = Instant::now();
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            match entries.get(host) {
                Some(Entry::Resolved { addresses, expires }) if *expires > now => {
                    trace!(host, "resolver cache hit");
                    return Ok(addresses.to_vec());
                }
                Some(Entry::Pending(lookup)) => {
                    trace!(host, "join in-flight lookup");
                    lookup.clone()
                }
                _ => {
                    // a miss also drops every expired entry
                    entries.retain(|_, entry| !matches!(entry, Entry::Resolved { expires, .. } if *expires <= now));
                    let lookup = self.start_lookup(host);
                    entries.insert(host.to_string(), Entry::Pending(lookup.clone()));
                    lookup
                }
            }
        };

        let result = lookup.await;

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let pending = matches!(entries.get(host), Some(Entry::Pending(_)));
        match result {
            Ok(addresses) => {
                if pending {
                    let expires = Instant::now() + self.ttl;
                    entries.insert(host.to_string(), Entry::Resolved { addresses: Arc::clone(&addresses), expires });
                }
                Ok(addresses.to_vec())
            }
            Err(e) => {
                if pending {
                    entries.remove(host);
                }
                Err(io::Error::new(e.kind(), e.to_string()))
            }
        }
    }

    /// Drops every cached and in-flight entry.
    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn start_lookup(&self, host: &str) -> Lookup {
        debug!(host, "resolve host");
        let resolver = Arc::clone(&self.resolver);
        let host = host.to_string();
        async move {
            match resolver.resolve(&host).await {
                Ok(addresses) if addresses.is_empty() => {
                    Err(Arc::new(io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {host}"))))
                }
                Ok(addresses) => Ok(Arc::from(interleave_families(addresses))),
                Err(e) => {
                    debug!(host, cause = %e, "resolve host failed");
                    Err(Arc::new(e))
                }
            }
        }
        .boxed()
        .shared()
    }
}

/// Alternates address families, starting with the family of the first address.
pub(crate) fn interleave_families(addresses: Vec<IpAddr>) -> Vec<IpAddr> {
    let Some(first) = addresses.first() else {
        return addresses;
    };
    let first_is_v6 = first.is_ipv6();

    let (mut preferred, mut other): (Vec<IpAddr>, Vec<IpAddr>) =
        addresses.into_iter().partition(|address| address.is_ipv6() == first_is_v6);
    preferred.reverse();
    other.reverse();

    let mut ordered = Vec::with_capacity(preferred.len() + other.len());
    loop {
        match (preferred.pop(), other.pop()) {
            (None, None) => return ordered,
            (a, b) => ordered.extend(a.into_iter().chain(b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingResolver {
        fn new(delay: Duration, fail: bool) -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), delay, fail })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Resolve for CountingResolver {
        async fn resolve(&self, _host: &str) -> io::Result<Vec<IpAddr>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such host"));
            }
            Ok(vec!["10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_lookups_are_coalesced() {
        let resolver = CountingResolver::new(Duration::from_millis(50), false);
        let cache = ResolverCache::new(resolver.clone(), Duration::from_secs(10));

        let (a, b, c) = tokio::join!(cache.resolve("example.com"), cache.resolve("example.com"), cache.resolve("example.com"));

        assert_eq!(resolver.calls(), 1);
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(c.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let resolver = CountingResolver::new(Duration::ZERO, false);
        let cache = ResolverCache::new(resolver.clone(), Duration::from_secs(10));

        cache.resolve("example.com").await.unwrap();
        cache.resolve("example.com").await.unwrap();
        assert_eq!(resolver.calls(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        cache.resolve("example.com").await.unwrap();
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_dropped_on_a_miss() {
        let resolver = CountingResolver::new(Duration::ZERO, false);
        let cache = ResolverCache::new(resolver.clone(), Duration::from_secs(10));

        cache.resolve("a.example").await.unwrap();
        cache.resolve("b.example").await.unwrap();
        assert_eq!(cache.entries.lock().unwrap().len(), 2);

        tokio::time::advance(Duration::from_secs(11)).await;
        cache.resolve("c.example").await.unwrap();

        let entries = cache.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("c.example"));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_not_cached() {
        let resolver = CountingResolver::new(Duration::ZERO, true);
        let cache = ResolverCache::new(resolver.clone(), Duration::from_secs(10));

        assert_eq!(cache.resolve("nowhere.invalid").await.unwrap_err().kind(), io::ErrorKind::NotFound);
        assert!(cache.resolve("nowhere.invalid").await.is_err());
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test]
    async fn ip_literals_bypass_resolution() {
        let resolver = CountingResolver::new(Duration::ZERO, false);
        let cache = ResolverCache::new(resolver.clone(), Duration::from_secs(10));

        assert_eq!(cache.resolve("127.0.0.1").await.unwrap(), vec!["127.0.0.1".parse::<IpAddr>().unwrap()]);
        assert_eq!(cache.resolve("::1").await.unwrap(), vec!["::1".parse::<IpAddr>().unwrap()]);
        assert_eq!(resolver.calls(), 0);
    }

    #[test]
    fn interleaves_families_from_the_first() {
        let addresses: Vec<IpAddr> =
            ["::1", "::2", "::3", "10.0.0.1", "10.0.0.2"].iter().map(|address| address.parse().unwrap()).collect();
        let ordered: Vec<String> = interleave_families(addresses).iter().map(ToString::to_string).collect();
        assert_eq!(ordered, ["::1", "10.0.0.1", "::2", "10.0.0.2", "::3"]);
    }
}
