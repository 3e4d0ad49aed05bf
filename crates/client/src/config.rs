//! Client and pool tuning knobs. Every option has a default and no side effects.

use std::time::Duration;

/// How a TLS capability should treat the peer certificate.
///
/// Part of the [`PoolKey`](crate::PoolKey): connections verified one way are
/// never handed to requests configured the other way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TlsVerification {
    #[default]
    Verify,
    AcceptInvalidCerts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    max_connections: usize,
    max_connections_per_key: usize,
    idle_timeout: Duration,
    happy_eyeballs_delay: Duration,
    dns_ttl: Duration,
    tls_verification: TlsVerification,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_connections_per_key: 0,
            idle_timeout: Duration::from_secs(15),
            happy_eyeballs_delay: Duration::from_millis(250),
            dns_ttl: Duration::from_secs(10),
            tls_verification: TlsVerification::Verify,
        }
    }
}

impl PoolConfig {
    /// Upper bound on live connections across all keys, idle ones included.
    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// Upper bound on live connections per pool key; `0` means only the global bound applies.
    pub fn max_connections_per_key(mut self, max_connections_per_key: usize) -> Self {
        self.max_connections_per_key = max_connections_per_key;
        self
    }

    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn happy_eyeballs_delay(mut self, happy_eyeballs_delay: Duration) -> Self {
        self.happy_eyeballs_delay = happy_eyeballs_delay;
        self
    }

    pub fn dns_ttl(mut self, dns_ttl: Duration) -> Self {
        self.dns_ttl = dns_ttl;
        self
    }

    pub fn tls_verification(mut self, tls_verification: TlsVerification) -> Self {
        self.tls_verification = tls_verification;
        self
    }

    pub fn get_max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn get_max_connections_per_key(&self) -> usize {
        self.max_connections_per_key
    }

    pub fn get_idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn get_happy_eyeballs_delay(&self) -> Duration {
        self.happy_eyeballs_delay
    }

    pub fn get_dns_ttl(&self) -> Duration {
        self.dns_ttl
    }

    pub fn get_tls_verification(&self) -> TlsVerification {
        self.tls_verification
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pool: PoolConfig,
    attempt_timeout: Duration,
    coalesce_threshold: usize,
    idle_sweep_interval: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            attempt_timeout: Duration::from_secs(300),
            coalesce_threshold: 2 * 1024,
            idle_sweep_interval: Some(Duration::from_secs(5)),
        }
    }
}

impl ClientConfig {
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Deadline for one attempt: acquiring a connection, writing the request
    /// and reading the response head. Reading the body is not covered.
    pub fn attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Request bodies of a known size strictly below this go out in the same write as the head.
    pub fn coalesce_threshold(mut self, coalesce_threshold: usize) -> Self {
        self.coalesce_threshold = coalesce_threshold;
        self
    }

    /// Period of the background sweep closing expired idle connections.
    pub fn idle_sweep_interval(mut self, idle_sweep_interval: Duration) -> Self {
        self.idle_sweep_interval = Some(idle_sweep_interval);
        self
    }

    /// Turns the background sweep off; expired idle connections are then only
    /// closed when an acquisition comes across them.
    pub fn disable_idle_sweep(mut self) -> Self {
        self.idle_sweep_interval = None;
        self
    }

    pub fn get_pool(&self) -> &PoolConfig {
        &self.pool
    }

    pub fn get_attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    pub fn get_coalesce_threshold(&self) -> usize {
        self.coalesce_threshold
    }

    pub fn get_idle_sweep_interval(&self) -> Option<Duration> {
        self.idle_sweep_interval
    }
}
