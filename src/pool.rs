//! Connection pooling over the RESP transport.
//!
//! The pool owns a bounded free-list of idle connections to one upstream
//! server. Lending is unbounded (a fresh connection is dialed whenever the
//! free-list is empty); idle retention is capped. Before an idle connection
//! is reused it must answer a PING probe; stale or dead connections are
//! discarded and replaced transparently.
//!
//! Connections are lent exclusively: a [`PoolGuard`] is held by exactly one
//! in-flight request and releases (or discards) its connection on drop, so
//! early returns and cancelled requests never leak a connection.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::command::Command;
use crate::error::GatewayError;

/// Why a RESP exchange failed.
///
/// The split drives the invalidation policy: command-level failures leave the
/// connection reusable, connection-level failures mean it must be discarded.
#[derive(Debug, thiserror::Error)]
pub enum RespFailure {
    /// The upstream replied with an error (wrong type, wrong arity, ...).
    #[error("{0}")]
    Command(String),

    /// The transport itself broke.
    #[error("{0}")]
    Connection(redis::RedisError),
}

impl From<redis::RedisError> for RespFailure {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error()
            || e.is_timeout()
            || e.is_connection_dropped()
            || e.is_connection_refusal()
            || e.is_unrecoverable_error()
        {
            RespFailure::Connection(e)
        } else {
            RespFailure::Command(reply_error_message(&e))
        }
    }
}

/// Formats an upstream error reply the way redis-cli shows it,
/// e.g. `WRONGTYPE Operation against a key holding the wrong kind of value`.
fn reply_error_message(e: &redis::RedisError) -> String {
    match (e.code(), e.detail()) {
        (Some(code), Some(detail)) => format!("{code} {detail}"),
        _ => e.to_string(),
    }
}

/// One live RESP session.
#[async_trait]
pub trait RespTransport: Send {
    /// Round-trips a single command.
    async fn request(&mut self, command: &Command) -> Result<redis::Value, RespFailure>;

    /// Round-trips a MULTI/EXEC block, returning one reply per command.
    async fn transaction(&mut self, commands: &[Command]) -> Result<Vec<redis::Value>, RespFailure>;
}

/// Dials new transport sessions to the configured upstream.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self) -> Result<Box<dyn RespTransport>, RespFailure>;
}

/// Production dialer backed by the `redis` crate.
pub struct RedisDialer {
    client: redis::Client,
}

impl RedisDialer {
    /// Builds a dialer for `addr` (`host:port`; a bare `:port` means
    /// localhost), with optional AUTH credentials.
    ///
    /// # Errors
    /// Returns `UpstreamUnavailable` when the address cannot be parsed.
    pub fn new(
        addr: &str,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, GatewayError> {
        let (host, port) = split_host_port(addr)?;
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(host, port),
            redis: RedisConnectionInfo {
                db: 0,
                username,
                password,
            },
        };
        let client = redis::Client::open(info)
            .map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;
        Ok(Self { client })
    }
}

fn split_host_port(addr: &str) -> Result<(String, u16), GatewayError> {
    let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
        GatewayError::UpstreamUnavailable(format!("invalid upstream address: {addr}"))
    })?;
    let port = port.parse::<u16>().map_err(|_| {
        GatewayError::UpstreamUnavailable(format!("invalid upstream port in: {addr}"))
    })?;
    let host = if host.is_empty() { "127.0.0.1" } else { host };
    Ok((host.to_string(), port))
}

#[async_trait]
impl Dialer for RedisDialer {
    async fn dial(&self) -> Result<Box<dyn RespTransport>, RespFailure> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(Box::new(RedisTransport { conn }))
    }
}

struct RedisTransport {
    conn: MultiplexedConnection,
}

fn build_cmd(command: &Command) -> redis::Cmd {
    let mut cmd = redis::cmd(command.name());
    for arg in command.args() {
        cmd.arg(arg);
    }
    cmd
}

#[async_trait]
impl RespTransport for RedisTransport {
    async fn request(&mut self, command: &Command) -> Result<redis::Value, RespFailure> {
        let value = build_cmd(command)
            .query_async::<_, redis::Value>(&mut self.conn)
            .await?;
        Ok(value)
    }

    async fn transaction(&mut self, commands: &[Command]) -> Result<Vec<redis::Value>, RespFailure> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in commands {
            pipe.add_command(build_cmd(command));
        }
        let replies = pipe
            .query_async::<_, Vec<redis::Value>>(&mut self.conn)
            .await?;
        Ok(replies)
    }
}

/// Pool tuning knobs. Defaults mirror a conventional small gateway pool:
/// three retained idle connections, four-minute idle expiry.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_idle: usize,
    pub idle_timeout: Duration,
    pub dial_timeout: Duration,
    pub probe_timeout: Duration,
    pub dial_attempts: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: 3,
            idle_timeout: Duration::from_secs(240),
            dial_timeout: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(1),
            dial_attempts: 2,
        }
    }
}

struct IdleEntry {
    transport: Box<dyn RespTransport>,
    parked_at: Instant,
}

struct PoolInner {
    dialer: Box<dyn Dialer>,
    idle: Mutex<VecDeque<IdleEntry>>,
    config: PoolConfig,
}

impl PoolInner {
    fn park(&self, transport: Box<dyn RespTransport>) {
        let mut idle = self.idle.lock();
        if idle.len() < self.config.max_idle {
            idle.push_front(IdleEntry {
                transport,
                parked_at: Instant::now(),
            });
        }
        // At capacity the connection is simply dropped.
    }
}

/// Bounded free-list of RESP connections with probe-before-reuse.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    #[must_use]
    pub fn new(dialer: Box<dyn Dialer>, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                dialer,
                idle: Mutex::new(VecDeque::new()),
                config,
            }),
        }
    }

    /// Number of connections currently parked in the free-list.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Lends a live connection, reusing a probed idle one when possible and
    /// dialing otherwise.
    ///
    /// # Errors
    /// `UpstreamUnavailable` when every dial attempt fails or times out.
    pub async fn acquire(&self) -> Result<PoolGuard, GatewayError> {
        let probe = Command::ping();

        loop {
            // The lock must not be held across the probe await.
            let popped = self.inner.idle.lock().pop_front();
            let Some(entry) = popped else { break };
            if entry.parked_at.elapsed() > self.inner.config.idle_timeout {
                debug!("discarding idle connection past idle timeout");
                continue;
            }
            let mut transport = entry.transport;
            let probed =
                timeout(self.inner.config.probe_timeout, transport.request(&probe)).await;
            match probed {
                Ok(Ok(_)) => return Ok(PoolGuard::new(transport, Arc::clone(&self.inner))),
                Ok(Err(e)) => debug!("liveness probe failed, discarding connection: {e}"),
                Err(_) => debug!("liveness probe timed out, discarding connection"),
            }
        }

        self.dial_fresh().await
    }

    async fn dial_fresh(&self) -> Result<PoolGuard, GatewayError> {
        let mut last_error = String::from("no dial attempts configured");
        for attempt in 1..=self.inner.config.dial_attempts {
            match timeout(self.inner.config.dial_timeout, self.inner.dialer.dial()).await {
                Ok(Ok(transport)) => {
                    debug!(attempt, "dialed fresh upstream connection");
                    return Ok(PoolGuard::new(transport, Arc::clone(&self.inner)));
                }
                Ok(Err(e)) => {
                    warn!(attempt, "upstream dial failed: {e}");
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(attempt, "upstream dial timed out");
                    last_error = "dial timed out".to_string();
                }
            }
        }
        Err(GatewayError::UpstreamUnavailable(last_error))
    }
}

/// Exclusive lend of one pooled connection.
///
/// Dropping the guard returns the connection to the free-list, unless
/// [`PoolGuard::invalidate`] was called, in which case the connection is
/// discarded and the next request dials a fresh one.
pub struct PoolGuard {
    transport: Option<Box<dyn RespTransport>>,
    pool: Arc<PoolInner>,
    invalidated: bool,
}

impl PoolGuard {
    fn new(transport: Box<dyn RespTransport>, pool: Arc<PoolInner>) -> Self {
        Self {
            transport: Some(transport),
            pool,
            invalidated: false,
        }
    }

    /// Marks the connection as broken so it is dropped instead of reused.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    /// The lent transport. Present for the guard's whole lifetime.
    pub fn transport(&mut self) -> &mut dyn RespTransport {
        self.transport
            .as_mut()
            .expect("transport present until drop")
            .as_mut()
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.take() {
            if self.invalidated {
                debug!("dropping invalidated connection");
            } else {
                self.pool.park(transport);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockTransport {
        alive: bool,
        requests: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RespTransport for MockTransport {
        async fn request(&mut self, _command: &Command) -> Result<redis::Value, RespFailure> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.alive {
                Ok(redis::Value::Status("PONG".to_string()))
            } else {
                Err(RespFailure::Connection(redis::RedisError::from(
                    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"),
                )))
            }
        }

        async fn transaction(
            &mut self,
            _commands: &[Command],
        ) -> Result<Vec<redis::Value>, RespFailure> {
            unimplemented!("not exercised by pool tests")
        }
    }

    struct MockDialer {
        dials: Arc<AtomicUsize>,
        requests: Arc<AtomicUsize>,
        healthy: bool,
        conn_alive: bool,
    }

    #[async_trait]
    impl Dialer for MockDialer {
        async fn dial(&self) -> Result<Box<dyn RespTransport>, RespFailure> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            if self.healthy {
                Ok(Box::new(MockTransport {
                    alive: self.conn_alive,
                    requests: Arc::clone(&self.requests),
                }))
            } else {
                Err(RespFailure::Connection(redis::RedisError::from(
                    std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
                )))
            }
        }
    }

    fn pool_with(healthy: bool, conn_alive: bool, config: PoolConfig) -> (ConnectionPool, Arc<AtomicUsize>) {
        let dials = Arc::new(AtomicUsize::new(0));
        let dialer = MockDialer {
            dials: Arc::clone(&dials),
            requests: Arc::new(AtomicUsize::new(0)),
            healthy,
            conn_alive,
        };
        (ConnectionPool::new(Box::new(dialer), config), dials)
    }

    #[tokio::test]
    async fn test_acquire_dials_then_reuses() {
        let (pool, dials) = pool_with(true, true, PoolConfig::default());

        let guard = pool.acquire().await.unwrap();
        assert_eq!(dials.load(Ordering::SeqCst), 1);
        drop(guard);
        assert_eq!(pool.idle_count(), 1);

        let _guard = pool.acquire().await.unwrap();
        assert_eq!(dials.load(Ordering::SeqCst), 1, "idle connection reused");
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_probe_redials() {
        let (pool, dials) = pool_with(true, false, PoolConfig::default());

        drop(pool.acquire().await.unwrap());
        assert_eq!(pool.idle_count(), 1);

        // Probe fails on the parked dead connection, so a fresh dial happens.
        let _guard = pool.acquire().await.unwrap();
        assert_eq!(dials.load(Ordering::SeqCst), 2);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_idle_timeout_discards() {
        let config = PoolConfig {
            idle_timeout: Duration::ZERO,
            ..PoolConfig::default()
        };
        let (pool, dials) = pool_with(true, true, config);

        drop(pool.acquire().await.unwrap());
        std::thread::sleep(Duration::from_millis(5));

        let _guard = pool.acquire().await.unwrap();
        assert_eq!(dials.load(Ordering::SeqCst), 2, "stale idle connection not reused");
    }

    #[tokio::test]
    async fn test_invalidated_guard_not_parked() {
        let (pool, dials) = pool_with(true, true, PoolConfig::default());

        let mut guard = pool.acquire().await.unwrap();
        guard.invalidate();
        drop(guard);
        assert_eq!(pool.idle_count(), 0);

        let _guard = pool.acquire().await.unwrap();
        assert_eq!(dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_idle_retention_capped() {
        let (pool, _dials) = pool_with(true, true, PoolConfig::default());

        let guards: Vec<_> = [
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
        ]
        .into();
        drop(guards);

        assert_eq!(pool.idle_count(), 3, "retention capped at max_idle");
    }

    #[tokio::test]
    async fn test_dial_failure_is_upstream_unavailable() {
        let (pool, dials) = pool_with(false, true, PoolConfig::default());

        let err = pool.acquire().await.map(|_| ()).unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnavailable(_)));
        assert_eq!(dials.load(Ordering::SeqCst), 2, "dialing retried once");
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("localhost:6379").unwrap(),
            ("localhost".to_string(), 6379)
        );
        assert_eq!(
            split_host_port(":6379").unwrap(),
            ("127.0.0.1".to_string(), 6379)
        );
        assert!(split_host_port("no-port").is_err());
        assert!(split_host_port("host:notaport").is_err());
    }
}
