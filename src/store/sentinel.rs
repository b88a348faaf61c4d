//! Redis Sentinel driver.
//!
//! # Responsibilities
//! - Ask each sentinel in turn for the current primary of a service
//! - List healthy replicas for read-only traffic
//! - Open multiplexed connections with connect/socket timeouts
//! - Map redis errors onto the store error taxonomy

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{ErrorKind, RedisError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::StoreConfig;
use crate::store::connection::{StoreAddr, StoreConnection, StoreDriver};
use crate::store::error::{StoreError, StoreResult};

/// Discovery through a set of Redis Sentinel endpoints.
#[derive(Clone)]
pub struct SentinelDriver {
    sentinels: Vec<StoreAddr>,
    db: i64,
    password: Option<String>,
    connect_timeout: Duration,
    socket_timeout: Duration,
}

impl SentinelDriver {
    pub fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        let sentinels = config
            .sentinels
            .iter()
            .map(|s| s.parse::<StoreAddr>())
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Self {
            sentinels,
            db: config.db,
            password: config.password.clone(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            socket_timeout: Duration::from_millis(config.socket_timeout_ms),
        })
    }

    async fn open(&self, url: &str, addr: &StoreAddr) -> StoreResult<MultiplexedConnection> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Protocol(format!("invalid address {}: {}", addr, e)))?;

        match timeout(self.connect_timeout, client.get_multiplexed_async_connection()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(classify(e, addr)),
            Err(_) => Err(StoreError::Timeout(self.connect_timeout)),
        }
    }

    async fn open_sentinel(&self, sentinel: &StoreAddr) -> StoreResult<MultiplexedConnection> {
        self.open(&format!("redis://{}/", sentinel), sentinel).await
    }

    fn node_url(&self, addr: &StoreAddr) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}/{}", password, addr, self.db),
            None => format!("redis://{}/{}", addr, self.db),
        }
    }

    async fn query_primary(&self, sentinel: &StoreAddr, service: &str) -> StoreResult<StoreAddr> {
        let mut conn = self.open_sentinel(sentinel).await?;
        let mut cmd = redis::cmd("SENTINEL");
        cmd.arg("get-master-addr-by-name").arg(service);
        let query = cmd.query_async(&mut conn);

        let reply: Option<(String, String)> = match timeout(self.socket_timeout, query).await {
            Ok(result) => result.map_err(|e| classify(e, sentinel))?,
            Err(_) => return Err(StoreError::Timeout(self.socket_timeout)),
        };

        let (host, port) = reply.ok_or_else(|| {
            StoreError::Discovery(format!("sentinel {} does not know service '{}'", sentinel, service))
        })?;
        format!("{}:{}", host, port).parse()
    }
}

impl fmt::Debug for SentinelDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SentinelDriver")
            .field("sentinels", &self.sentinels)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connect_timeout", &self.connect_timeout)
            .field("socket_timeout", &self.socket_timeout)
            .finish()
    }
}

#[async_trait]
impl StoreDriver for SentinelDriver {
    async fn resolve_primary(&self, service: &str) -> StoreResult<StoreAddr> {
        for (i, sentinel) in self.sentinels.iter().enumerate() {
            match self.query_primary(sentinel, service).await {
                Ok(addr) => {
                    tracing::debug!(sentinel = %sentinel, primary = %addr, "Primary resolved");
                    return Ok(addr);
                }
                Err(e) => {
                    tracing::warn!(sentinel_idx = i, sentinel = %sentinel, error = %e, "Sentinel query failed, trying next");
                }
            }
        }
        Err(StoreError::Discovery(format!(
            "no sentinel could resolve primary for '{}'",
            service
        )))
    }

    async fn resolve_replicas(&self, service: &str) -> StoreResult<Vec<StoreAddr>> {
        for sentinel in &self.sentinels {
            let mut conn = match self.open_sentinel(sentinel).await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(sentinel = %sentinel, error = %e, "Sentinel unreachable");
                    continue;
                }
            };

            let mut cmd = redis::cmd("SENTINEL");
            cmd.arg("replicas").arg(service);
            let query = cmd.query_async(&mut conn);

            let reply: Vec<Vec<String>> = match timeout(self.socket_timeout, query).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) => {
                    tracing::warn!(sentinel = %sentinel, error = %e, "SENTINEL replicas failed");
                    continue;
                }
                Err(_) => {
                    tracing::warn!(sentinel = %sentinel, "SENTINEL replicas timed out");
                    continue;
                }
            };

            return Ok(reply.iter().filter_map(|fields| parse_replica(fields)).collect());
        }
        Err(StoreError::Discovery(format!(
            "no sentinel could list replicas for '{}'",
            service
        )))
    }

    async fn connect(&self, addr: &StoreAddr) -> StoreResult<Arc<dyn StoreConnection>> {
        let conn = self.open(&self.node_url(addr), addr).await?;
        Ok(Arc::new(RedisConnection {
            addr: addr.clone(),
            conn,
            socket_timeout: self.socket_timeout,
        }))
    }
}

/// Replica entries come back as flat `[name, value, name, value, ...]` lists.
fn parse_replica(fields: &[String]) -> Option<StoreAddr> {
    let field = |name: &str| {
        fields
            .chunks(2)
            .find(|pair| pair.len() == 2 && pair[0] == name)
            .map(|pair| pair[1].as_str())
    };

    let flags = field("flags").unwrap_or_default();
    if flags.contains("s_down") || flags.contains("o_down") || flags.contains("disconnected") {
        return None;
    }

    let host = field("ip")?;
    let port = field("port")?.parse().ok()?;
    Some(StoreAddr::new(host, port))
}

fn classify(err: RedisError, addr: &StoreAddr) -> StoreError {
    if err.kind() == ErrorKind::ReadOnly {
        StoreError::ReadOnly(addr.to_string())
    } else if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        StoreError::Connection(format!("{}: {}", addr, err))
    } else {
        StoreError::Protocol(format!("{}: {}", addr, err))
    }
}

/// Multiplexed connection to one Redis node.
#[derive(Clone)]
pub struct RedisConnection {
    addr: StoreAddr,
    conn: MultiplexedConnection,
    socket_timeout: Duration,
}

impl fmt::Debug for RedisConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConnection")
            .field("addr", &self.addr)
            .field("socket_timeout", &self.socket_timeout)
            .finish()
    }
}

impl RedisConnection {
    async fn run<T: redis::FromRedisValue>(&self, cmd: redis::Cmd) -> StoreResult<T> {
        let mut conn = self.conn.clone();
        match timeout(self.socket_timeout, cmd.query_async(&mut conn)).await {
            Ok(result) => result.map_err(|e| classify(e, &self.addr)),
            Err(_) => Err(StoreError::Timeout(self.socket_timeout)),
        }
    }
}

#[async_trait]
impl StoreConnection for RedisConnection {
    fn address(&self) -> &StoreAddr {
        &self.addr
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.run(cmd).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        self.run(cmd).await
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut cmd = redis::cmd("INCR");
        cmd.arg(key);
        self.run(cmd).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut cmd = redis::cmd("PEXPIRE");
        cmd.arg(key).arg(ttl.as_millis().max(1) as u64);
        let updated: i64 = self.run(cmd).await?;
        Ok(updated == 1)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut cmd = redis::cmd("PTTL");
        cmd.arg(key);
        let millis: i64 = self.run(cmd).await?;
        // -2: missing key, -1: no expiry
        Ok((millis >= 0).then(|| Duration::from_millis(millis as u64)))
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("DEL");
        cmd.arg(keys);
        self.run(cmd).await
    }

    async fn ping(&self) -> StoreResult<()> {
        let pong: String = self.run(redis::cmd("PING")).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Protocol(format!("unexpected PING reply '{}'", pong)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    async fn read_command<R: AsyncBufRead + Unpin>(reader: &mut R) -> Option<Vec<String>> {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        let count: usize = line.trim_end().strip_prefix('*')?.parse().ok()?;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            line.clear();
            reader.read_line(&mut line).await.ok()?;
            let len: usize = line.trim_end().strip_prefix('$')?.parse().ok()?;
            let mut buf = vec![0; len + 2];
            reader.read_exact(&mut buf).await.ok()?;
            buf.truncate(len);
            args.push(String::from_utf8(buf).ok()?);
        }
        Some(args)
    }

    fn bulk_array(items: &[&str]) -> String {
        let mut out = format!("*{}\r\n", items.len());
        for item in items {
            out.push_str(&format!("${}\r\n{}\r\n", item.len(), item));
        }
        out
    }

    fn sentinel_reply(args: &[String]) -> String {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["SENTINEL", "get-master-addr-by-name", "mymaster"] => bulk_array(&["10.0.0.1", "6379"]),
            ["SENTINEL", "get-master-addr-by-name", _] => "*-1\r\n".to_string(),
            ["SENTINEL", "replicas", _] => format!(
                "*2\r\n{}{}",
                bulk_array(&["ip", "10.0.0.2", "port", "6380", "flags", "slave"]),
                bulk_array(&["ip", "10.0.0.3", "port", "6381", "flags", "slave,s_down"]),
            ),
            _ => "+OK\r\n".to_string(),
        }
    }

    /// Speaks just enough RESP to answer the discovery queries.
    async fn spawn_sentinel() -> StoreAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (read, mut write) = socket.into_split();
                    let mut reader = BufReader::new(read);
                    while let Some(args) = read_command(&mut reader).await {
                        if write.write_all(sentinel_reply(&args).as_bytes()).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        StoreAddr::new("127.0.0.1", port)
    }

    #[tokio::test]
    async fn test_discovery_queries_against_sentinel() {
        let sentinel = spawn_sentinel().await;
        let config = StoreConfig {
            sentinels: vec![sentinel.to_string()],
            ..StoreConfig::default()
        };
        let driver = SentinelDriver::from_config(&config).unwrap();

        assert_eq!(
            driver.resolve_primary("mymaster").await.unwrap(),
            StoreAddr::new("10.0.0.1", 6379)
        );
        assert_eq!(
            driver.resolve_replicas("mymaster").await.unwrap(),
            vec![StoreAddr::new("10.0.0.2", 6380)]
        );
        assert!(matches!(
            driver.resolve_primary("unknown").await,
            Err(StoreError::Discovery(_))
        ));
    }

    fn fields(pairs: &[(&str, &str)]) -> Vec<String> {
        pairs
            .iter()
            .flat_map(|(k, v)| [k.to_string(), v.to_string()])
            .collect()
    }

    #[test]
    fn test_parse_replica() {
        let replica = fields(&[("name", "10.0.0.2:6379"), ("ip", "10.0.0.2"), ("port", "6379"), ("flags", "slave")]);
        assert_eq!(parse_replica(&replica), Some(StoreAddr::new("10.0.0.2", 6379)));
    }

    #[test]
    fn test_parse_replica_skips_down_nodes() {
        let replica = fields(&[("ip", "10.0.0.3"), ("port", "6379"), ("flags", "slave,s_down")]);
        assert_eq!(parse_replica(&replica), None);
    }

    #[test]
    fn test_from_config_rejects_bad_endpoint() {
        let config = StoreConfig {
            sentinels: vec!["sentinel-1".to_string()],
            ..StoreConfig::default()
        };
        assert!(SentinelDriver::from_config(&config).is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = StoreConfig {
            password: Some("hunter2".to_string()),
            ..StoreConfig::default()
        };
        let driver = SentinelDriver::from_config(&config).unwrap();
        let debug = format!("{:?}", driver);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("***"));
    }

    #[tokio::test]
    async fn test_unreachable_sentinels_fail_discovery() {
        let config = StoreConfig {
            sentinels: vec!["127.0.0.1:1".to_string()],
            connect_timeout_ms: 200,
            ..StoreConfig::default()
        };
        let driver = SentinelDriver::from_config(&config).unwrap();
        let result = driver.resolve_primary("mymaster").await;
        assert!(matches!(result, Err(StoreError::Discovery(_))));
    }
}
