//! Distributed token-bucket rate limiting.
//!
//! # Storage Layout
//! ```text
//! {prefix}:{caller}:bucket      JSON {tokens, last_refill}, TTL record_ttl
//! {prefix}:{caller}:violations  INCR counter,               TTL record_ttl
//! {prefix}:{caller}:blocked     blocked_until (unix secs),  TTL block_duration
//! ```
//!
//! # Design Decisions
//! - State lives in the shared store so the limit holds across instances
//! - The read-modify-write is not atomic; racing requests for one caller may
//!   over-admit slightly
//! - Fail open: if the store cannot be reached the request is allowed
//! - Denials are `Decision` values, not errors

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RateLimitConfig;
use crate::observability::metrics;
use crate::security::access_control::{Access, CallerAccessList};
use crate::security::clock::{Clock, SystemClock};
use crate::store::{FailoverManager, StoreConnection, StoreError, StoreResult};

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// A token was consumed.
    Allowed { remaining: f64 },
    /// Bucket empty; try again after `retry_after_secs`.
    Throttled { retry_after_secs: f64, violations: u32 },
    /// Caller is blocked until `blocked_until` (unix seconds).
    Blocked { blocked_until: f64, retry_after_secs: f64 },
    /// Store unavailable; allowed without enforcement.
    FailOpen,
    /// Allowlisted caller or limiting disabled.
    Bypassed,
    /// Denylisted caller.
    Denied,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(
            self,
            Decision::Allowed { .. } | Decision::FailOpen | Decision::Bypassed
        )
    }

    pub fn retry_after_secs(&self) -> Option<f64> {
        match self {
            Decision::Throttled { retry_after_secs, .. }
            | Decision::Blocked { retry_after_secs, .. } => Some(*retry_after_secs),
            _ => None,
        }
    }

    pub fn blocked_until(&self) -> Option<f64> {
        match self {
            Decision::Blocked { blocked_until, .. } => Some(*blocked_until),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allowed { .. } => "allowed",
            Decision::Throttled { .. } => "throttled",
            Decision::Blocked { .. } => "blocked",
            Decision::FailOpen => "fail_open",
            Decision::Bypassed => "bypassed",
            Decision::Denied => "denied",
        }
    }
}

/// Stored state of one caller, for inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitRecord {
    pub caller: String,
    pub tokens: f64,
    pub last_refill: Option<f64>,
    pub violation_count: u32,
    pub blocked_until: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Bucket {
    tokens: f64,
    last_refill: f64,
}

impl Bucket {
    fn full(config: &RateLimitConfig, now: f64) -> Self {
        Self {
            tokens: config.max_tokens,
            last_refill: now,
        }
    }

    /// Tokens available at `now`, clamped to [0, max_tokens].
    fn refilled(&self, config: &RateLimitConfig, now: f64) -> f64 {
        let elapsed = (now - self.last_refill).max(0.0);
        let tokens = self.tokens + elapsed * config.refill_rate;
        if tokens.is_nan() {
            return config.max_tokens;
        }
        tokens.clamp(0.0, config.max_tokens)
    }
}

struct RecordKeys<'a> {
    caller: &'a str,
    bucket: String,
    violations: String,
    blocked: String,
}

impl<'a> RecordKeys<'a> {
    fn new(prefix: &str, caller: &'a str) -> Self {
        Self {
            caller,
            bucket: format!("{}:{}:bucket", prefix, caller),
            violations: format!("{}:{}:violations", prefix, caller),
            blocked: format!("{}:{}:blocked", prefix, caller),
        }
    }

    fn all(&self) -> [String; 3] {
        [self.bucket.clone(), self.violations.clone(), self.blocked.clone()]
    }
}

struct LimiterSettings {
    config: RateLimitConfig,
    access: CallerAccessList,
}

impl LimiterSettings {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            access: CallerAccessList::from_config(&config),
            config,
        }
    }
}

/// Per-caller token bucket backed by the replicated store.
pub struct RateLimiter {
    store: Arc<FailoverManager>,
    settings: ArcSwap<LimiterSettings>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settings = self.settings.load();
        f.debug_struct("RateLimiter")
            .field("enabled", &settings.config.enabled)
            .field("max_tokens", &settings.config.max_tokens)
            .field("refill_rate", &settings.config.refill_rate)
            .finish()
    }
}

impl RateLimiter {
    pub fn new(store: Arc<FailoverManager>, config: RateLimitConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<FailoverManager>,
        config: RateLimitConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            settings: ArcSwap::from_pointee(LimiterSettings::new(config)),
            clock,
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.settings.load().config.clone()
    }

    /// Swap in new settings; in-flight checks finish with the old ones.
    pub fn update_config(&self, config: RateLimitConfig) {
        tracing::info!(
            enabled = config.enabled,
            max_tokens = config.max_tokens,
            refill_rate = config.refill_rate,
            "Rate limiter settings updated"
        );
        self.settings.store(Arc::new(LimiterSettings::new(config)));
    }

    /// Admit or reject one request from `caller`. Never fails.
    pub async fn try_consume(&self, caller: &str) -> Decision {
        let decision = self.decide(caller).await;
        metrics::record_rate_limit_decision(decision.as_str());
        decision
    }

    async fn decide(&self, caller: &str) -> Decision {
        let settings = self.settings.load_full();
        if !settings.config.enabled {
            return Decision::Bypassed;
        }

        match settings.access.check(caller) {
            Access::Allow => return Decision::Bypassed,
            Access::Deny => {
                tracing::debug!(caller = %caller, "Denylisted caller rejected");
                return Decision::Denied;
            }
            Access::Limit => {}
        }

        let now = self.clock.now();
        let keys = RecordKeys::new(&settings.config.key_prefix, caller);
        let config = &settings.config;

        match self
            .store
            .execute_with_retry(|conn| consume(conn, config, &keys, now), None)
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(caller = %caller, error = %e, "Rate limit store unavailable, failing open");
                Decision::FailOpen
            }
        }
    }

    /// Delete every record for `caller`, returning how many existed.
    pub async fn reset(&self, caller: &str) -> StoreResult<u64> {
        let settings = self.settings.load_full();
        let keys = RecordKeys::new(&settings.config.key_prefix, caller);
        let all = keys.all();

        let removed = self
            .store
            .execute_with_retry(|conn| {
                let all = all.clone();
                async move { conn.del(&all).await }
            }, None)
            .await?;

        tracing::info!(caller = %caller, removed = removed, "Rate limit records reset");
        Ok(removed)
    }

    /// Stored state for `caller` without consuming a token. Reads from a
    /// replica when one is connected.
    pub async fn peek(&self, caller: &str) -> StoreResult<RateLimitRecord> {
        let settings = self.settings.load_full();
        let config = &settings.config;
        let keys = RecordKeys::new(&config.key_prefix, caller);
        let conn = self.store.get_connection(true)?;
        let now = self.clock.now();

        let bucket = read_bucket(conn.as_ref(), &keys).await?;
        let violation_count = conn
            .get(&keys.violations)
            .await?
            .and_then(|raw| raw.parse::<u32>().ok())
            .unwrap_or(0);
        let blocked_until = conn
            .get(&keys.blocked)
            .await?
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|until| *until > now);

        Ok(RateLimitRecord {
            caller: caller.to_string(),
            tokens: bucket
                .map(|b| b.refilled(config, now))
                .unwrap_or(config.max_tokens),
            last_refill: bucket.map(|b| b.last_refill),
            violation_count,
            blocked_until,
        })
    }
}

async fn read_bucket(conn: &dyn StoreConnection, keys: &RecordKeys<'_>) -> StoreResult<Option<Bucket>> {
    let Some(raw) = conn.get(&keys.bucket).await? else {
        return Ok(None);
    };
    match serde_json::from_str::<Bucket>(&raw) {
        Ok(bucket) => Ok(Some(bucket)),
        Err(e) => {
            tracing::warn!(caller = %keys.caller, error = %e, "Corrupt rate limit bucket, starting fresh");
            Ok(None)
        }
    }
}

fn encode(bucket: &Bucket) -> StoreResult<String> {
    serde_json::to_string(bucket).map_err(|e| StoreError::Protocol(e.to_string()))
}

async fn consume(
    conn: Arc<dyn StoreConnection>,
    config: &RateLimitConfig,
    keys: &RecordKeys<'_>,
    now: f64,
) -> StoreResult<Decision> {
    if let Some(raw) = conn.get(&keys.blocked).await? {
        match raw.parse::<f64>() {
            Ok(until) if now < until => {
                return Ok(Decision::Blocked {
                    blocked_until: until,
                    retry_after_secs: until - now,
                });
            }
            _ => {
                conn.del(&keys.all()).await?;
                tracing::info!(caller = %keys.caller, "Block expired, caller starts fresh");
            }
        }
    }

    let bucket = read_bucket(conn.as_ref(), keys)
        .await?
        .unwrap_or_else(|| Bucket::full(config, now));
    let tokens = bucket.refilled(config, now);
    let record_ttl = Some(Duration::from_secs(config.record_ttl_secs));

    if tokens >= 1.0 {
        let remaining = tokens - 1.0;
        let updated = Bucket { tokens: remaining, last_refill: now };
        conn.set(&keys.bucket, &encode(&updated)?, record_ttl).await?;
        conn.del(std::slice::from_ref(&keys.violations)).await?;
        return Ok(Decision::Allowed { remaining });
    }

    let updated = Bucket { tokens, last_refill: now };
    conn.set(&keys.bucket, &encode(&updated)?, record_ttl).await?;

    let violations = conn.incr(&keys.violations).await?;
    conn.expire(&keys.violations, Duration::from_secs(config.record_ttl_secs)).await?;
    let violations = u32::try_from(violations).unwrap_or(u32::MAX);

    if violations >= config.violation_threshold {
        let blocked_until = now + config.block_duration_secs as f64;
        conn.set(
            &keys.blocked,
            &blocked_until.to_string(),
            Some(Duration::from_secs(config.block_duration_secs)),
        )
        .await?;
        // The next request after the block starts from a full bucket.
        conn.del(&[keys.bucket.clone(), keys.violations.clone()]).await?;

        tracing::warn!(
            caller = %keys.caller,
            violations = violations,
            block_secs = config.block_duration_secs,
            "Caller blocked after repeated rate limit violations"
        );
        return Ok(Decision::Blocked {
            blocked_until,
            retry_after_secs: config.block_duration_secs as f64,
        });
    }

    tracing::debug!(caller = %keys.caller, violations = violations, "Rate limit exceeded");
    Ok(Decision::Throttled {
        retry_after_secs: (1.0 - tokens) / config.refill_rate,
        violations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, RetryConfig, StoreConfig};
    use crate::security::clock::ManualClock;
    use crate::store::{MemoryCluster, StoreDriver};

    const START: f64 = 1_700_000_000.0;

    async fn setup(config: RateLimitConfig) -> (RateLimiter, Arc<ManualClock>, MemoryCluster) {
        let cluster = MemoryCluster::local();
        let store = Arc::new(FailoverManager::new(
            Arc::new(cluster.clone()),
            &StoreConfig::default(),
            &CircuitBreakerConfig::default(),
            &RetryConfig {
                max_attempts: 1,
                ..RetryConfig::default()
            },
        ));
        store.init().await.unwrap();
        let clock = Arc::new(ManualClock::new(START));
        let limiter = RateLimiter::with_clock(store, config, clock.clone());
        (limiter, clock, cluster)
    }

    fn config(max_tokens: f64, refill_rate: f64) -> RateLimitConfig {
        RateLimitConfig {
            max_tokens,
            refill_rate,
            ..RateLimitConfig::default()
        }
    }

    #[tokio::test]
    async fn test_burst_then_refill() {
        let (limiter, clock, _cluster) = setup(config(5.0, 1.0)).await;

        for _ in 0..5 {
            assert!(limiter.try_consume("u1").await.is_allowed());
        }

        let denied = limiter.try_consume("u1").await;
        assert!(!denied.is_allowed());
        let retry_after = denied.retry_after_secs().unwrap();
        assert!((retry_after - 1.0).abs() < 1e-9);

        clock.advance(Duration::from_secs(1));
        assert!(limiter.try_consume("u1").await.is_allowed());
    }

    #[tokio::test]
    async fn test_callers_are_independent() {
        let (limiter, _clock, _cluster) = setup(config(1.0, 0.1)).await;

        assert!(limiter.try_consume("a").await.is_allowed());
        assert!(!limiter.try_consume("a").await.is_allowed());
        assert!(limiter.try_consume("b").await.is_allowed());
    }

    #[tokio::test]
    async fn test_steady_rate_is_never_blocked() {
        let (limiter, clock, _cluster) = setup(config(1.0, 2.0)).await;

        for _ in 0..50 {
            let decision = limiter.try_consume("steady").await;
            assert!(decision.is_allowed(), "unexpected {:?}", decision);
            clock.advance(Duration::from_millis(500));
        }
    }

    #[tokio::test]
    async fn test_tokens_stay_in_bounds() {
        let (limiter, clock, _cluster) = setup(config(3.0, 0.5)).await;

        for i in 0..40 {
            let _ = limiter.try_consume("u").await;
            clock.advance(Duration::from_millis(if i % 7 == 0 { 9000 } else { 100 }));
            let record = limiter.peek("u").await.unwrap();
            assert!(record.tokens >= 0.0 && record.tokens <= 3.0, "tokens {}", record.tokens);
        }
    }

    #[tokio::test]
    async fn test_block_escalation_and_release() {
        let cfg = RateLimitConfig {
            violation_threshold: 3,
            block_duration_secs: 60,
            ..config(1.0, 0.01)
        };
        let (limiter, clock, _cluster) = setup(cfg).await;

        assert!(limiter.try_consume("u1").await.is_allowed());
        assert!(matches!(limiter.try_consume("u1").await, Decision::Throttled { violations: 1, .. }));
        assert!(matches!(limiter.try_consume("u1").await, Decision::Throttled { violations: 2, .. }));

        let blocked = limiter.try_consume("u1").await;
        assert_eq!(blocked.blocked_until(), Some(START + 60.0));

        clock.advance(Duration::from_secs(30));
        assert!(matches!(limiter.try_consume("u1").await, Decision::Blocked { .. }));

        clock.advance(Duration::from_secs(30));
        let fresh = limiter.try_consume("u1").await;
        assert_eq!(fresh, Decision::Allowed { remaining: 0.0 });

        let record = limiter.peek("u1").await.unwrap();
        assert_eq!(record.violation_count, 0);
        assert_eq!(record.blocked_until, None);
    }

    #[tokio::test]
    async fn test_allowed_request_resets_violations() {
        let (limiter, clock, _cluster) = setup(config(1.0, 1.0)).await;

        let _ = limiter.try_consume("u").await;
        let _ = limiter.try_consume("u").await;
        assert_eq!(limiter.peek("u").await.unwrap().violation_count, 1);

        clock.advance(Duration::from_secs(1));
        assert!(limiter.try_consume("u").await.is_allowed());
        assert_eq!(limiter.peek("u").await.unwrap().violation_count, 0);
    }

    #[tokio::test]
    async fn test_fail_open_when_store_down() {
        let (limiter, _clock, cluster) = setup(config(1.0, 0.01)).await;
        cluster.kill_all();

        for _ in 0..10 {
            assert_eq!(limiter.try_consume("u1").await, Decision::FailOpen);
        }
    }

    #[tokio::test]
    async fn test_allow_and_deny_lists() {
        let cfg = RateLimitConfig {
            allowlist: vec!["ops".into()],
            denylist: vec!["spam".into()],
            ..config(1.0, 0.01)
        };
        let (limiter, _clock, cluster) = setup(cfg).await;

        for _ in 0..5 {
            assert_eq!(limiter.try_consume("ops").await, Decision::Bypassed);
        }
        assert_eq!(limiter.try_consume("spam").await, Decision::Denied);
        assert_eq!(cluster.key_count(), 0);
    }

    #[tokio::test]
    async fn test_reset_restores_full_bucket() {
        let (limiter, _clock, _cluster) = setup(config(2.0, 0.01)).await;
        let _ = limiter.try_consume("u").await;
        let _ = limiter.try_consume("u").await;
        assert!(!limiter.try_consume("u").await.is_allowed());

        assert!(limiter.reset("u").await.unwrap() >= 2);
        assert_eq!(limiter.peek("u").await.unwrap().tokens, 2.0);
        assert!(limiter.try_consume("u").await.is_allowed());
    }

    #[tokio::test]
    async fn test_update_config_applies_live() {
        let (limiter, _clock, _cluster) = setup(config(1.0, 0.01)).await;
        let _ = limiter.try_consume("u").await;
        assert!(!limiter.try_consume("u").await.is_allowed());

        limiter.update_config(RateLimitConfig {
            enabled: false,
            ..config(1.0, 0.01)
        });
        assert_eq!(limiter.try_consume("u").await, Decision::Bypassed);
        assert!(!limiter.config().enabled);
    }

    #[tokio::test]
    async fn test_corrupt_bucket_treated_as_fresh() {
        let (limiter, _clock, cluster) = setup(config(2.0, 0.01)).await;
        let conn = cluster.connect(&cluster.primary()).await.unwrap();
        conn.set("throttle:u:bucket", "not json", None).await.unwrap();

        assert_eq!(limiter.try_consume("u").await, Decision::Allowed { remaining: 1.0 });
    }
}
