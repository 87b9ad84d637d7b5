//! 令牌桶限流
//!
//! 单次评估是一个原子步骤：按流逝时间补充令牌，不足则拒绝并给出重试等待时间。
//! 评估逻辑是纯函数 [`TokenBucket::evaluate`]；共享存储负责原子性
//! （Redis 中以 Lua 脚本执行同一算法，内存实现在互斥锁内执行）。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::Clock;

/// 限流错误类型
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("invalid rate limit parameters: {0}")]
    InvalidParameters(String),
    #[error("rate limit store failure: {message}")]
    Store { message: String },
}

impl RateLimitError {
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// 被拒绝时距离令牌足够还需的秒数；放行时为 0
    pub retry_after_secs: f64,
}

impl RateLimitDecision {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0.0,
        }
    }

    pub fn rejected(retry_after_secs: f64) -> Self {
        Self {
            allowed: false,
            retry_after_secs,
        }
    }

    pub fn retry_after(&self) -> Duration {
        Duration::from_secs_f64(self.retry_after_secs.max(0.0))
    }

    /// `Retry-After` 头使用的整秒数（向上取整）
    pub fn retry_after_header(&self) -> u64 {
        self.retry_after_secs.max(0.0).ceil() as u64
    }
}

/// 单个 key 的持久状态
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    pub remaining: f64,
    pub last_refill_secs: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucket {
    filling_rate: f64,
    capacity: f64,
    expiration: Duration,
}

impl TokenBucket {
    pub fn new(filling_rate: f64, capacity: f64, expiration: Duration) -> Result<Self, RateLimitError> {
        if !(filling_rate.is_finite() && filling_rate > 0.0) {
            return Err(RateLimitError::InvalidParameters(
                "filling rate must be positive".into(),
            ));
        }
        if !(capacity.is_finite() && capacity > 0.0) {
            return Err(RateLimitError::InvalidParameters(
                "capacity must be positive".into(),
            ));
        }
        if expiration.is_zero() {
            return Err(RateLimitError::InvalidParameters(
                "expiration must be positive".into(),
            ));
        }
        Ok(Self {
            filling_rate,
            capacity,
            expiration,
        })
    }

    pub fn from_config(config: &config::BucketConfig) -> Result<Self, RateLimitError> {
        Self::new(
            config.filling_rate,
            config.capacity,
            Duration::from_secs(config.expiration_secs),
        )
    }

    pub fn filling_rate(&self) -> f64 {
        self.filling_rate
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    /// 评估一次请求。放行时返回需要写回的新状态；拒绝时状态不变（返回 `None`）。
    pub fn evaluate(
        &self,
        state: Option<BucketState>,
        now_secs: i64,
        tokens: f64,
    ) -> (RateLimitDecision, Option<BucketState>) {
        let (remaining, last_refill) = match state {
            Some(state) => (state.remaining, state.last_refill_secs),
            None => (self.capacity, 0),
        };
        let elapsed = (now_secs - last_refill).max(0) as f64;
        let refillable = self.capacity.min(remaining + elapsed * self.filling_rate);

        if refillable >= tokens {
            let next = BucketState {
                remaining: refillable - tokens,
                last_refill_secs: now_secs,
            };
            (RateLimitDecision::allowed(), Some(next))
        } else {
            let retry_after = (tokens - refillable) / self.filling_rate;
            (RateLimitDecision::rejected(retry_after), None)
        }
    }
}

/// 状态存储的两个键；哈希标签保证两者落在同一集群槽位
pub fn bucket_keys(key: &str) -> (String, String) {
    (
        format!("{{chat:ratelimit:{key}}}:tokens"),
        format!("{{chat:ratelimit:{key}}}:ts"),
    )
}

/// 原子执行一次令牌桶评估的共享存储
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn evaluate(
        &self,
        key: &str,
        bucket: &TokenBucket,
        now_secs: i64,
        tokens: f64,
    ) -> Result<RateLimitDecision, RateLimitError>;
}

pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    bucket: TokenBucket,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, bucket: TokenBucket, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            bucket,
            clock,
        }
    }

    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }

    pub async fn allow(&self, key: &str, tokens: f64) -> Result<RateLimitDecision, RateLimitError> {
        if !(tokens.is_finite() && tokens > 0.0) {
            return Err(RateLimitError::InvalidParameters(
                "requested tokens must be positive".into(),
            ));
        }
        let decision = self
            .store
            .evaluate(key, &self.bucket, self.clock.now_secs(), tokens)
            .await?;
        if !decision.allowed {
            tracing::debug!(key, retry_after = decision.retry_after_secs, "rate limited");
        }
        Ok(decision)
    }
}

pub mod memory {
    use std::collections::HashMap;

    use tokio::sync::Mutex;

    use super::*;

    struct Entry {
        state: BucketState,
        expires_at_secs: i64,
    }

    /// 进程内存储，在锁内执行与 Lua 脚本相同的算法
    #[derive(Default)]
    pub struct MemoryRateLimitStore {
        entries: Mutex<HashMap<String, Entry>>,
    }

    impl MemoryRateLimitStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn state(&self, key: &str) -> Option<BucketState> {
            self.entries.lock().await.get(key).map(|entry| entry.state)
        }
    }

    #[async_trait]
    impl RateLimitStore for MemoryRateLimitStore {
        async fn evaluate(
            &self,
            key: &str,
            bucket: &TokenBucket,
            now_secs: i64,
            tokens: f64,
        ) -> Result<RateLimitDecision, RateLimitError> {
            let mut entries = self.entries.lock().await;
            let current = entries
                .get(key)
                .filter(|entry| entry.expires_at_secs > now_secs)
                .map(|entry| entry.state);

            let (decision, next) = bucket.evaluate(current, now_secs, tokens);
            if let Some(state) = next {
                entries.insert(
                    key.to_owned(),
                    Entry {
                        state,
                        expires_at_secs: now_secs + bucket.expiration().as_secs() as i64,
                    },
                );
            }
            Ok(decision)
        }
    }
}
