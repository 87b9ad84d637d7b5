//! 令牌桶的 Redis 实现：整个评估在一个 Lua 脚本内原子执行。

use application::rate_limiter::bucket_keys;
use application::{RateLimitDecision, RateLimitError, RateLimitStore, TokenBucket};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use super::error::RedisError;

// Redis 会把 Lua 数字返回值截断为整数，重试时间以字符串返回
const TOKEN_BUCKET_SCRIPT: &str = r#"
local tokens_key = KEYS[1]
local timestamp_key = KEYS[2]

local rate = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local requested = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])

local last_tokens = tonumber(redis.call("get", tokens_key))
if last_tokens == nil then
  last_tokens = capacity
end

local last_refreshed = tonumber(redis.call("get", timestamp_key))
if last_refreshed == nil then
  last_refreshed = 0
end

local delta = math.max(0, now - last_refreshed)
local filled_tokens = math.min(capacity, last_tokens + (delta * rate))

if filled_tokens >= requested then
  redis.call("setex", tokens_key, ttl, tostring(filled_tokens - requested))
  redis.call("setex", timestamp_key, ttl, tostring(now))
  return { 1, "0" }
end

return { 0, tostring((requested - filled_tokens) / rate) }
"#;

pub struct RedisRateLimitStore {
    conn: ConnectionManager,
    script: Script,
}

impl RedisRateLimitStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            script: Script::new(TOKEN_BUCKET_SCRIPT),
        }
    }
}

fn decode_reply(allowed: i64, retry_after: &str) -> Result<RateLimitDecision, RedisError> {
    let retry_after: f64 = retry_after
        .trim()
        .parse()
        .map_err(|_| RedisError::UnexpectedReply {
            message: format!("retry_after {retry_after:?} is not a number"),
        })?;
    match allowed {
        1 => Ok(RateLimitDecision::allowed()),
        0 => Ok(RateLimitDecision::rejected(retry_after)),
        other => Err(RedisError::UnexpectedReply {
            message: format!("allowed flag {other}"),
        }),
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn evaluate(
        &self,
        key: &str,
        bucket: &TokenBucket,
        now_secs: i64,
        tokens: f64,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let (tokens_key, timestamp_key) = bucket_keys(key);
        let mut conn = self.conn.clone();
        let (allowed, retry_after): (i64, String) = self
            .script
            .key(tokens_key)
            .key(timestamp_key)
            .arg(bucket.filling_rate())
            .arg(bucket.capacity())
            .arg(now_secs)
            .arg(tokens)
            .arg(bucket.expiration().as_secs().max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| RedisError::command("EVALSHA", e))?;
        Ok(decode_reply(allowed, &retry_after)?)
    }
}
