use async_trait::async_trait;
use domain::PasswordHash;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordHasherError {
    #[error("hash error: {0}")]
    Hash(String),
    #[error("verify error: {0}")]
    Verify(String),
}

impl PasswordHasherError {
    pub fn hash_error(message: impl Into<String>) -> Self {
        Self::Hash(message.into())
    }

    pub fn verify_error(message: impl Into<String>) -> Self {
        Self::Verify(message.into())
    }
}

/// 自适应加盐哈希。`verify` 必须使用与时间无关的比较。
#[async_trait]
pub trait PasswordHasher: Send + Sync {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError>;
    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError>;
}

pub mod memory {
    //! 测试用的可逆"哈希"，只用于内存装配。

    use super::*;

    #[derive(Debug, Default)]
    pub struct PlainPasswordHasher;

    const PREFIX: &str = "plain$";

    #[async_trait]
    impl PasswordHasher for PlainPasswordHasher {
        async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError> {
            PasswordHash::new(format!("{PREFIX}{plaintext}"))
                .map_err(|err| PasswordHasherError::hash_error(err.to_string()))
        }

        async fn verify(
            &self,
            plaintext: &str,
            hashed: &PasswordHash,
        ) -> Result<bool, PasswordHasherError> {
            let stored = hashed
                .as_str()
                .strip_prefix(PREFIX)
                .ok_or_else(|| PasswordHasherError::verify_error("unknown hash format"))?;
            Ok(constant_time_eq(stored.as_bytes(), plaintext.as_bytes()))
        }
    }

    fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
        if a.len() != b.len() {
            return false;
        }
        a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}
