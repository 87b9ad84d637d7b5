//! 分布式 ID 生成器（snowflake 布局）
//!
//! 64 位：1 位符号（恒为 0）| 41 位自 2024-01-01T00:00:00Z 起的毫秒数 | 10 位机器号 | 12 位序列号。
//! 不同机器号的实例之间不会冲突；同一实例内严格递增。任何可能产生重复值的情况都返回错误。

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::clock::Clock;

/// 2024-01-01T00:00:00Z 的 Unix 毫秒数
pub const EPOCH_MILLIS: i64 = 1_704_067_200_000;

const TIMESTAMP_BITS: u32 = 41;
const MACHINE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;

const MAX_TIMESTAMP: i64 = (1 << TIMESTAMP_BITS) - 1;
pub const MAX_MACHINE_ID: u16 = (1 << MACHINE_BITS) - 1;
const SEQUENCE_MASK: u16 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdGeneratorError {
    #[error("clock moved backwards by {behind_ms}ms")]
    ClockMovedBackwards { behind_ms: i64 },
    #[error("sequence exhausted and clock did not advance in time")]
    SequenceExhausted,
    #[error("timestamp no longer fits in 41 bits")]
    TimestampOverflow,
    #[error("clock is before the id epoch")]
    ClockBeforeEpoch,
    #[error("machine id {0} exceeds 1023")]
    InvalidMachineId(u16),
}

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Result<u64, IdGeneratorError>;
}

/// ID 拆解结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdParts {
    pub unix_millis: i64,
    pub machine_id: u16,
    pub sequence: u16,
}

pub fn decompose(id: u64) -> IdParts {
    IdParts {
        unix_millis: (id >> (MACHINE_BITS + SEQUENCE_BITS)) as i64 + EPOCH_MILLIS,
        machine_id: ((id >> SEQUENCE_BITS) as u16) & MAX_MACHINE_ID,
        sequence: (id as u16) & SEQUENCE_MASK,
    }
}

#[derive(Debug, Default)]
struct State {
    last_tick: i64,
    sequence: u16,
    issued: bool,
}

pub struct SnowflakeGenerator {
    machine_id: u16,
    max_clock_drift: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl SnowflakeGenerator {
    pub fn new(
        machine_id: u16,
        max_clock_drift: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, IdGeneratorError> {
        if machine_id > MAX_MACHINE_ID {
            return Err(IdGeneratorError::InvalidMachineId(machine_id));
        }
        Ok(Self {
            machine_id,
            max_clock_drift,
            clock,
            state: Mutex::new(State::default()),
        })
    }

    pub fn machine_id(&self) -> u16 {
        self.machine_id
    }

    fn tick(&self) -> Result<i64, IdGeneratorError> {
        let elapsed = self.clock.now_millis() - EPOCH_MILLIS;
        if elapsed < 0 {
            return Err(IdGeneratorError::ClockBeforeEpoch);
        }
        Ok(elapsed)
    }

    /// 忙等直到时钟到达 `target`，最长等待时钟漂移容忍度（至少 1ms）
    fn wait_until(&self, target: i64) -> Result<Option<i64>, IdGeneratorError> {
        let bound = self.max_clock_drift.max(Duration::from_millis(1));
        let deadline = Instant::now() + bound;
        loop {
            let now = self.tick()?;
            if now >= target {
                return Ok(Some(now));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::yield_now();
        }
    }
}

impl IdGenerator for SnowflakeGenerator {
    fn next_id(&self) -> Result<u64, IdGeneratorError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut now = self.tick()?;

        if state.issued && now < state.last_tick {
            let behind_ms = state.last_tick - now;
            if behind_ms > self.max_clock_drift.as_millis() as i64 {
                return Err(IdGeneratorError::ClockMovedBackwards { behind_ms });
            }
            now = self
                .wait_until(state.last_tick)?
                .ok_or(IdGeneratorError::ClockMovedBackwards { behind_ms })?;
        }

        let sequence = if state.issued && now == state.last_tick {
            let next = (state.sequence + 1) & SEQUENCE_MASK;
            if next == 0 {
                now = self
                    .wait_until(state.last_tick + 1)?
                    .ok_or(IdGeneratorError::SequenceExhausted)?;
            }
            next
        } else {
            0
        };

        if now > MAX_TIMESTAMP {
            return Err(IdGeneratorError::TimestampOverflow);
        }

        state.last_tick = now;
        state.sequence = sequence;
        state.issued = true;

        Ok(((now as u64) << (MACHINE_BITS + SEQUENCE_BITS))
            | ((self.machine_id as u64) << SEQUENCE_BITS)
            | sequence as u64)
    }
}
