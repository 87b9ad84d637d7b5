//! 总线消费任务
//!
//! 每个 topic 一个长期运行的任务，顺序处理记录以保持分区内顺序。
//! 关闭流程：取消（不再拉取新记录）-> 等待正在处理的记录，最长宽限期 -> 强制中止。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{Envelope, Subscription};

#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Graceful,
    Aborted,
}

pub struct ConsumerHandle {
    topic: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn shutdown(self, grace_period: Duration) -> ShutdownOutcome {
        self.cancel.cancel();
        let mut task = self.task;
        match tokio::time::timeout(grace_period, &mut task).await {
            Ok(_) => {
                tracing::info!(topic = %self.topic, "consumer stopped");
                ShutdownOutcome::Graceful
            }
            Err(_) => {
                task.abort();
                tracing::warn!(
                    topic = %self.topic,
                    grace_ms = grace_period.as_millis() as u64,
                    "consumer did not finish within grace period, aborted"
                );
                ShutdownOutcome::Aborted
            }
        }
    }
}

/// 启动消费任务。`cancel` 可以是父令牌的子令牌，以便进程级统一关闭。
pub fn spawn_consumer(
    topic: impl Into<String>,
    mut subscription: Box<dyn Subscription>,
    handler: Arc<dyn EnvelopeHandler>,
    cancel: CancellationToken,
) -> ConsumerHandle {
    let topic = topic.into();
    let loop_topic = topic.clone();
    let loop_cancel = cancel.clone();

    let task = tokio::spawn(async move {
        tracing::info!(topic = %loop_topic, "consumer started");
        loop {
            let next = tokio::select! {
                biased;
                _ = loop_cancel.cancelled() => break,
                next = subscription.next() => next,
            };
            match next {
                Some(Ok(envelope)) => handler.handle(envelope).await,
                Some(Err(err)) => {
                    tracing::warn!(topic = %loop_topic, error = %err, "failed to receive envelope");
                }
                None => {
                    tracing::info!(topic = %loop_topic, "subscription closed");
                    break;
                }
            }
        }
    });

    ConsumerHandle {
        topic,
        cancel,
        task,
    }
}
