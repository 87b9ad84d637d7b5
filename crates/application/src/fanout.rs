//! 消息扇出
//!
//! 消费入口 topic 上的房间消息，查询在线目录得到去重后的路由集合，
//! 把同一份负载重新发布到每个路由 topic。单个路由发布失败只记录，不影响其他路由。

use std::sync::Arc;

use async_trait::async_trait;
use domain::{Message, RoomId, RouteId};
use futures_util::future::join_all;

use crate::bus::{Envelope, MessageBus};
use crate::consumer::EnvelopeHandler;
use crate::error::ApplicationError;
use crate::presence::PresenceDirectory;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutReport {
    pub room_id: RoomId,
    pub routes: usize,
    pub delivered: usize,
    pub failed: Vec<RouteId>,
}

pub struct FanoutCoordinator {
    directory: Arc<PresenceDirectory>,
    bus: Arc<dyn MessageBus>,
}

impl FanoutCoordinator {
    pub fn new(directory: Arc<PresenceDirectory>, bus: Arc<dyn MessageBus>) -> Self {
        Self { directory, bus }
    }

    pub async fn fan_out(&self, envelope: &Envelope) -> Result<FanoutReport, ApplicationError> {
        let message = Message::decode(&envelope.payload)?;
        let room_id = message.room_id;
        let routes = self.directory.list_routes(room_id).await?;
        let key = room_id.to_string();

        let publishes = routes.iter().map(|route| {
            let envelope = Envelope::keyed(key.clone(), envelope.payload.clone());
            async move {
                let result = self.bus.publish(route.as_str(), envelope).await;
                (route, result)
            }
        });

        let mut report = FanoutReport {
            room_id,
            routes: routes.len(),
            delivered: 0,
            failed: Vec::new(),
        };
        for (route, result) in join_all(publishes).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    tracing::warn!(room_id = %room_id, route_id = %route, error = %err, "fan-out publish failed");
                    report.failed.push(route.clone());
                }
            }
        }
        Ok(report)
    }
}

#[async_trait]
impl EnvelopeHandler for FanoutCoordinator {
    async fn handle(&self, envelope: Envelope) {
        match self.fan_out(&envelope).await {
            Ok(report) if report.failed.is_empty() => {
                tracing::debug!(
                    envelope_id = %envelope.id,
                    room_id = %report.room_id,
                    routes = report.routes,
                    "fan-out complete"
                );
            }
            Ok(report) => {
                tracing::warn!(
                    envelope_id = %envelope.id,
                    room_id = %report.room_id,
                    delivered = report.delivered,
                    failed = report.failed.len(),
                    "fan-out partially failed"
                );
            }
            Err(ApplicationError::Domain(err)) => {
                tracing::warn!(envelope_id = %envelope.id, error = %err, "skipping undecodable envelope");
            }
            Err(err) => {
                tracing::error!(envelope_id = %envelope.id, error = %err, "fan-out failed, message dropped");
            }
        }
    }
}
