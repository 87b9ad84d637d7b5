//! 在线目录 RPC 客户端
//!
//! 前端实例通过 HTTP 调用扇出层暴露的目录接口：
//! `PUT|DELETE /api/presence/rooms/{room_id}/subscribers/{user_name}`。

use std::time::Duration;

use application::{ApplicationError, PresenceClient};
use async_trait::async_trait;
use domain::{RoomId, RouteId, UserName};
use reqwest::{Client, Method, Url};
use serde::Serialize;
use tracing::debug;

#[derive(Serialize)]
struct SubscribeBody<'a> {
    route_id: &'a str,
}

#[derive(Clone)]
pub struct HttpPresenceClient {
    http: Client,
    base_url: Url,
    deadline: Duration,
}

impl HttpPresenceClient {
    pub fn new(endpoint: &str, deadline: Duration) -> Result<Self, ApplicationError> {
        let base_url = Url::parse(endpoint).map_err(|e| {
            ApplicationError::infrastructure_with_source(
                format!("invalid presence endpoint {endpoint}"),
                e,
            )
        })?;
        let http = Client::builder()
            .timeout(deadline)
            .build()
            .map_err(|e| ApplicationError::infrastructure_with_source("build http client", e))?;
        Ok(Self {
            http,
            base_url,
            deadline,
        })
    }

    fn subscriber_url(&self, room_id: RoomId, user_name: &UserName) -> Result<Url, ApplicationError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApplicationError::infrastructure("presence endpoint cannot be a base url"))?
            .pop_if_empty()
            .extend([
                "api",
                "presence",
                "rooms",
                &room_id.to_string(),
                "subscribers",
                user_name.as_str(),
            ]);
        Ok(url)
    }

    async fn call(
        &self,
        method: Method,
        url: Url,
        body: Option<SubscribeBody<'_>>,
    ) -> Result<(), ApplicationError> {
        let mut request = self.http.request(method.clone(), url.clone());
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ApplicationError::Timeout {
                    operation: "presence rpc",
                    after: self.deadline,
                }
            } else {
                ApplicationError::infrastructure_with_source(format!("{method} {url}"), e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApplicationError::infrastructure(format!(
                "{method} {url} returned {status}"
            )));
        }
        debug!(%method, %url, "presence rpc ok");
        Ok(())
    }
}

#[async_trait]
impl PresenceClient for HttpPresenceClient {
    async fn add_room_subscriber(
        &self,
        room_id: RoomId,
        user_name: &UserName,
        route_id: &RouteId,
    ) -> Result<(), ApplicationError> {
        let url = self.subscriber_url(room_id, user_name)?;
        self.call(
            Method::PUT,
            url,
            Some(SubscribeBody {
                route_id: route_id.as_str(),
            }),
        )
        .await
    }

    async fn remove_room_subscriber(
        &self,
        room_id: RoomId,
        user_name: &UserName,
    ) -> Result<(), ApplicationError> {
        let url = self.subscriber_url(room_id, user_name)?;
        self.call(Method::DELETE, url, None).await
    }
}
