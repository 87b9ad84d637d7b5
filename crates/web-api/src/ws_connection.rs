//! 单个 WebSocket 连接的驱动
//!
//! 写任务独占 socket 的发送端，消费会话出站队列；读循环把客户端帧交给
//! [`RoomFrontend`] 状态机。两者任一结束即视为连接断开；进程停机时以 1001 主动关闭，
//! 保证离开流程（注销在线目录、广播 `left`）照常执行。

use std::sync::Arc;
use std::time::Duration;

use application::{CloseReason, Outbound, RoomFrontend, SessionFlow, SessionRegistration};
use axum::extract::ws::{CloseFrame, Message as WsMessage, Utf8Bytes, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// 关闭帧之前排队的消息最多等待这么久写出
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(socket: WebSocket, frontend: Arc<RoomFrontend>, mut registration: SessionRegistration) {
    let session = registration.session().clone();
    let Some(outbound) = registration.take_outbound() else {
        tracing::error!(session_id = session.id(), "outbound queue already taken");
        return;
    };

    let (sender, mut incoming) = socket.split();
    let mut writer = tokio::spawn(write_loop(sender, outbound, session.evicted().clone()));
    let mut writer_done = false;
    let shutdown = registration.shutdown_token();

    let mut closing = false;
    if let SessionFlow::Close(reason) = frontend.on_connect(&session).await {
        session.request_close(reason);
        closing = true;
    }

    while !closing {
        tokio::select! {
            _ = &mut writer => {
                writer_done = true;
                break;
            }
            _ = shutdown.cancelled() => {
                session.request_close(CloseReason::GOING_AWAY);
                closing = true;
            }
            frame = incoming.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if let SessionFlow::Close(reason) = frontend.on_frame(&session, text.as_str()).await {
                        session.request_close(reason);
                        closing = true;
                    }
                }
                Some(Ok(WsMessage::Binary(_))) => {
                    tracing::debug!(session_id = session.id(), "ignoring binary frame");
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Err(err)) => {
                    tracing::debug!(session_id = session.id(), error = %err, "websocket read failed");
                    break;
                }
            }
        }
    }

    frontend.on_close(&session).await;
    drop(registration);

    if closing && !writer_done {
        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer)
            .await
            .is_err()
        {
            tracing::warn!(session_id = session.id(), "close frame not flushed in time");
        }
    }
    writer.abort();

    tracing::info!(
        session_id = session.id(),
        room_id = %session.room_id(),
        user_name = %session.user_name(),
        "WebSocket 连接已断开"
    );
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<Outbound>,
    evicted: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = evicted.cancelled() => {
                let _ = sender.send(close_frame(CloseReason::SLOW_CONSUMER)).await;
                break;
            }
            item = outbound.recv() => match item {
                Some(Outbound::Text(text)) => {
                    if sender.send(WsMessage::Text(text.into())).await.is_err() {
                        tracing::debug!("websocket write failed");
                        break;
                    }
                }
                Some(Outbound::Close(reason)) => {
                    let _ = sender.send(close_frame(reason)).await;
                    break;
                }
                None => break,
            }
        }
    }
    let _ = sender.close().await;
}

fn close_frame(reason: CloseReason) -> WsMessage {
    WsMessage::Close(Some(CloseFrame {
        code: reason.code,
        reason: Utf8Bytes::from_static(reason.reason),
    }))
}
