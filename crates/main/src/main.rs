//! 房间前端服务入口
//!
//! 对外提供建房接口与房间 WebSocket，消费本实例的路由 topic 并投递到本地会话。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use application::{
    Clock, FrontendAssembly, FrontendSettings, ShutdownOutcome, SnowflakeGenerator, SystemClock,
};
use config::AppConfig;
use infrastructure::Infrastructure;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use web_api::{cors_layer, router, shutdown_signal, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load().context("加载配置失败")?;
    info!(config = %config.sanitize(), "配置已加载");

    let settings = FrontendSettings::from_config(&config)?;
    let route_id = settings.route_id.clone();

    let infra = Infrastructure::connect_frontend(&config)
        .await
        .context("连接外部依赖失败")?;
    Infrastructure::ensure_topics(&config, Some(route_id.as_str())).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let id_generator = Arc::new(SnowflakeGenerator::new(
        config.id_generator.machine_id,
        Duration::from_millis(config.id_generator.max_clock_drift_ms),
        clock.clone(),
    )?);

    let assembly = FrontendAssembly::assemble(infra.into_dependencies(id_generator, clock), settings);
    let consumer = assembly
        .start_route_consumer(CancellationToken::new())
        .await?;

    let connections = assembly.connections.clone();
    let app = router(AppState::from_assembly(&assembly)).layer(cors_layer(&config.server.cors_origins));
    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("无法绑定 {addr}"))?;

    info!(addr = %addr, route_id = %route_id, "聊天室服务启动");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown({
        let connections = connections.clone();
        async move {
            shutdown_signal().await;
            // 升级后的 WebSocket 不受 serve 的优雅停机跟踪
            connections.shutdown();
        }
    })
    .await?;

    let grace_period = config.shutdown.grace_period();
    if connections.drain(grace_period).await {
        info!("WebSocket 会话已全部关闭");
    } else {
        warn!(remaining = connections.len(), "宽限期内仍有会话未关闭");
    }

    match consumer.shutdown(grace_period).await {
        ShutdownOutcome::Graceful => info!(route_id = %route_id, "路由消费者已停止"),
        ShutdownOutcome::Aborted => warn!(route_id = %route_id, "路由消费者未在宽限期内停止，已中止"),
    }
    Ok(())
}
