//! 在线目录与扇出服务入口
//!
//! 提供在线目录 HTTP 接口，并以消费组成员身份消费入口 topic，
//! 把每条房间消息转发到订阅了该房间的前端路由。

use anyhow::Context;
use application::{FanoutAssembly, FanoutSettings, ShutdownOutcome};
use config::AppConfig;
use infrastructure::Infrastructure;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use web_api::{cors_layer, presence_router, shutdown_signal, PresenceState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load().context("加载配置失败")?;
    info!(config = %config.sanitize(), "配置已加载");

    let infra = Infrastructure::connect_fanout(&config)
        .await
        .context("连接外部依赖失败")?;
    Infrastructure::ensure_topics(&config, None).await?;

    let settings = FanoutSettings::from_config(&config);
    let group = settings.consumer_group.clone();
    let assembly = FanoutAssembly::assemble(infra.presence_store, infra.bus, settings);
    let consumer = assembly.start_consumer(CancellationToken::new()).await?;

    let app = presence_router(PresenceState::new(assembly.directory.clone()))
        .layer(cors_layer(&config.presence_server.cors_origins));
    let addr = config.presence_server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("无法绑定 {addr}"))?;

    info!(addr = %addr, group = %group, topic = %consumer.topic(), "扇出服务启动");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match consumer.shutdown(config.shutdown.grace_period()).await {
        ShutdownOutcome::Graceful => info!("入口消费者已停止"),
        ShutdownOutcome::Aborted => warn!("入口消费者未在宽限期内停止，已中止"),
    }
    Ok(())
}
