use vps_server::{Config, Server, init_logger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 环境变量
    dotenvy::dotenv().ok();

    // 2. 加载配置
    let config = Config::from_env()?;

    // 3. 日志
    init_logger(&config.log_level, config.log_json, config.log_dir.as_deref());
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "🦀 VPS server starting...");

    // 4. 启动 HTTP 服务器 (Server::run 会启动后台任务并在退出时收尾)
    let server = Server::new(config);
    if let Err(e) = server.run().await {
        tracing::error!(error = %e, "Server error");
        return Err(e.into());
    }

    Ok(())
}
