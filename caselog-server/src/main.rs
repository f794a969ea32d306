//! Caselog服务器主程序

use caselog_admin::AppConfig;
use caselog_core::Result;
use caselog_database::{DatabasePool, MemoryStorage, PgStorage, Storage};
use caselog_web::WebServer;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Caselog服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "caselog-server")]
#[command(about = "麻醉病例记录系统服务器")]
struct Args {
    /// 服务器端口（覆盖配置文件）
    #[arg(short, long)]
    port: Option<u16>,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    info!("启动Caselog服务器...");

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    info!("Caselog服务器配置:");
    info!("  监听地址: {}:{}", config.server.host, config.server.port);
    info!("  上传目录: {}", config.uploads.dir);

    let storage: Arc<dyn Storage> = match config.database.url.as_deref() {
        Some(url) => {
            let pool = DatabasePool::connect(url, config.database.max_connections).await?;
            let storage = PgStorage::new(pool);
            storage.create_tables().await?;
            info!("PostgreSQL存储就绪");
            Arc::new(storage)
        }
        None => {
            warn!("未配置database.url，使用进程内存储（仅限开发环境）");
            Arc::new(MemoryStorage::new())
        }
    };

    let server = WebServer::new(storage, Arc::new(config))?;
    if let Err(e) = server.run().await {
        error!("服务器启动失败: {}", e);
        return Err(e);
    }

    Ok(())
}
