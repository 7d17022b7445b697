//! # Connection Hub 主程序

use clap::{Parser, Subcommand};
use connection_hub::{
    Result,
    app::AppContext,
    auth::JwtManager,
    config::{self, TokenCipher},
    lerror, linfo,
    logging::{self, LogComponent, LogStage},
    management::ManagementServer,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "connection-hub", version, about = "多提供商 OAuth 连接管理服务")]
struct Cli {
    /// 日志级别（trace/debug/info/warn/error）
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// 配置文件路径，缺省时按 CONFIG_PATH / RUST_ENV 解析
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// 启动 HTTP 服务（默认）
    Serve,
    /// 生成新的令牌加密密钥
    GenerateKey,
    /// 为指定用户签发会话令牌，用于本地调试
    IssueToken {
        #[arg(long)]
        user_id: i32,
        #[arg(long, default_value_t = 3600)]
        ttl_seconds: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_optimized_logging(cli.log_level.as_ref());

    match cli.command.unwrap_or(Command::Serve) {
        Command::GenerateKey => {
            println!("{}", TokenCipher::generate_key());
            Ok(())
        }
        Command::IssueToken {
            user_id,
            ttl_seconds,
        } => {
            let config = load(cli.config.as_ref())?;
            let token = JwtManager::new(&config.auth).generate_token(user_id, ttl_seconds)?;
            println!("{token}");
            Ok(())
        }
        Command::Serve => {
            if let Err(e) = serve(cli.config.as_ref()).await {
                lerror!(
                    "system",
                    LogStage::Startup,
                    LogComponent::Main,
                    "service_start_failed",
                    "服务启动失败",
                    error = %e
                );
                return Err(e);
            }
            Ok(())
        }
    }
}

fn load(path: Option<&PathBuf>) -> Result<connection_hub::AppConfig> {
    path.map_or_else(config::load_config, |path| config::load_config_from(path))
}

async fn serve(path: Option<&PathBuf>) -> Result<()> {
    let config = load(path)?;
    let cipher = TokenCipher::from_env()?;
    let server_config = config.server.clone();

    let context = Arc::new(AppContext::initialize(config, cipher).await?);
    context.start_background_tasks().await?;

    let shutdown = context.shutdown_token();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                linfo!(
                    "system",
                    LogStage::Shutdown,
                    LogComponent::Main,
                    "signal_received",
                    "收到退出信号"
                );
            }
            shutdown.cancel();
        }
    });

    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Main,
        "service_starting",
        "服务启动",
        providers = context.registry.list().len()
    );
    let result = ManagementServer::new(server_config, Arc::clone(&context))
        .serve(shutdown)
        .await;
    context.shutdown().await;
    result?;

    linfo!(
        "system",
        LogStage::Shutdown,
        LogComponent::Main,
        "service_shutdown",
        "服务正常关闭"
    );
    Ok(())
}
