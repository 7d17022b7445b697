//! # 数据库模块
//!
//! 数据库连接和迁移管理

use crate::config::DatabaseConfig;
use crate::error::{Context, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, lerror, linfo};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use std::path::Path;
use std::time::Duration;

/// 初始化数据库连接
pub async fn init_database(config: &DatabaseConfig) -> Result<DatabaseConnection> {
    let database_url = config.url.as_str();
    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Database,
        "db_connect",
        "正在连接数据库",
        url = %database_url.chars().take(50).collect::<String>()
    );

    // 对于SQLite文件数据库，确保目录存在
    if config.is_sqlite() && !config.is_memory_database() {
        ensure_sqlite_file(database_url)?;
    }

    let mut options = ConnectOptions::new(database_url.to_string());
    options
        .max_connections(config.max_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout))
        .sqlx_logging(false);

    // 内存数据库每个连接都是独立的库，只能使用单连接
    if config.is_memory_database() {
        options.max_connections(1).min_connections(1);
    }

    let db = Database::connect(options).await?;

    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Database,
        "db_connected",
        "数据库连接成功"
    );
    Ok(db)
}

/// 确保 SQLite 文件及其目录存在
fn ensure_sqlite_file(database_url: &str) -> Result<()> {
    let db_path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);
    let db_path = db_path.split('?').next().unwrap_or(db_path);

    if let Some(parent_dir) = Path::new(db_path).parent() {
        if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
            ldebug!(
                "system",
                LogStage::Startup,
                LogComponent::Database,
                "create_db_dir",
                "创建数据库目录",
                dir = %parent_dir.display()
            );
            std::fs::create_dir_all(parent_dir)
                .with_context(|| format!("无法创建数据库目录: {}", parent_dir.display()))?;
        }
    }

    let db_file = Path::new(db_path);
    if !db_file.exists() {
        std::fs::File::create(db_file)
            .with_context(|| format!("无法创建数据库文件: {}", db_file.display()))?;
        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Database,
            "create_db_file",
            "数据库文件创建成功",
            file = %db_file.display()
        );
    }
    Ok(())
}

/// 运行数据库迁移
pub async fn run_migrations(db: &DatabaseConnection) -> std::result::Result<(), DbErr> {
    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Database,
        "run_migrations",
        "开始运行数据库迁移"
    );

    match ::migration::Migrator::up(db, None).await {
        Ok(()) => {
            linfo!(
                "system",
                LogStage::Startup,
                LogComponent::Database,
                "migrations_done",
                "数据库迁移完成"
            );
            Ok(())
        }
        Err(e) => {
            lerror!(
                "system",
                LogStage::Startup,
                LogComponent::Database,
                "migrations_failed",
                "数据库迁移失败",
                error = %e
            );
            Err(e)
        }
    }
}
