use sqlx::migrate::Migrator;

/// 建表迁移，启动时按配置执行
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");
