//! 日志初始化

use anyhow::Result;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// 安装全局 fmt 日志; `RUST_LOG` 优先于 `level`
pub fn init(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
