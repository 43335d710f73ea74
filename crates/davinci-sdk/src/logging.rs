//! 日志初始化

use tracing_subscriber::EnvFilter;

/// 安装全局 `tracing` 订阅者
///
/// `RUST_LOG` 存在时优先生效，否则使用 `default_directive`（例如 `"info"` 或
/// `"davinci_driver=debug"`）。已安装过订阅者时返回错误。
pub fn init_logging(
    default_directive: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))?;

    tracing_subscriber::fmt().with_env_filter(filter).try_init()
}
