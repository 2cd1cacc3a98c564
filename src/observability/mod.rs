//! 可观测性：tracing 订阅器初始化
//!
//! 默认级别 info，可用 `RUST_LOG` 覆盖（如 `RUST_LOG=delve=debug`）。日志写到 stderr，
//! stdout 留给 CLI 的结果输出。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // 重复初始化（例如测试中）时忽略错误
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}
