//! 可观测性：日志统一写到 stderr，stdout 只留给最终的 JSON 结果

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 默认 `duet=info`，可通过 RUST_LOG 覆盖
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("duet=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
