//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DUET__*` 覆盖（双下划线表示嵌套，如 `DUET__RETRY__MAX_ATTEMPTS=3`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::RetryPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub service: ServiceSection,
    pub retry: RetrySection,
    pub credentials: CredentialsSection,
}

/// [app] 段：会话数据库位置（`--db` 可覆盖）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// SQLite 会话库路径，父目录不存在时自动创建
    pub db_path: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data.db"),
        }
    }
}

/// [service] 段：对话服务端点与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    pub endpoint: String,
    pub connect_timeout_secs: u64,
    /// 单次交互超时；不设置则一直等待服务端结束
    pub interaction_timeout_secs: Option<u64>,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8787/v1/dialogue".to_string(),
            connect_timeout_secs: 10,
            interaction_timeout_secs: None,
        }
    }
}

impl ServiceSection {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn interaction_timeout(&self) -> Option<Duration> {
        self.interaction_timeout_secs.map(Duration::from_secs)
    }
}

/// [retry] 段：故障后重启交换的策略；max_attempts = 0 表示不设上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

/// [credentials] 段：命令行对应参数传 `-` 时使用
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CredentialsSection {
    pub key: Option<String>,
    pub secret: Option<String>,
    pub scene: Option<String>,
}

/// 从 config 目录加载配置，环境变量 DUET__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DUET__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!("Config file {} not found, ignoring", path.display());
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DUET")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
