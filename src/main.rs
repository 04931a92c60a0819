//! Duet - 单轮对话命令行
//!
//! 入口：解析参数、初始化日志、加载配置、打开会话存储与对话服务，
//! 发送一句话并在交互结束时向 stdout 打印一个 JSON 数组。
//!
//! 退出码：0 成功（含客户端取消）、1 配置等错误、2 参数错误、3 重试耗尽、4 存储故障、130 被 Ctrl+C 中断、143 被 SIGTERM 终止。

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;

use duet::config::{load_config, AppConfig};
use duet::core::{ExchangeSettings, ShutdownManager, ShutdownReason};
use duet::service::{Credentials, DialogueService};
use duet::store::{MemorySessionStore, SessionStore, SqliteSessionStore};
use duet::{ExchangeOrchestrator, ExchangeOutcome};

/// 发送一句话给对话服务，输出配对后的 (text, audio) 序列
#[derive(Parser, Debug)]
#[command(name = "duet")]
#[command(version, about, long_about = None)]
struct Cli {
    /// 服务 API key（传 "-" 使用配置中的 credentials.key）
    key: String,

    /// 服务 API secret（传 "-" 使用配置中的 credentials.secret）
    secret: String,

    /// 场景标识（传 "-" 使用配置中的 credentials.scene）
    scene: String,

    /// 要发送的文本
    text: String,

    /// 用户显示名
    user_name: String,

    /// 用户所在渠道标识
    user_channel: String,

    /// 用户标识
    user_id: String,

    /// 配置文件路径（TOML）
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// 会话数据库路径，覆盖配置 app.db_path
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// 对话服务端点，覆盖配置 service.endpoint
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,

    /// 最大尝试次数（0 不设上限），覆盖配置 retry.max_attempts
    #[arg(long, value_name = "N")]
    max_attempts: Option<u32>,

    /// 发送前清除已保存的会话，从全新会话开始
    #[arg(long)]
    reset: bool,

    /// 不读写会话数据库（会话只在本进程内有效）
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    duet::observability::init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("duet: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let cfg = load_config(cli.config.clone()).context("Failed to load configuration")?;

    let credentials = Credentials::new(
        resolve(&cli.key, cfg.credentials.key.as_deref(), "key")?,
        resolve(&cli.secret, cfg.credentials.secret.as_deref(), "secret")?,
    );
    let scene = resolve(&cli.scene, cfg.credentials.scene.as_deref(), "scene")?;

    let store: Arc<dyn SessionStore> = if cli.ephemeral {
        Arc::new(MemorySessionStore::new())
    } else {
        let path = cli.db.clone().unwrap_or_else(|| cfg.app.db_path.clone());
        let store = SqliteSessionStore::open(&path)
            .with_context(|| format!("Failed to open session store {}", path.display()))?;
        Arc::new(store)
    };

    let service = build_service(&cfg, cli.endpoint.as_deref())?;

    let mut retry = cfg.retry.policy();
    if let Some(max_attempts) = cli.max_attempts {
        retry.max_attempts = max_attempts;
    }
    if retry.is_unbounded() {
        tracing::warn!("Retry policy is unbounded; a persistently failing service will be retried forever");
    }

    let settings = ExchangeSettings {
        credentials,
        scene,
        channel_id: cli.user_channel.clone(),
        user_id: cli.user_id.clone(),
        retry,
        interaction_timeout: cfg.service.interaction_timeout(),
    };

    let shutdown = ShutdownManager::new();
    shutdown.spawn_signal_listener();

    let orchestrator =
        ExchangeOrchestrator::new(service, store, settings).with_shutdown(shutdown.token());

    if cli.reset {
        if let Err(e) = orchestrator.reset_session().await {
            eprintln!("duet: {e}");
            return Ok(ExitCode::from(e.exit_code()));
        }
    }

    match orchestrator.run(&cli.text, &cli.user_name).await {
        Ok(ExchangeOutcome::Completed(pairs)) => {
            let json = serde_json::to_string(&pairs).context("Failed to serialize output")?;
            println!("{json}");
            Ok(ExitCode::SUCCESS)
        }
        Ok(ExchangeOutcome::Cancelled) => {
            tracing::info!("Interaction cancelled on client before it ended, no output");
            Ok(ExitCode::SUCCESS)
        }
        Ok(ExchangeOutcome::Interrupted) => {
            let reason = shutdown.reason().unwrap_or(ShutdownReason::UserInitiated);
            tracing::warn!(?reason, "Interrupted before the interaction ended");
            Ok(ExitCode::from(reason.exit_code()))
        }
        Err(e) => {
            eprintln!("duet: {e}");
            Ok(ExitCode::from(e.exit_code()))
        }
    }
}

/// 命令行参数为 "-" 时回落到配置值
fn resolve(arg: &str, configured: Option<&str>, name: &str) -> anyhow::Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    configured
        .map(str::to_string)
        .ok_or_else(|| anyhow!("{name} given as '-' but credentials.{name} is not configured"))
}

#[cfg(feature = "websocket")]
fn build_service(cfg: &AppConfig, endpoint: Option<&str>) -> anyhow::Result<Arc<dyn DialogueService>> {
    let endpoint = endpoint.unwrap_or(&cfg.service.endpoint);
    let service =
        duet::service::WebSocketDialogueService::new(endpoint, cfg.service.connect_timeout())
            .context("Invalid dialogue service endpoint")?;
    Ok(Arc::new(service))
}

#[cfg(not(feature = "websocket"))]
fn build_service(_cfg: &AppConfig, _endpoint: Option<&str>) -> anyhow::Result<Arc<dyn DialogueService>> {
    anyhow::bail!("built without the `websocket` feature, no dialogue transport available")
}
