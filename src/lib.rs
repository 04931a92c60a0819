//! Duet - 单轮语音/文本对话客户端
//!
//! 发送一句话，接收交错到达的文本与音频片段，配对为 (text, audio) 序列输出；
//! 按用户持久化会话以便多轮续接，连接故障时清除会话并以相同输入自动重试。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 配对缓冲、事件分发、错误恢复、交换编排、关闭信号
//! - **observability**: 日志初始化
//! - **service**: 对话服务抽象与实现（WebSocket / 脚本回放）
//! - **store**: 会话存储（SQLite / 内存）

pub mod config;
pub mod core;
pub mod observability;
pub mod service;
pub mod store;

pub use crate::core::{CompletedPair, ExchangeError, ExchangeOrchestrator, ExchangeOutcome};
