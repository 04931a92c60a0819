//! 对话服务边界
//!
//! 远端对话服务的抽象：建立会话绑定的通道、发送一句话、以事件流的形式接收
//! 交错到达的文本/音频片段、交互结束信号与错误。
//!
//! - **websocket**：JSON-over-WebSocket 传输（feature `websocket`，默认启用）
//! - **mock**：按脚本回放事件的进程内实现（测试用）
//! - **protocol**：WebSocket 线上消息格式

pub mod mock;
pub mod protocol;
#[cfg(feature = "websocket")]
pub mod websocket;

use std::fmt;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::store::{SessionHandle, StoreError};

pub use mock::{OpenRecord, Script, ScriptedService};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketDialogueService;

/// 客户端主动关闭通道时服务端回送的错误消息；收到它不算故障
pub const CLIENT_CANCELLED: &str = "1 CANCELLED: Cancelled on client";

/// 服务鉴权凭据
#[derive(Clone)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }

    /// HTTP Basic 鉴权值（不含 `Basic ` 前缀）
    pub fn basic_token(&self) -> String {
        BASE64.encode(format!("{}:{}", self.key, self.secret))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// 用户描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDescriptor {
    pub full_name: String,
}

impl UserDescriptor {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
        }
    }
}

/// 通道能力配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub audio: bool,
    pub emotions: bool,
}

impl Capabilities {
    /// 开启音频、关闭情绪分析；单轮交换固定使用此配置
    pub const AUDIO_ONLY: Self = Self {
        audio: true,
        emotions: false,
    };
}

/// 建立通道所需的全部参数
#[derive(Debug, Clone)]
pub struct ChannelSetup {
    pub credentials: Credentials,
    /// 目标场景 / 上下文标识
    pub scene: String,
    pub user: UserDescriptor,
    pub capabilities: Capabilities,
    /// 会话加载/保存句柄（绑定到会话键）
    pub session: SessionHandle,
}

/// 音频分片：服务端给出的已编码数据，原样透传，不解码不校验
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioChunk(String);

impl AudioChunk {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// 二进制音频帧按 base64 编码
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(BASE64.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// 服务端数据包
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Text(String),
    Audio(AudioChunk),
    InteractionEnd,
    /// 其它类型（情绪、控制等），携带类型名，分发时忽略
    Other(String),
}

/// 通道事件：数据包或错误
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Packet(Packet),
    Error(ServiceError),
}

impl ChannelEvent {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Packet(Packet::Text(content.into()))
    }

    pub fn audio(chunk: impl Into<String>) -> Self {
        Self::Packet(Packet::Audio(AudioChunk::new(chunk)))
    }

    pub fn interaction_end() -> Self {
        Self::Packet(Packet::InteractionEnd)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ServiceError::new(message))
    }
}

/// 服务/通道错误，只携带消息文本
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ServiceError {
    pub message: String,
}

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn client_cancelled() -> Self {
        Self::new(CLIENT_CANCELLED)
    }
}

/// 建连失败：会话读取失败与服务故障需区别对待
#[derive(Error, Debug)]
pub enum OpenError {
    #[error("Failed to load session: {0}")]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

pub type EventStream = mpsc::UnboundedReceiver<ChannelEvent>;

/// 已建立的通道：发送端句柄 + 入站事件流
pub struct OpenedChannel {
    pub channel: Box<dyn DialogueChannel>,
    pub events: EventStream,
}

/// 已打开通道的发送侧
#[async_trait]
pub trait DialogueChannel: Send {
    /// 发送一句用户文本
    async fn send_text(&mut self, text: &str) -> Result<(), ServiceError>;

    /// 关闭通道；之后事件流不会再产生新事件
    async fn close(&mut self);
}

/// 对话服务：按 ChannelSetup 建立通道
#[async_trait]
pub trait DialogueService: Send + Sync {
    async fn open(&self, setup: ChannelSetup) -> Result<OpenedChannel, OpenError>;
}
