//! WebSocket 对话协议消息
//!
//! ```text
//! Client → Server:
//!   - session_start（场景、用户、能力、上次会话或 null）
//!   - text（一句话 + packet_id）
//!   - close
//!
//! Server → Client:
//!   - text / audio（交错到达的回复片段）
//!   - interaction_end
//!   - session（新的会话记录，需持久化）
//!   - error
//!   - 其它类型一律忽略
//! ```
//!
//! 二进制帧视为音频，由传输层编码为 base64 后当作 audio 处理。

use serde::{Deserialize, Serialize};

use super::{Capabilities, UserDescriptor};

/// 客户端 → 服务端
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SessionStart {
        scene: String,
        user: UserDescriptor,
        capabilities: Capabilities,
        session: Option<serde_json::Value>,
    },
    Text {
        packet_id: String,
        text: String,
    },
    Close,
}

/// 服务端 → 客户端
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Text {
        text: String,
    },
    Audio {
        chunk: String,
    },
    InteractionEnd,
    Session {
        session: serde_json::Value,
    },
    Error {
        message: String,
    },
    #[serde(other)]
    Unknown,
}

pub fn encode(msg: &ClientMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

pub fn decode(text: &str) -> Result<ServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}
