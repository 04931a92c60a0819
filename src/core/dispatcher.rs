//! 事件分发：将通道事件归类为 文本 / 音频 / 交互结束 / 错误 / 忽略，
//! 文本与音频交给 PairingBuffer，其余交还编排器。自身不持有状态。

use crate::core::pairing::PairingBuffer;
use crate::service::{AudioChunk, ChannelEvent, Packet, ServiceError};

/// 事件分类结果
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Text(String),
    Audio(AudioChunk),
    InteractionEnd,
    Error(ServiceError),
    Ignored,
}

pub fn classify(event: ChannelEvent) -> Route {
    match event {
        ChannelEvent::Packet(Packet::Text(text)) => Route::Text(text),
        ChannelEvent::Packet(Packet::Audio(chunk)) => Route::Audio(chunk),
        ChannelEvent::Packet(Packet::InteractionEnd) => Route::InteractionEnd,
        ChannelEvent::Packet(Packet::Other(kind)) => {
            tracing::trace!("Ignoring packet of kind {}", kind);
            Route::Ignored
        }
        ChannelEvent::Error(err) => Route::Error(err),
    }
}

/// 分发后编排器需要做的事
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Continue,
    InteractionEnded,
    Error(ServiceError),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Dispatcher;

impl Dispatcher {
    pub fn new() -> Self {
        Self
    }

    pub fn dispatch(&self, event: ChannelEvent, buffer: &mut PairingBuffer) -> Dispatch {
        match classify(event) {
            Route::Text(text) => {
                buffer.on_text(text);
                Dispatch::Continue
            }
            Route::Audio(chunk) => {
                buffer.on_audio(chunk);
                Dispatch::Continue
            }
            Route::InteractionEnd => Dispatch::InteractionEnded,
            Route::Error(err) => Dispatch::Error(err),
            Route::Ignored => Dispatch::Continue,
        }
    }
}
