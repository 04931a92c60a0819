//! 文本/音频配对缓冲
//!
//! 每次交互一个实例。待配对槽位每种类型最多一个片段：同类片段后到覆盖先到，
//! 新片段到达时若另一槽位已有内容，立即产出一对并清空；空片段不会占据槽位。交互结束时未配对的片段直接丢弃。

use serde::Serialize;

use crate::service::AudioChunk;

/// 已配对的 (文本, 音频)，序列化为 `{"text": ..., "audio": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedPair {
    pub text: String,
    pub audio: AudioChunk,
}

#[derive(Debug, Default)]
struct PendingPair {
    text: Option<String>,
    audio: Option<AudioChunk>,
}

#[derive(Debug, Default)]
pub struct PairingBuffer {
    pending: PendingPair,
    output: Vec<CompletedPair>,
}

impl PairingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 放入文本片段：音频槽已有内容时立即配对（即使文本为空），
    /// 否则占据文本槽；空文本不算占据
    pub fn on_text(&mut self, content: String) {
        if let Some(audio) = self.pending.audio.take() {
            self.pending.text = None;
            self.output.push(CompletedPair { text: content, audio });
            return;
        }
        if self.pending.text.is_some() {
            tracing::debug!("Text fragment overwrites an unpaired text fragment");
        }
        self.pending.text = (!content.is_empty()).then_some(content);
    }

    /// 放入音频片段：文本槽已有内容时立即配对（即使音频为空），
    /// 否则占据音频槽；空音频不算占据
    pub fn on_audio(&mut self, chunk: AudioChunk) {
        if let Some(text) = self.pending.text.take() {
            self.pending.audio = None;
            self.output.push(CompletedPair { text, audio: chunk });
            return;
        }
        if self.pending.audio.is_some() {
            tracing::debug!("Audio fragment overwrites an unpaired audio fragment");
        }
        self.pending.audio = (!chunk.is_empty()).then_some(chunk);
    }

    /// 已产出的配对
    pub fn completed(&self) -> &[CompletedPair] {
        &self.output
    }

    pub fn has_pending(&self) -> bool {
        self.pending.text.is_some() || self.pending.audio.is_some()
    }

    /// 交互结束：冻结输出序列，丢弃未配对片段
    pub fn finish(self) -> Vec<CompletedPair> {
        if self.has_pending() {
            tracing::debug!(
                text = self.pending.text.is_some(),
                audio = self.pending.audio.is_some(),
                "Discarding unpaired fragment at interaction end"
            );
        }
        self.output
    }
}
