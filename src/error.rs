//! 组件错误类型
//!
//! 感知/情绪/语音错误都在各自组件内部被降级处理, 不会传播到主循环

use std::time::Duration;

use thiserror::Error;

/// 帧采集错误
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Capture device error: {0}")]
    Device(String),
}

/// 检测器错误
#[derive(Error, Debug)]
pub enum PerceptionError {
    #[error("Detector backend failed: {0}")]
    Backend(#[from] anyhow::Error),

    #[error("Unexpected model output: {0}")]
    InvalidOutput(String),

    #[error("Detector panicked: {0}")]
    Panicked(String),
}

/// 情绪分类错误
#[derive(Error, Debug)]
pub enum EmotionError {
    #[error("No face found in region")]
    NoFace,

    #[error("Emotion classifier failed: {0}")]
    Backend(String),
}

/// 语音合成/播放错误
#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("Failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}")]
    Failed { program: String, status: String },

    #[error("Speech call exceeded {0:?}")]
    Timeout(Duration),

    #[error("Speech command template is empty")]
    EmptyCommand,

    #[error("Audio artifact error: {0}")]
    Artifact(#[from] std::io::Error),

    #[error("Speech backend panicked")]
    Panicked,
}
