//! 检测回放后端 - 从 JSON 脚本读取预先录制的逐帧检测结果
//!
//! 脚本第 i 项对应帧序号 i, 超出脚本长度的帧视为无检测结果

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::types::{DetectionRecord, FaceBox, HandLandmarks, PoseLandmarks};
use super::{FaceDetector, HandTracker, PoseTracker};
use crate::capture::Frame;
use crate::emotion::{Emotion, EmotionClassifier, EmotionQuery};
use crate::error::{EmotionError, PerceptionError};

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

/// 单帧录制数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordedFrame {
    #[serde(flatten)]
    pub detections: DetectionRecord,
    /// 按人物槽位索引的情绪标签, null 表示该槽位分类失败
    #[serde(default)]
    pub emotions: Vec<Option<Emotion>>,
}

/// 回放脚本
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayScript {
    /// 无图片目录时合成帧的尺寸
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    pub frames: Vec<RecordedFrame>,
}

impl ReplayScript {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read replay script {}", path.display()))?;
        let script = serde_json::from_str(&json)
            .with_context(|| format!("failed to parse replay script {}", path.display()))?;
        Ok(script)
    }

    fn frame(&self, index: u64) -> Option<&RecordedFrame> {
        usize::try_from(index).ok().and_then(|i| self.frames.get(i))
    }
}

/// 回放感知后端, 同时实现三个检测器接口和情绪分类接口
#[derive(Debug, Clone)]
pub struct ReplayPerception {
    script: Arc<ReplayScript>,
}

impl ReplayPerception {
    pub fn new(script: ReplayScript) -> Self {
        Self {
            script: Arc::new(script),
        }
    }

    pub fn script(&self) -> &ReplayScript {
        &self.script
    }
}

impl FaceDetector for ReplayPerception {
    fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<FaceBox>, PerceptionError> {
        Ok(self
            .script
            .frame(frame.index)
            .map(|f| f.detections.faces.clone())
            .unwrap_or_default())
    }
}

impl HandTracker for ReplayPerception {
    fn track_hands(&mut self, frame: &Frame) -> Result<Vec<HandLandmarks>, PerceptionError> {
        Ok(self
            .script
            .frame(frame.index)
            .map(|f| f.detections.hands.clone())
            .unwrap_or_default())
    }
}

impl PoseTracker for ReplayPerception {
    fn track_pose(&mut self, frame: &Frame) -> Result<Option<PoseLandmarks>, PerceptionError> {
        Ok(self
            .script
            .frame(frame.index)
            .and_then(|f| f.detections.pose.clone()))
    }
}

impl EmotionClassifier for ReplayPerception {
    fn classify(&self, query: &EmotionQuery) -> Result<Emotion, EmotionError> {
        self.script
            .frame(query.frame_index)
            .and_then(|f| f.emotions.get(query.slot).copied().flatten())
            .ok_or(EmotionError::NoFace)
    }
}
