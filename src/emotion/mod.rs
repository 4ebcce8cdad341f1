/// 情绪识别 (Emotion)
///
/// - Emotion:           固定情绪词表
/// - EmotionClassifier: 外部情绪分类器接口 (昂贵, 在后台线程调用)
/// - EmotionSampler:    节流 + 有界并发 + 丢弃过期结果的采样器
pub mod sampler;

pub use sampler::{EmotionReading, EmotionSampler, EmotionStats, SampleOutcome};

use std::fmt;
use std::str::FromStr;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::EmotionError;
use crate::perception::FaceBox;

/// 无法得到情绪时显示的哨兵标签
pub const UNKNOWN_EMOTION: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
    Contempt,
}

impl Emotion {
    pub const ALL: [Emotion; 8] = [
        Emotion::Angry,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Surprise,
        Emotion::Neutral,
        Emotion::Contempt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Angry => "angry",
            Emotion::Disgust => "disgust",
            Emotion::Fear => "fear",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
            Emotion::Contempt => "contempt",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Emotion {
    type Err = EmotionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Emotion::ALL
            .into_iter()
            .find(|e| e.as_str() == lower)
            .ok_or_else(|| EmotionError::Backend(format!("unknown emotion label `{}`", s)))
    }
}

/// 一次情绪分类请求
#[derive(Debug, Clone)]
pub struct EmotionQuery {
    /// 人物槽位 (当前帧中的人脸序号)
    pub slot: usize,
    pub frame_index: u64,
    /// 人脸区域或整帧
    pub region: RgbImage,
}

/// 情绪分类器, 由后台工作线程调用
pub trait EmotionClassifier: Send + Sync {
    fn classify(&self, query: &EmotionQuery) -> Result<Emotion, EmotionError>;
}

/// 情绪分类输入区域: 外扩后的人脸框, 框退化时退回整帧
pub fn face_region(image: &RgbImage, face: Option<&FaceBox>, margin: f32) -> RgbImage {
    face.and_then(|f| f.pixel_region(image.width(), image.height(), margin))
        .map(|(x, y, w, h)| image::imageops::crop_imm(image, x, y, w, h).to_image())
        .unwrap_or_else(|| image.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_labels() {
        assert_eq!("Happy".parse::<Emotion>().unwrap(), Emotion::Happy);
        assert_eq!(" sad ".parse::<Emotion>().unwrap(), Emotion::Sad);
        assert!("bored".parse::<Emotion>().is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Emotion::Surprise).unwrap();
        assert_eq!(json, "\"surprise\"");
        let back: Emotion = serde_json::from_str("\"neutral\"").unwrap();
        assert_eq!(back, Emotion::Neutral);
    }

    #[test]
    fn test_face_region_crop_and_fallback() {
        let image = RgbImage::new(100, 100);
        let face = FaceBox::new(0.25, 0.25, 0.5, 0.5);
        let crop = face_region(&image, Some(&face), 0.0);
        assert_eq!(crop.dimensions(), (50, 50));

        let outside = FaceBox::new(1.5, 1.5, 0.2, 0.2);
        assert_eq!(face_region(&image, Some(&outside), 0.1).dimensions(), (100, 100));
        assert_eq!(face_region(&image, None, 0.1).dimensions(), (100, 100));
    }
}
