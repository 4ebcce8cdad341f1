// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// FER+ 表情分类模型
// 输入: [1, 1, 64, 64] 灰度 0..255, 输出: 8 类得分

use std::path::Path;

use anyhow::Result;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array;

use super::{OrtEP, OrtSession};
use crate::emotion::{Emotion, EmotionClassifier, EmotionQuery};
use crate::error::EmotionError;

const INPUT_SIZE: u32 = 64;
/// 小于此边长的区域视为没有人脸
const MIN_REGION: u32 = 16;

/// 模型输出顺序
const LABELS: [Emotion; 8] = [
    Emotion::Neutral,
    Emotion::Happy,
    Emotion::Surprise,
    Emotion::Sad,
    Emotion::Angry,
    Emotion::Disgust,
    Emotion::Fear,
    Emotion::Contempt,
];

pub struct FerPlus {
    session: OrtSession,
}

impl FerPlus {
    pub fn new(path: impl AsRef<Path>, ep: OrtEP) -> Result<Self> {
        Ok(Self {
            session: OrtSession::build(path, ep)?,
        })
    }

    fn preprocess(region: &RgbImage) -> Array<f32, ndarray::IxDyn> {
        let gray = image::imageops::grayscale(region);
        let gray = image::imageops::resize(&gray, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
        let mut x = Array::zeros((1, 1, INPUT_SIZE as usize, INPUT_SIZE as usize)).into_dyn();
        for (px, py, luma) in gray.enumerate_pixels() {
            x[[0, 0, py as usize, px as usize]] = luma.0[0] as f32;
        }
        x
    }
}

/// 得分最高的类别
fn argmax(scores: &[f32]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}

impl EmotionClassifier for FerPlus {
    fn classify(&self, query: &EmotionQuery) -> Result<Emotion, EmotionError> {
        let (w, h) = query.region.dimensions();
        if w < MIN_REGION || h < MIN_REGION {
            return Err(EmotionError::NoFace);
        }

        let ys = self
            .session
            .run(Self::preprocess(&query.region))
            .map_err(|e| EmotionError::Backend(e.to_string()))?;
        let scores: Vec<f32> = ys
            .first()
            .map(|y| y.iter().copied().collect())
            .unwrap_or_default();
        if scores.len() != LABELS.len() {
            return Err(EmotionError::Backend(format!(
                "{}: expected {} scores, got {}",
                self.session.name(),
                LABELS.len(),
                scores.len()
            )));
        }

        argmax(&scores)
            .map(|i| LABELS[i])
            .ok_or_else(|| EmotionError::Backend("empty scores".into()))
    }
}
