// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 手部关键点模型 (21 点)
// 输入: [1, 224, 224, 3] RGB 0..1 (NHWC)
// 输出: 63 维关键点 (像素坐标 x, y, z) + 1 维手部存在概率

use std::path::Path;

use anyhow::Result;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array;

use super::yolov8_pose::{PosePerson, SharedPose};
use super::{OrtEP, OrtSession};
use crate::capture::Frame;
use crate::error::PerceptionError;
use crate::perception::{HandLandmarks, HandPoint, HandTracker, Landmark};

const INPUT_SIZE: u32 = 224;
const PRESENCE_THRESHOLD: f32 = 0.5;
const MIN_CROP: f32 = 48.0;

/// COCO17: (肘, 腕)
const ARMS: [(usize, usize); 2] = [(7, 9), (8, 10)];

/// 裁剪区域 (像素): x, y, 边长
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandCrop {
    pub x: u32,
    pub y: u32,
    pub side: u32,
}

pub struct HandLandmarkModel {
    session: OrtSession,
}

impl HandLandmarkModel {
    pub fn new(path: impl AsRef<Path>, ep: OrtEP) -> Result<Self> {
        Ok(Self {
            session: OrtSession::build(path, ep)?,
        })
    }

    /// 在裁剪区域上运行, 返回整帧归一化坐标
    pub fn run(&self, image: &RgbImage, crop: HandCrop) -> Result<Option<HandLandmarks>, PerceptionError> {
        let region = image::imageops::crop_imm(image, crop.x, crop.y, crop.side, crop.side).to_image();
        let region = image::imageops::resize(&region, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

        let mut x = Array::zeros((1, INPUT_SIZE as usize, INPUT_SIZE as usize, 3)).into_dyn();
        for (px, py, rgb) in region.enumerate_pixels() {
            for c in 0..3 {
                x[[0, py as usize, px as usize, c]] = rgb.0[c] as f32 / 255.0;
            }
        }

        let ys = self.session.run(x)?;
        let coords = ys
            .iter()
            .find(|y| y.len() == HandPoint::COUNT * 3)
            .ok_or_else(|| PerceptionError::InvalidOutput("missing hand landmark output".into()))?;
        let presence = ys
            .iter()
            .find(|y| y.len() == 1)
            .and_then(|y| y.iter().next().copied())
            .unwrap_or(1.0);
        if presence < PRESENCE_THRESHOLD {
            return Ok(None);
        }

        let coords: Vec<f32> = coords.iter().copied().collect();
        Ok(Some(to_frame_coords(
            &coords,
            crop,
            image.width() as f32,
            image.height() as f32,
        )))
    }
}

/// 模型输入坐标 → 整帧归一化坐标
fn to_frame_coords(coords: &[f32], crop: HandCrop, width: f32, height: f32) -> HandLandmarks {
    let scale = crop.side as f32 / INPUT_SIZE as f32;
    let points = std::array::from_fn(|i| {
        let x = crop.x as f32 + coords[i * 3] * scale;
        let y = crop.y as f32 + coords[i * 3 + 1] * scale;
        let mut p = Landmark::new(x / width, y / height);
        p.z = coords[i * 3 + 2] / INPUT_SIZE as f32;
        p
    });
    HandLandmarks::new(points)
}

/// 以手腕为中心、沿前臂方向外推的正方形区域; 手腕或手肘不可见时为 None
pub fn hand_crop(
    elbow: (f32, f32, f32),
    wrist: (f32, f32, f32),
    width: u32,
    height: u32,
) -> Option<HandCrop> {
    if elbow.2 <= 0.0 || wrist.2 <= 0.0 {
        return None;
    }
    let (dx, dy) = (wrist.0 - elbow.0, wrist.1 - elbow.1);
    let forearm = (dx * dx + dy * dy).sqrt();
    let cx = wrist.0 + 0.5 * dx;
    let cy = wrist.1 + 0.5 * dy;
    let side = (2.0 * forearm).max(MIN_CROP).min(width.min(height) as f32);

    let x0 = (cx - side / 2.0).clamp(0.0, width as f32 - side);
    let y0 = (cy - side / 2.0).clamp(0.0, height as f32 - side);
    let side = side as u32;
    if side == 0 {
        return None;
    }
    Some(HandCrop {
        x: x0 as u32,
        y: y0 as u32,
        side,
    })
}

fn crops(person: &PosePerson, width: u32, height: u32) -> Vec<HandCrop> {
    ARMS.iter()
        .filter_map(|&(elbow, wrist)| {
            hand_crop(person.keypoints[elbow], person.keypoints[wrist], width, height)
        })
        .collect()
}

/// 基于共享姿态结果的手部跟踪器
pub struct OnnxHandTracker {
    pose: SharedPose,
    model: HandLandmarkModel,
}

impl OnnxHandTracker {
    pub fn new(pose: SharedPose, model: HandLandmarkModel) -> Self {
        Self { pose, model }
    }
}

impl HandTracker for OnnxHandTracker {
    fn track_hands(&mut self, frame: &Frame) -> Result<Vec<HandLandmarks>, PerceptionError> {
        let people = self.pose.people(frame)?;
        let mut hands = Vec::new();
        for person in people.iter() {
            for crop in crops(person, frame.width(), frame.height()) {
                if let Some(hand) = self.model.run(&frame.image, crop)? {
                    hands.push(hand);
                }
            }
        }
        Ok(hands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hand_crop_extends_forearm() {
        let crop = hand_crop((100.0, 100.0, 0.9), (100.0, 140.0, 0.9), 640, 480).unwrap();
        // 中心 (100, 160), 边长 80
        assert_eq!(crop, HandCrop { x: 60, y: 120, side: 80 });
    }

    #[test]
    fn test_hand_crop_min_size_and_clamp() {
        let crop = hand_crop((5.0, 5.0, 0.9), (6.0, 6.0, 0.9), 640, 480).unwrap();
        assert_eq!(crop.side, 48);
        assert_eq!((crop.x, crop.y), (0, 0));

        assert!(hand_crop((5.0, 5.0, 0.0), (6.0, 6.0, 0.9), 640, 480).is_none());
    }

    #[test]
    fn test_frame_coords_mapping() {
        let mut coords = vec![0.0; HandPoint::COUNT * 3];
        coords[0] = 112.0;
        coords[1] = 224.0;
        let crop = HandCrop { x: 100, y: 50, side: 112 };
        let hand = to_frame_coords(&coords, crop, 400.0, 200.0);
        let wrist = hand.get(HandPoint::Wrist);
        assert!((wrist.x - 156.0 / 400.0).abs() < 1e-6);
        assert!((wrist.y - 162.0 / 200.0).abs() < 1e-6);
    }
}
