// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8-pose 姿态模型
// 包含: 预处理、推理、后处理, 以及姿态/人脸两个检测器接口

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;
use ndarray::{s, Axis};
use parking_lot::Mutex;

use super::{letterbox, non_max_suppression, OrtEP, OrtSession};
use crate::capture::Frame;
use crate::error::PerceptionError;
use crate::perception::{FaceBox, FaceDetector, Landmark, PoseLandmarks, PoseLayout, PoseTracker};

const CXYWH_OFFSET: usize = 4;
const KPT_STEP: usize = 3;
const NUM_KEYPOINTS: usize = 17;
/// 头部关键点: 鼻子、双眼、双耳
const HEAD_KEYPOINTS: std::ops::Range<usize> = 0..5;

/// 检测到的一个人 (像素坐标)
#[derive(Debug, Clone, PartialEq)]
pub struct PosePerson {
    /// `[x, y, w, h, conf]`
    pub bbox: [f32; 5],
    /// `(x, y, conf)`, 低置信度点的 conf 为 0
    pub keypoints: Vec<(f32, f32, f32)>,
}

pub struct YoloPose {
    session: OrtSession,
    size: u32,
    conf: f32,
    kconf: f32,
    iou: f32,
}

impl YoloPose {
    pub fn new(path: impl AsRef<Path>, ep: OrtEP) -> Result<Self> {
        Ok(Self {
            session: OrtSession::build(path, ep)?,
            size: 640,
            conf: 0.35,
            kconf: 0.5,
            iou: 0.45,
        })
    }

    pub fn with_thresholds(mut self, conf: f32, kconf: f32, iou: f32) -> Self {
        self.conf = conf;
        self.kconf = kconf;
        self.iou = iou;
        self
    }

    pub fn run(&self, image: &RgbImage) -> Result<Vec<PosePerson>, PerceptionError> {
        let (x, ratio) = letterbox(image, self.size);
        let ys = self.session.run(x)?;
        self.postprocess(&ys, image.width() as f32, image.height() as f32, ratio)
    }

    /// 输出: `[1, 4 + 1 + 17 * 3, anchors]`
    fn postprocess(
        &self,
        ys: &[ndarray::Array<f32, ndarray::IxDyn>],
        width: f32,
        height: f32,
        ratio: f32,
    ) -> Result<Vec<PosePerson>, PerceptionError> {
        let preds = ys
            .first()
            .ok_or_else(|| PerceptionError::InvalidOutput("no output".into()))?;
        if preds.ndim() != 3 || preds.shape()[1] != CXYWH_OFFSET + 1 + KPT_STEP * NUM_KEYPOINTS {
            return Err(PerceptionError::InvalidOutput(format!(
                "unexpected pose output shape {:?}",
                preds.shape()
            )));
        }

        let mut people = Vec::new();
        let anchors = preds.index_axis(Axis(0), 0);
        for pred in anchors.axis_iter(Axis(1)) {
            let confidence = pred[CXYWH_OFFSET];
            if confidence < self.conf {
                continue;
            }

            let bbox = pred.slice(s![0..CXYWH_OFFSET]);
            let w = bbox[2] / ratio;
            let h = bbox[3] / ratio;
            let x = (bbox[0] / ratio - w / 2.).max(0.0).min(width);
            let y = (bbox[1] / ratio - h / 2.).max(0.0).min(height);

            let kpts = pred.slice(s![CXYWH_OFFSET + 1..]);
            let keypoints = (0..NUM_KEYPOINTS)
                .map(|i| {
                    let kconf = kpts[KPT_STEP * i + 2];
                    if kconf < self.kconf {
                        (0.0, 0.0, 0.0)
                    } else {
                        (
                            (kpts[KPT_STEP * i] / ratio).max(0.0).min(width),
                            (kpts[KPT_STEP * i + 1] / ratio).max(0.0).min(height),
                            kconf,
                        )
                    }
                })
                .collect();

            people.push(PosePerson {
                bbox: [x, y, w, h, confidence],
                keypoints,
            });
        }

        non_max_suppression(&mut people, self.iou, |p| p.bbox);
        Ok(people)
    }
}

impl PosePerson {
    /// 归一化的 COCO17 姿态
    pub fn landmarks(&self, width: f32, height: f32) -> PoseLandmarks {
        let points = self
            .keypoints
            .iter()
            .map(|&(x, y, c)| Landmark::with_visibility(x / width, y / height, c))
            .collect();
        PoseLandmarks::new(PoseLayout::Coco17, points)
    }

    /// 由可见的头部关键点推出人脸框; 少于两个可见点时返回 None
    pub fn face_box(&self, width: f32, height: f32) -> Option<FaceBox> {
        let head: Vec<(f32, f32, f32)> = self.keypoints[HEAD_KEYPOINTS]
            .iter()
            .copied()
            .filter(|&(_, _, c)| c > 0.0)
            .collect();
        if head.len() < 2 {
            return None;
        }

        let n = head.len() as f32;
        let cx = head.iter().map(|p| p.0).sum::<f32>() / n;
        let cy = head.iter().map(|p| p.1).sum::<f32>() / n;
        let (min_x, max_x) = head
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), p| (lo.min(p.0), hi.max(p.0)));
        let confidence = head.iter().map(|p| p.2).sum::<f32>() / n;

        let side = ((max_x - min_x) * 1.6).max(self.bbox[2] * 0.3);
        if side <= 1.0 {
            return None;
        }
        let face_w = side;
        let face_h = side * 1.25;
        Some(FaceBox {
            x: (cx - face_w / 2.0) / width,
            y: (cy - face_h / 2.0) / height,
            width: face_w / width,
            height: face_h / height,
            confidence,
        })
    }
}

/// 同一帧的推理结果在姿态/人脸/手部检测器之间共享
struct PoseCache {
    model: YoloPose,
    last: Option<(u64, Arc<Vec<PosePerson>>)>,
}

#[derive(Clone)]
pub struct SharedPose(Arc<Mutex<PoseCache>>);

impl SharedPose {
    pub fn new(model: YoloPose) -> Self {
        Self(Arc::new(Mutex::new(PoseCache { model, last: None })))
    }

    /// 当前帧的检测结果 (每帧只推理一次)
    pub fn people(&self, frame: &Frame) -> Result<Arc<Vec<PosePerson>>, PerceptionError> {
        let mut cache = self.0.lock();
        if let Some((index, people)) = &cache.last {
            if *index == frame.index {
                return Ok(people.clone());
            }
        }
        let people = Arc::new(cache.model.run(&frame.image)?);
        cache.last = Some((frame.index, people.clone()));
        Ok(people)
    }

    pub fn pose_tracker(&self) -> OnnxPoseTracker {
        OnnxPoseTracker(self.clone())
    }

    pub fn face_detector(&self) -> OnnxFaceDetector {
        OnnxFaceDetector(self.clone())
    }
}

/// 置信度最高的人的姿态
pub struct OnnxPoseTracker(SharedPose);

impl PoseTracker for OnnxPoseTracker {
    fn track_pose(&mut self, frame: &Frame) -> Result<Option<PoseLandmarks>, PerceptionError> {
        let people = self.0.people(frame)?;
        let (w, h) = (frame.width() as f32, frame.height() as f32);
        Ok(people.first().map(|p| p.landmarks(w, h)))
    }
}

/// 所有人的人脸框
pub struct OnnxFaceDetector(SharedPose);

impl FaceDetector for OnnxFaceDetector {
    fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<FaceBox>, PerceptionError> {
        let people = self.0.people(frame)?;
        let (w, h) = (frame.width() as f32, frame.height() as f32);
        Ok(people.iter().filter_map(|p| p.face_box(w, h)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(head: &[(f32, f32, f32)]) -> PosePerson {
        let mut keypoints = vec![(0.0, 0.0, 0.0); NUM_KEYPOINTS];
        keypoints[..head.len()].copy_from_slice(head);
        PosePerson {
            bbox: [100.0, 50.0, 100.0, 300.0, 0.9],
            keypoints,
        }
    }

    #[test]
    fn test_face_box_from_head_keypoints() {
        let p = person(&[(150.0, 100.0, 0.9), (140.0, 90.0, 0.9), (160.0, 90.0, 0.9)]);
        let face = p.face_box(400.0, 400.0).unwrap();
        // 中心在头部关键点均值附近
        let c = face.center();
        assert!((c.x * 400.0 - 150.0).abs() < 1e-3);
        assert!((c.y * 400.0 - 93.333).abs() < 1e-2);
        // 边长不小于人体框宽度的 0.3
        assert!(face.width * 400.0 >= 30.0 - 1e-3);
    }

    #[test]
    fn test_face_box_needs_two_points() {
        let p = person(&[(150.0, 100.0, 0.9)]);
        assert!(p.face_box(400.0, 400.0).is_none());
    }

    #[test]
    fn test_landmarks_normalized() {
        let p = person(&[(200.0, 100.0, 0.8)]);
        let pose = p.landmarks(400.0, 200.0);
        assert_eq!(pose.layout, PoseLayout::Coco17);
        assert_eq!(pose.points.len(), NUM_KEYPOINTS);
        assert_eq!((pose.points[0].x, pose.points[0].y), (0.5, 0.5));
        assert_eq!(pose.points[0].visibility, 0.8);
    }
}
