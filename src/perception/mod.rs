/// 感知适配层 (Perception Adapter)
///
/// 把人脸/手部/姿态三个外部检测器包装成单帧 `DetectionRecord`
/// - 检测器返回空结果是正常情况
/// - 检测器报错或 panic 时降级为该检测器的空结果, 并计数
pub mod replay;
pub mod types;

pub use replay::{RecordedFrame, ReplayPerception, ReplayScript};
pub use types::{
    DetectionRecord, FaceBox, HandLandmarks, HandPoint, Landmark, PoseLandmarks, PoseLayout,
    PoseRole, HAND_CONNECTIONS,
};

use std::panic::{self, AssertUnwindSafe};

use tracing::warn;

use crate::capture::Frame;
use crate::error::PerceptionError;

/// 人脸检测器
pub trait FaceDetector: Send {
    fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<FaceBox>, PerceptionError>;
}

/// 手部关键点追踪器
pub trait HandTracker: Send {
    fn track_hands(&mut self, frame: &Frame) -> Result<Vec<HandLandmarks>, PerceptionError>;
}

/// 姿态关键点追踪器 (每帧至多一个人)
pub trait PoseTracker: Send {
    fn track_pose(&mut self, frame: &Frame) -> Result<Option<PoseLandmarks>, PerceptionError>;
}

/// 检测器类别 (用于诊断计数)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    Face,
    Hand,
    Pose,
}

/// 诊断统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerceptionStats {
    pub frames: u64,
    pub face_failures: u64,
    pub hand_failures: u64,
    pub pose_failures: u64,
}

impl PerceptionStats {
    pub fn failures(&self, kind: DetectorKind) -> u64 {
        match kind {
            DetectorKind::Face => self.face_failures,
            DetectorKind::Hand => self.hand_failures,
            DetectorKind::Pose => self.pose_failures,
        }
    }

    fn record_failure(&mut self, kind: DetectorKind) {
        match kind {
            DetectorKind::Face => self.face_failures += 1,
            DetectorKind::Hand => self.hand_failures += 1,
            DetectorKind::Pose => self.pose_failures += 1,
        }
    }
}

#[derive(Default)]
pub struct PerceptionAdapter {
    faces: Option<Box<dyn FaceDetector>>,
    hands: Option<Box<dyn HandTracker>>,
    pose: Option<Box<dyn PoseTracker>>,
    stats: PerceptionStats,
}

impl PerceptionAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faces(mut self, detector: impl FaceDetector + 'static) -> Self {
        self.faces = Some(Box::new(detector));
        self
    }

    pub fn with_hands(mut self, tracker: impl HandTracker + 'static) -> Self {
        self.hands = Some(Box::new(tracker));
        self
    }

    pub fn with_pose(mut self, tracker: impl PoseTracker + 'static) -> Self {
        self.pose = Some(Box::new(tracker));
        self
    }

    pub fn stats(&self) -> PerceptionStats {
        self.stats
    }

    /// 对一帧运行全部检测器
    pub fn detect(&mut self, frame: &Frame) -> DetectionRecord {
        self.stats.frames += 1;
        let mut record = DetectionRecord::default();

        if let Some(detector) = self.faces.as_mut() {
            let faces = guarded(DetectorKind::Face, frame, || detector.detect_faces(frame));
            match faces {
                Some(faces) => record.faces = faces,
                None => self.stats.record_failure(DetectorKind::Face),
            }
        }

        if let Some(tracker) = self.hands.as_mut() {
            match guarded(DetectorKind::Hand, frame, || tracker.track_hands(frame)) {
                Some(hands) => record.hands = hands,
                None => self.stats.record_failure(DetectorKind::Hand),
            }
        }

        if let Some(tracker) = self.pose.as_mut() {
            match guarded(DetectorKind::Pose, frame, || tracker.track_pose(frame)) {
                Some(pose) => record.pose = pose,
                None => self.stats.record_failure(DetectorKind::Pose),
            }
        }

        record
    }
}

/// 运行单个检测器, 错误和 panic 都转为 None
fn guarded<T>(
    kind: DetectorKind,
    frame: &Frame,
    call: impl FnOnce() -> Result<T, PerceptionError>,
) -> Option<T> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|payload| {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(PerceptionError::Panicked(msg))
    });

    match outcome {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(detector = ?kind, frame = frame.index, "⚠️ 检测失败, 本帧按无结果处理: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    struct FixedFaces(Vec<FaceBox>);

    impl FaceDetector for FixedFaces {
        fn detect_faces(&mut self, _frame: &Frame) -> Result<Vec<FaceBox>, PerceptionError> {
            Ok(self.0.clone())
        }
    }

    struct FailingHands;

    impl HandTracker for FailingHands {
        fn track_hands(&mut self, _frame: &Frame) -> Result<Vec<HandLandmarks>, PerceptionError> {
            Err(PerceptionError::InvalidOutput("shape mismatch".into()))
        }
    }

    struct PanickingPose;

    impl PoseTracker for PanickingPose {
        fn track_pose(&mut self, _frame: &Frame) -> Result<Option<PoseLandmarks>, PerceptionError> {
            panic!("backend exploded")
        }
    }

    fn frame() -> Frame {
        Frame::new(7, RgbImage::new(8, 8))
    }

    #[test]
    fn test_no_detectors_yields_empty_record() {
        let mut adapter = PerceptionAdapter::new();
        let record = adapter.detect(&frame());
        assert!(record.is_empty());
        assert_eq!(adapter.stats().frames, 1);
    }

    #[test]
    fn test_failures_are_contained_and_counted() {
        let face = FaceBox::new(0.1, 0.1, 0.2, 0.2);
        let mut adapter = PerceptionAdapter::new()
            .with_faces(FixedFaces(vec![face]))
            .with_hands(FailingHands)
            .with_pose(PanickingPose);

        let record = adapter.detect(&frame());
        assert_eq!(record.faces, vec![face]);
        assert!(record.hands.is_empty());
        assert!(record.pose.is_none());

        adapter.detect(&frame());
        let stats = adapter.stats();
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.failures(DetectorKind::Face), 0);
        assert_eq!(stats.failures(DetectorKind::Hand), 2);
        assert_eq!(stats.failures(DetectorKind::Pose), 2);
    }
}
