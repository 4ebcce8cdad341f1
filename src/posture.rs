use std::fmt;

use crate::perception::{Landmark, PoseLandmarks, PoseRole};

/// 左右高度差阈值 (归一化帧高)
pub const LEVEL_THRESHOLD: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostureLabel {
    AlignShoulders,
    KeepHipsLevel,
    Good,
}

impl PostureLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostureLabel::AlignShoulders => "align shoulders",
            PostureLabel::KeepHipsLevel => "keep hips level",
            PostureLabel::Good => "good posture",
        }
    }

    /// 语音播报用的完整句子
    pub fn sentence(&self) -> &'static str {
        match self {
            PostureLabel::AlignShoulders => "Please align your shoulders.",
            PostureLabel::KeepHipsLevel => "Keep your hips level.",
            PostureLabel::Good => "Good posture.",
        }
    }
}

impl fmt::Display for PostureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostureReport {
    pub label: PostureLabel,
    pub aligned: bool,
    pub shoulder_delta: f32,
    pub hip_delta: f32,
}

/// 姿态评估: 肩膀高度差优先于髋部高度差
///
/// 缺少肩/髋关键点 (或可见度为 0) 时返回 None
pub fn classify(pose: &PoseLandmarks) -> Option<PostureReport> {
    let ls = detected(pose, PoseRole::LeftShoulder)?;
    let rs = detected(pose, PoseRole::RightShoulder)?;
    let lh = detected(pose, PoseRole::LeftHip)?;
    let rh = detected(pose, PoseRole::RightHip)?;

    let shoulder_delta = (ls.y - rs.y).abs();
    let hip_delta = (lh.y - rh.y).abs();

    let label = if shoulder_delta > LEVEL_THRESHOLD {
        PostureLabel::AlignShoulders
    } else if hip_delta > LEVEL_THRESHOLD {
        PostureLabel::KeepHipsLevel
    } else {
        PostureLabel::Good
    };

    Some(PostureReport {
        label,
        aligned: label == PostureLabel::Good,
        shoulder_delta,
        hip_delta,
    })
}

fn detected(pose: &PoseLandmarks, role: PoseRole) -> Option<&Landmark> {
    pose.get(role).filter(|p| p.visibility > 0.0)
}
