//! 反馈文本组合
//!
//! 把单帧检测结果、手势、姿态和情绪读数组合成叠加层文字和播报文本

use crate::emotion::{EmotionReading, UNKNOWN_EMOTION};
use crate::gesture::{self, Gesture, NO_GESTURE};
use crate::perception::{DetectionRecord, FaceBox, PoseRole};
use crate::posture::{self, PostureReport};

/// 没有姿态时的占位文本
pub const NO_POSE: &str = "No pose detected";

/// 单个人物槽位的反馈
#[derive(Debug, Clone, PartialEq)]
pub struct PersonFeedback {
    pub slot: usize,
    pub face: FaceBox,
    pub emotion: EmotionReading,
    /// 姿态只归属到离鼻子最近的人脸
    pub posture: Option<PostureReport>,
}

impl PersonFeedback {
    pub fn emotion_text(&self) -> String {
        emotion_text(&self.emotion)
    }

    pub fn posture_text(&self) -> &'static str {
        posture_text(self.posture.as_ref())
    }

    pub fn line(&self) -> String {
        format!(
            "Person {}: Emotion: {}, Posture: {}",
            self.slot + 1,
            self.emotion_text(),
            self.posture_text()
        )
    }
}

/// 单帧完整反馈
#[derive(Debug, Clone, PartialEq)]
pub struct FrameFeedback {
    pub people: Vec<PersonFeedback>,
    pub gesture: Gesture,
    pub posture: Option<PostureReport>,
    /// 无人脸时的默认情绪读数
    pub fallback_emotion: EmotionReading,
}

impl FrameFeedback {
    /// `readings[i]` 是槽位 i 的情绪读数; 缺失的槽位视为无结果
    pub fn compose(record: &DetectionRecord, readings: &[EmotionReading]) -> Self {
        let gesture = gesture::classify_frame(&record.hands);
        let posture = record.pose.as_ref().and_then(posture::classify);
        let owner = posture_slot(record);

        let people = record
            .faces
            .iter()
            .enumerate()
            .map(|(slot, face)| PersonFeedback {
                slot,
                face: *face,
                emotion: readings.get(slot).copied().unwrap_or_default(),
                posture: if owner == Some(slot) { posture } else { None },
            })
            .collect();

        Self {
            people,
            gesture,
            posture,
            fallback_emotion: EmotionReading::default(),
        }
    }

    /// 手势行
    pub fn gesture_line(&self) -> String {
        format!("Gesture: {}", self.gesture.phrase().unwrap_or(NO_GESTURE))
    }

    /// 叠加层文字: 每人一行 (无人脸时一行默认文本), 最后是手势行
    pub fn lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = if self.people.is_empty() {
            vec![format!(
                "Emotion: {}, Posture: {}",
                emotion_text(&self.fallback_emotion),
                posture_text(self.posture.as_ref())
            )]
        } else {
            self.people.iter().map(PersonFeedback::line).collect()
        };
        lines.push(self.gesture_line());
        lines
    }

    /// 主要人物: 第一个人脸槽位
    pub fn primary(&self) -> Option<&PersonFeedback> {
        self.people.first()
    }

    /// 播报文本: 手势短语 + 主要人物的姿态建议 + 新鲜的情绪
    pub fn announcement(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(phrase) = self.gesture.phrase() {
            parts.push(phrase.to_string());
        }

        let primary_posture = match self.primary() {
            Some(person) => person.posture,
            None => self.posture,
        };
        if let Some(report) = primary_posture {
            parts.push(report.label.sentence().to_string());
        }

        if let Some(person) = self.primary() {
            if let (Some(emotion), false) = (person.emotion.label, person.emotion.is_stale()) {
                parts.push(format!("You look {}.", emotion));
            }
        }

        if parts.is_empty() {
            NO_GESTURE.to_string()
        } else {
            parts.join(" ")
        }
    }
}

/// 姿态归属的人脸槽位: 人脸中心离鼻子最近者; 鼻子缺失或不可见时归属槽位 0
pub fn posture_slot(record: &DetectionRecord) -> Option<usize> {
    let pose = record.pose.as_ref()?;
    let faces = &record.faces;
    if faces.is_empty() {
        return None;
    }
    let Some(nose) = pose.get(PoseRole::Nose).filter(|p| p.visibility > 0.0) else {
        return Some(0);
    };
    faces
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            a.center()
                .distance_sq(nose)
                .total_cmp(&b.center().distance_sq(nose))
        })
        .map(|(slot, _)| slot)
}

/// 情绪文本, 过期结果加 `?`
fn emotion_text(reading: &EmotionReading) -> String {
    match reading.label {
        Some(emotion) if reading.is_stale() => format!("{}?", emotion),
        Some(emotion) => emotion.to_string(),
        None => UNKNOWN_EMOTION.to_string(),
    }
}

fn posture_text(report: Option<&PostureReport>) -> &'static str {
    report.map(|r| r.label.as_str()).unwrap_or(NO_POSE)
}

/// 会话总结: 退出时播报最后观察到的情绪与手势
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub emotion: String,
    pub gesture: String,
}

impl Default for SessionSummary {
    fn default() -> Self {
        Self {
            emotion: UNKNOWN_EMOTION.to_string(),
            gesture: NO_GESTURE.to_string(),
        }
    }
}

impl SessionSummary {
    pub fn observe(&mut self, feedback: &FrameFeedback) {
        if let Some(emotion) = feedback.primary().and_then(|p| p.emotion.label) {
            self.emotion = emotion.to_string();
        }
        self.gesture = feedback.gesture.phrase().unwrap_or(NO_GESTURE).to_string();
    }

    pub fn text(&self) -> String {
        format!("You are {} with gesture: {}.", self.emotion, self.gesture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::Emotion;
    use crate::perception::{HandLandmarks, HandPoint, Landmark, PoseLandmarks, PoseLayout};
    use std::time::Instant;

    fn thumbs_up() -> HandLandmarks {
        let mut points = [Landmark::new(0.5, 0.5); HandPoint::COUNT];
        points[HandPoint::Wrist as usize] = Landmark::new(0.5, 0.9);
        points[HandPoint::ThumbTip as usize] = Landmark::new(0.5, 0.1);
        HandLandmarks::new(points)
    }

    fn level_pose(nose: (f32, f32)) -> PoseLandmarks {
        let mut points = vec![Landmark::new(0.5, 0.5); 17];
        points[0] = Landmark::new(nose.0, nose.1);
        points[5] = Landmark::new(0.4, 0.4);
        points[6] = Landmark::new(0.6, 0.4);
        points[11] = Landmark::new(0.4, 0.7);
        points[12] = Landmark::new(0.6, 0.7);
        PoseLandmarks::new(PoseLayout::Coco17, points)
    }

    fn happy() -> EmotionReading {
        EmotionReading {
            label: Some(Emotion::Happy),
            updated_at: Some(Instant::now()),
            stale_since: None,
        }
    }

    #[test]
    fn test_empty_record_defaults() {
        let feedback = FrameFeedback::compose(&DetectionRecord::default(), &[]);
        assert_eq!(
            feedback.lines(),
            vec![
                "Emotion: Unknown, Posture: No pose detected".to_string(),
                "Gesture: No gesture detected".to_string(),
            ]
        );
        assert_eq!(feedback.announcement(), "No gesture detected");
    }

    #[test]
    fn test_pose_goes_to_face_nearest_nose() {
        let record = DetectionRecord {
            faces: vec![
                FaceBox::new(0.05, 0.05, 0.1, 0.1),
                FaceBox::new(0.45, 0.15, 0.1, 0.1),
            ],
            hands: vec![],
            pose: Some(level_pose((0.5, 0.2))),
        };
        let feedback = FrameFeedback::compose(&record, &[happy()]);
        let lines = feedback.lines();
        assert_eq!(lines[0], "Person 1: Emotion: happy, Posture: No pose detected");
        assert_eq!(lines[1], "Person 2: Emotion: Unknown, Posture: good posture");
        assert_eq!(lines[2], "Gesture: No gesture detected");
        // 主要人物没有姿态
        assert_eq!(feedback.announcement(), "You look happy.");
    }

    #[test]
    fn test_announcement_combines_parts() {
        let record = DetectionRecord {
            faces: vec![FaceBox::new(0.45, 0.1, 0.1, 0.1)],
            hands: vec![thumbs_up()],
            pose: Some(level_pose((0.5, 0.15))),
        };
        let feedback = FrameFeedback::compose(&record, &[happy()]);
        assert_eq!(
            feedback.announcement(),
            "Good Job! Good posture. You look happy."
        );
        assert_eq!(feedback.gesture_line(), "Gesture: Good Job!");
    }

    #[test]
    fn test_stale_emotion_marked_and_not_announced() {
        let record = DetectionRecord {
            faces: vec![FaceBox::new(0.4, 0.1, 0.2, 0.2)],
            ..Default::default()
        };
        let mut reading = happy();
        reading.stale_since = Some(Instant::now());
        let feedback = FrameFeedback::compose(&record, &[reading]);
        assert_eq!(
            feedback.lines()[0],
            "Person 1: Emotion: happy?, Posture: No pose detected"
        );
        assert_eq!(feedback.announcement(), "No gesture detected");
    }

    #[test]
    fn test_pose_without_nose_goes_to_first_face() {
        let mut pose = level_pose((0.9, 0.9));
        pose.points.truncate(0);
        let record = DetectionRecord {
            faces: vec![FaceBox::new(0.1, 0.1, 0.1, 0.1), FaceBox::new(0.8, 0.8, 0.1, 0.1)],
            hands: vec![],
            pose: Some(pose),
        };
        assert_eq!(posture_slot(&record), Some(0));
    }

    #[test]
    fn test_hidden_nose_keeps_posture_on_first_face() {
        let mut pose = level_pose((0.5, 0.2));
        // YOLOv8-pose 把未检出的关键点报告为 (0, 0, 0)
        pose.points[0] = Landmark::with_visibility(0.0, 0.0, 0.0);
        let record = DetectionRecord {
            faces: vec![FaceBox::new(0.4, 0.05, 0.1, 0.1), FaceBox::new(0.0, 0.0, 0.05, 0.05)],
            hands: vec![],
            pose: Some(pose),
        };
        assert_eq!(posture_slot(&record), Some(0));

        let lines = FrameFeedback::compose(&record, &[]).lines();
        assert_eq!(lines[0], "Person 1: Emotion: Unknown, Posture: good posture");
        assert_eq!(lines[1], "Person 2: Emotion: Unknown, Posture: No pose detected");
    }

    #[test]
    fn test_session_summary() {
        let mut summary = SessionSummary::default();
        assert_eq!(summary.text(), "You are Unknown with gesture: No gesture detected.");

        let record = DetectionRecord {
            faces: vec![FaceBox::new(0.4, 0.1, 0.2, 0.2)],
            hands: vec![thumbs_up()],
            pose: None,
        };
        summary.observe(&FrameFeedback::compose(&record, &[happy()]));
        assert_eq!(summary.text(), "You are happy with gesture: Good Job!.");

        // 之后无人脸: 保留最后的情绪
        summary.observe(&FrameFeedback::compose(&DetectionRecord::default(), &[]));
        assert_eq!(summary.text(), "You are happy with gesture: No gesture detected.");
    }
}
