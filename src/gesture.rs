//! 手势分类 (Gesture Classifier)
//!
//! 固定几何阈值, 按优先级依次判断, 第一个命中的谓词胜出:
//! thumbs_up → open_palm → pointing → fist → unknown

use std::fmt;

use phf::phf_map;

use crate::perception::{HandLandmarks, HandPoint};

/// 手势词表: 手势ID → 播报短语
static GESTURE_PHRASES: phf::Map<&'static str, &'static str> = phf_map! {
    "thumbs_up" => "Good Job!",
    "open_palm" => "Hello there!",
    "pointing" => "Look over there!",
    "fist" => "Stay strong!",
};

/// 无手势时的默认文本
pub const NO_GESTURE: &str = "No gesture detected";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gesture {
    ThumbsUp,
    OpenPalm,
    Pointing,
    Fist,
    Unknown,
}

impl Gesture {
    pub fn id(&self) -> &'static str {
        match self {
            Gesture::ThumbsUp => "thumbs_up",
            Gesture::OpenPalm => "open_palm",
            Gesture::Pointing => "pointing",
            Gesture::Fist => "fist",
            Gesture::Unknown => "unknown",
        }
    }

    /// 词表中的播报短语, unknown 没有短语
    pub fn phrase(&self) -> Option<&'static str> {
        GESTURE_PHRASES.get(self.id()).copied()
    }

    pub fn is_known(&self) -> bool {
        *self != Gesture::Unknown
    }
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// 所有关键点 (x, y) 重合
fn is_degenerate(hand: &HandLandmarks) -> bool {
    let first = hand.points[0];
    hand.points
        .iter()
        .all(|p| p.x == first.x && p.y == first.y)
}

/// 对一只手分类
pub fn classify(hand: &HandLandmarks) -> Gesture {
    if is_degenerate(hand) {
        return Gesture::Unknown;
    }

    let wrist = hand.get(HandPoint::Wrist);
    let thumb = hand.get(HandPoint::ThumbTip);
    let index = hand.get(HandPoint::IndexTip);
    let middle = hand.get(HandPoint::MiddleTip);

    // 图像坐标 y 向下, 更小的 y 表示更高
    if thumb.y < index.y && thumb.y < middle.y {
        return Gesture::ThumbsUp;
    }
    if index.y < wrist.y {
        return Gesture::OpenPalm;
    }
    if thumb.x < index.x && thumb.x < middle.x {
        return Gesture::Pointing;
    }
    let fingers = HandPoint::IndexMcp as usize..=HandPoint::PinkyTip as usize;
    if hand.points[fingers].iter().all(|p| p.y > wrist.y) {
        return Gesture::Fist;
    }
    Gesture::Unknown
}

/// 多只手时取第一个识别出的手势
pub fn classify_frame(hands: &[HandLandmarks]) -> Gesture {
    hands
        .iter()
        .map(classify)
        .find(Gesture::is_known)
        .unwrap_or(Gesture::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::Landmark;
    use proptest::prelude::*;

    fn hand_with(wrist: (f32, f32), overrides: &[(HandPoint, (f32, f32))]) -> HandLandmarks {
        let mut points = [Landmark::new(0.5, 0.5); HandPoint::COUNT];
        points[HandPoint::Wrist as usize] = Landmark::new(wrist.0, wrist.1);
        for (point, (x, y)) in overrides {
            points[*point as usize] = Landmark::new(*x, *y);
        }
        HandLandmarks::new(points)
    }

    #[test]
    fn test_thumbs_up() {
        let hand = hand_with(
            (0.5, 0.9),
            &[
                (HandPoint::ThumbTip, (0.5, 0.2)),
                (HandPoint::IndexTip, (0.55, 0.6)),
                (HandPoint::MiddleTip, (0.6, 0.6)),
            ],
        );
        assert_eq!(classify(&hand), Gesture::ThumbsUp);
        assert_eq!(Gesture::ThumbsUp.phrase(), Some("Good Job!"));
    }

    #[test]
    fn test_open_palm() {
        // 拇指低于中指, 食指高于手腕
        let hand = hand_with(
            (0.5, 0.9),
            &[
                (HandPoint::ThumbTip, (0.3, 0.7)),
                (HandPoint::IndexTip, (0.45, 0.3)),
                (HandPoint::MiddleTip, (0.5, 0.2)),
            ],
        );
        assert_eq!(classify(&hand), Gesture::OpenPalm);
    }

    #[test]
    fn test_pointing() {
        // 食指在手腕下方, 拇指位于食指/中指左侧
        let hand = hand_with(
            (0.5, 0.4),
            &[
                (HandPoint::ThumbTip, (0.2, 0.9)),
                (HandPoint::IndexTip, (0.6, 0.45)),
                (HandPoint::MiddleTip, (0.65, 0.45)),
            ],
        );
        assert_eq!(classify(&hand), Gesture::Pointing);
    }

    #[test]
    fn test_fist() {
        // 所有手指关节都在手腕下方, 拇指在右侧
        let hand = hand_with(
            (0.5, 0.3),
            &[
                (HandPoint::ThumbTip, (0.8, 0.9)),
                (HandPoint::IndexTip, (0.4, 0.6)),
                (HandPoint::MiddleTip, (0.45, 0.6)),
            ],
        );
        assert_eq!(classify(&hand), Gesture::Fist);
        assert_eq!(Gesture::Fist.phrase(), Some("Stay strong!"));
    }

    #[test]
    fn test_unknown_when_nothing_matches() {
        // 手腕与其它点同高: 没有任何手指严格在手腕下方
        let hand = hand_with(
            (0.5, 0.5),
            &[
                (HandPoint::ThumbTip, (0.8, 0.9)),
                (HandPoint::IndexTip, (0.4, 0.6)),
                (HandPoint::MiddleTip, (0.45, 0.6)),
            ],
        );
        assert_eq!(classify(&hand), Gesture::Unknown);
        assert_eq!(Gesture::Unknown.phrase(), None);
    }

    #[test]
    fn test_degenerate_is_unknown() {
        let hand = HandLandmarks::new([Landmark::new(0.3, 0.3); HandPoint::COUNT]);
        assert_eq!(classify(&hand), Gesture::Unknown);
    }

    #[test]
    fn test_frame_takes_first_known() {
        let unknown = HandLandmarks::new([Landmark::new(0.3, 0.3); HandPoint::COUNT]);
        let palm = hand_with(
            (0.5, 0.9),
            &[
                (HandPoint::ThumbTip, (0.3, 0.7)),
                (HandPoint::IndexTip, (0.45, 0.3)),
            ],
        );
        assert_eq!(classify_frame(&[unknown.clone(), palm]), Gesture::OpenPalm);
        assert_eq!(classify_frame(&[unknown]), Gesture::Unknown);
        assert_eq!(classify_frame(&[]), Gesture::Unknown);
    }

    fn arb_hand() -> impl Strategy<Value = HandLandmarks> {
        prop::collection::vec((0.0f32..=1.0, 0.0f32..=1.0), HandPoint::COUNT).prop_map(|coords| {
            let mut points = [Landmark::default(); HandPoint::COUNT];
            for (slot, (x, y)) in points.iter_mut().zip(coords) {
                *slot = Landmark::new(x, y);
            }
            HandLandmarks::new(points)
        })
    }

    proptest! {
        #[test]
        fn prop_thumb_above_index_and_middle_wins(hand in arb_hand()) {
            let thumb = hand.get(HandPoint::ThumbTip).y;
            prop_assume!(thumb < hand.get(HandPoint::IndexTip).y);
            prop_assume!(thumb < hand.get(HandPoint::MiddleTip).y);
            prop_assert_eq!(classify(&hand), Gesture::ThumbsUp);
        }

        #[test]
        fn prop_classification_is_pure(hand in arb_hand()) {
            prop_assert_eq!(classify(&hand), classify(&hand.clone()));
        }

        #[test]
        fn prop_unmatched_is_unknown(hand in arb_hand()) {
            let g = classify(&hand);
            let wrist = hand.get(HandPoint::Wrist);
            let thumb = hand.get(HandPoint::ThumbTip);
            let index = hand.get(HandPoint::IndexTip);
            let middle = hand.get(HandPoint::MiddleTip);
            let any_match = (thumb.y < index.y && thumb.y < middle.y)
                || index.y < wrist.y
                || (thumb.x < index.x && thumb.x < middle.x)
                || hand.points[5..=20].iter().all(|p| p.y > wrist.y);
            if !any_match {
                prop_assert_eq!(g, Gesture::Unknown);
            }
        }
    }
}
