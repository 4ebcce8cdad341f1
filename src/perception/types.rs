//! 感知数据结构 (Perception data types)
//!
//! 所有坐标都是归一化坐标: x/y ∈ [0, 1], 相对于帧宽高

use serde::{Deserialize, Serialize};

/// 单个关键点
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
    #[serde(default = "full_visibility")]
    pub visibility: f32,
}

fn full_visibility() -> f32 {
    1.0
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            z: 0.0,
            visibility: 1.0,
        }
    }

    pub fn with_visibility(x: f32, y: f32, visibility: f32) -> Self {
        Self {
            x,
            y,
            z: 0.0,
            visibility,
        }
    }

    /// 转换为像素坐标
    pub fn to_pixel(&self, width: u32, height: u32) -> (f32, f32) {
        (self.x * width as f32, self.y * height as f32)
    }

    pub fn distance_sq(&self, other: &Landmark) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

/// 人脸框 (归一化 xywh)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default = "full_visibility")]
    pub confidence: f32,
}

impl FaceBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 1.0,
        }
    }

    pub fn center(&self) -> Landmark {
        Landmark::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// 外扩 `margin` (相对框尺寸) 后转换为像素区域 (x, y, w, h), 裁剪到图像内
    ///
    /// 框完全落在图像外或面积为0时返回 None
    pub fn pixel_region(&self, width: u32, height: u32, margin: f32) -> Option<(u32, u32, u32, u32)> {
        let mx = self.width * margin;
        let my = self.height * margin;
        let x1 = ((self.x - mx).max(0.0) * width as f32) as u32;
        let y1 = ((self.y - my).max(0.0) * height as f32) as u32;
        let x2 = (((self.x + self.width + mx).min(1.0)) * width as f32) as u32;
        let y2 = (((self.y + self.height + my).min(1.0)) * height as f32) as u32;
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

/// MediaPipe 手部 21 关键点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum HandPoint {
    Wrist = 0,
    ThumbCmc = 1,
    ThumbMcp = 2,
    ThumbIp = 3,
    ThumbTip = 4,
    IndexMcp = 5,
    IndexPip = 6,
    IndexDip = 7,
    IndexTip = 8,
    MiddleMcp = 9,
    MiddlePip = 10,
    MiddleDip = 11,
    MiddleTip = 12,
    RingMcp = 13,
    RingPip = 14,
    RingDip = 15,
    RingTip = 16,
    PinkyMcp = 17,
    PinkyPip = 18,
    PinkyDip = 19,
    PinkyTip = 20,
}

impl HandPoint {
    pub const COUNT: usize = 21;
}

/// 手部骨架连接
pub const HAND_CONNECTIONS: [(usize, usize); 20] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (5, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (9, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (13, 17),
    (0, 17),
    (17, 18),
    (18, 19),
];

/// 一只手的关键点 (固定 21 个)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandLandmarks {
    pub points: [Landmark; HandPoint::COUNT],
}

impl HandLandmarks {
    pub fn new(points: [Landmark; HandPoint::COUNT]) -> Self {
        Self { points }
    }

    pub fn get(&self, point: HandPoint) -> &Landmark {
        &self.points[point as usize]
    }
}

/// 姿态关键点布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseLayout {
    /// MediaPipe BlazePose 33 点
    #[serde(rename = "blazepose33")]
    BlazePose33,
    /// COCO 17 点 (YOLOv8-pose / MoveNet)
    #[serde(rename = "coco17")]
    Coco17,
}

/// 姿态关键点语义角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseRole {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
}

/// COCO 17 骨架连接
const COCO_SKELETON: [(usize, usize); 16] = [
    (0, 1),
    (0, 2),
    (1, 3),
    (2, 4),
    (5, 6),
    (5, 11),
    (6, 12),
    (11, 12),
    (5, 7),
    (6, 8),
    (7, 9),
    (8, 10),
    (11, 13),
    (12, 14),
    (13, 15),
    (14, 16),
];

/// BlazePose 上半身 + 躯干连接
const BLAZEPOSE_SKELETON: [(usize, usize); 14] = [
    (11, 12),
    (11, 13),
    (13, 15),
    (12, 14),
    (14, 16),
    (11, 23),
    (12, 24),
    (23, 24),
    (23, 25),
    (25, 27),
    (24, 26),
    (26, 28),
    (0, 2),
    (0, 5),
];

impl PoseLayout {
    pub fn point_count(&self) -> usize {
        match self {
            PoseLayout::BlazePose33 => 33,
            PoseLayout::Coco17 => 17,
        }
    }

    pub fn index_of(&self, role: PoseRole) -> usize {
        match (self, role) {
            (_, PoseRole::Nose) => 0,
            (PoseLayout::BlazePose33, PoseRole::LeftEye) => 2,
            (PoseLayout::BlazePose33, PoseRole::RightEye) => 5,
            (PoseLayout::BlazePose33, PoseRole::LeftEar) => 7,
            (PoseLayout::BlazePose33, PoseRole::RightEar) => 8,
            (PoseLayout::BlazePose33, PoseRole::LeftShoulder) => 11,
            (PoseLayout::BlazePose33, PoseRole::RightShoulder) => 12,
            (PoseLayout::BlazePose33, PoseRole::LeftWrist) => 15,
            (PoseLayout::BlazePose33, PoseRole::RightWrist) => 16,
            (PoseLayout::BlazePose33, PoseRole::LeftHip) => 23,
            (PoseLayout::BlazePose33, PoseRole::RightHip) => 24,
            (PoseLayout::Coco17, PoseRole::LeftEye) => 1,
            (PoseLayout::Coco17, PoseRole::RightEye) => 2,
            (PoseLayout::Coco17, PoseRole::LeftEar) => 3,
            (PoseLayout::Coco17, PoseRole::RightEar) => 4,
            (PoseLayout::Coco17, PoseRole::LeftShoulder) => 5,
            (PoseLayout::Coco17, PoseRole::RightShoulder) => 6,
            (PoseLayout::Coco17, PoseRole::LeftWrist) => 9,
            (PoseLayout::Coco17, PoseRole::RightWrist) => 10,
            (PoseLayout::Coco17, PoseRole::LeftHip) => 11,
            (PoseLayout::Coco17, PoseRole::RightHip) => 12,
        }
    }

    pub fn skeleton(&self) -> &'static [(usize, usize)] {
        match self {
            PoseLayout::BlazePose33 => &BLAZEPOSE_SKELETON,
            PoseLayout::Coco17 => &COCO_SKELETON,
        }
    }
}

/// 一个人的姿态关键点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseLandmarks {
    pub layout: PoseLayout,
    pub points: Vec<Landmark>,
}

impl PoseLandmarks {
    pub fn new(layout: PoseLayout, points: Vec<Landmark>) -> Self {
        Self { layout, points }
    }

    /// 按语义角色取关键点, 关键点缺失时返回 None
    pub fn get(&self, role: PoseRole) -> Option<&Landmark> {
        self.points.get(self.layout.index_of(role))
    }
}

/// 单帧检测结果
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectionRecord {
    #[serde(default)]
    pub faces: Vec<FaceBox>,
    #[serde(default)]
    pub hands: Vec<HandLandmarks>,
    #[serde(default)]
    pub pose: Option<PoseLandmarks>,
}

impl DetectionRecord {
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty() && self.hands.is_empty() && self.pose.is_none()
    }
}
