// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// ONNX Runtime 模型后端 (`onnx` feature)
///
/// ## 模型
/// - **YOLOv8-pose**: 人体姿态 (COCO 17 点), 人脸框由头部关键点推出
///   - 文件: `yolov8_pose.rs`
/// - **Hand Landmark**: 21 点手部关键点, 在手腕附近的裁剪区域上运行
///   - 文件: `hand_landmark.rs`
/// - **FER+**: 8 类表情分类, 64x64 灰度输入
///   - 文件: `ferplus.rs`
///
/// ## 核心流程
/// ```text
/// 原始图片 → preprocess → ndarray张量 → OrtSession::run → postprocess → 检测结果
/// ```
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::{Array, IxDyn};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, TensorRTExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use tracing::info;

pub mod ferplus; // FER+ 表情分类
pub mod hand_landmark; // 手部关键点
pub mod yolov8_pose; // YOLOv8 姿态估计

pub use ferplus::FerPlus;
pub use hand_landmark::{HandCrop, HandLandmarkModel, OnnxHandTracker};
pub use yolov8_pose::{OnnxFaceDetector, OnnxPoseTracker, PosePerson, SharedPose, YoloPose};

/// 执行设备
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrtEP {
    CPU,
    CUDA(i32),
    Trt(i32),
}

/// 单输入 ONNX 会话
pub struct OrtSession {
    session: Session,
    name: String,
}

impl OrtSession {
    pub fn build(path: impl AsRef<Path>, ep: OrtEP) -> Result<Self> {
        let path = path.as_ref();
        let provider = match ep {
            OrtEP::CPU => CPUExecutionProvider::default().build(),
            OrtEP::CUDA(device_id) => CUDAExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
            OrtEP::Trt(device_id) => TensorRTExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
        };
        let session = Session::builder()?
            .with_execution_providers([provider])?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(path)
            .with_context(|| format!("failed to load model {}", path.display()))?;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!("✅ 模型已加载: {} ({:?})", path.display(), ep);
        Ok(Self { session, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 前向推理, 返回全部输出
    pub fn run(&self, x: Array<f32, IxDyn>) -> Result<Vec<Array<f32, IxDyn>>> {
        let outputs = self.session.run(ort::inputs![x.view()]?)?;
        let mut ys = Vec::with_capacity(outputs.len());
        for i in 0..outputs.len() {
            ys.push(outputs[i].try_extract_tensor::<f32>()?.into_owned());
        }
        Ok(ys)
    }
}

/// 按长边等比缩放到 `size`, 左上对齐, 其余填充灰色 (NCHW, 0..1)
///
/// 返回张量与缩放比例
pub fn letterbox(image: &image::RgbImage, size: u32) -> (Array<f32, IxDyn>, f32) {
    let (w0, h0) = image.dimensions();
    let ratio = (size as f32 / w0 as f32).min(size as f32 / h0 as f32);
    let w1 = ((w0 as f32 * ratio).round() as u32).clamp(1, size);
    let h1 = ((h0 as f32 * ratio).round() as u32).clamp(1, size);
    let resized = image::imageops::resize(image, w1, h1, image::imageops::FilterType::Triangle);

    let mut ys = Array::ones((1, 3, size as usize, size as usize)).into_dyn();
    ys.fill(144.0 / 255.0);
    for (x, y, rgb) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b] = rgb.0;
        ys[[0, 0, y, x]] = r as f32 / 255.0;
        ys[[0, 1, y, x]] = g as f32 / 255.0;
        ys[[0, 2, y, x]] = b as f32 / 255.0;
    }
    (ys, ratio)
}

/// 按 IoU 去重, 置信度高者优先
pub fn non_max_suppression<T>(xs: &mut Vec<T>, iou_threshold: f32, rect: impl Fn(&T) -> [f32; 5]) {
    xs.sort_by(|a, b| rect(b)[4].total_cmp(&rect(a)[4]));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if iou(rect(&xs[prev_index]), rect(&xs[index])) > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

/// `[x, y, w, h, conf]`
fn iou(a: [f32; 5], b: [f32; 5]) -> f32 {
    let l = a[0].max(b[0]);
    let r = (a[0] + a[2]).min(b[0] + b[2]);
    let t = a[1].max(b[1]);
    let btm = (a[1] + a[3]).min(b[1] + b[3]);
    let inter = (r - l).max(0.0) * (btm - t).max(0.0);
    let union = a[2] * a[3] + b[2] * b[3] - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}
