/// 视频输入系统 (Video Input System)
///
/// - Frame:         单帧图像 + 帧序号
/// - FrameSource:   帧源接口, 返回 None 表示流结束
/// - ImageSequence: 图片目录按文件名顺序回放
/// - BlankSource:   合成空白帧 (无图片时配合检测回放)
/// - CameraSource:  本地摄像头 (FFmpeg, `camera` feature)
pub mod sequence;

#[cfg(feature = "camera")]
pub mod camera;
#[cfg(feature = "camera")]
pub mod decode_filter;

pub use sequence::{BlankSource, ImageSequence};

#[cfg(feature = "camera")]
pub use camera::{get_camera_devices, CameraSource};

use std::time::Instant;

use image::RgbImage;

use crate::error::CaptureError;

/// 采集到的一帧, 只在当前循环迭代内有效
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub image: RgbImage,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self {
            index,
            image,
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// 帧源
pub trait FrameSource {
    /// 读取下一帧; `Ok(None)` 表示流结束
    fn read(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// 释放采集设备
    fn release(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
        (**self).read()
    }

    fn release(&mut self) {
        (**self).release()
    }
}
