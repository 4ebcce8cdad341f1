/// 渲染输出 (Renderer)
///
/// - OverlayRenderer:   在帧上绘制检测结果与反馈文字
/// - Presenter:         显示/保存带叠加层的帧
/// - ImageDirPresenter: 逐帧写出 PNG (离线模式)
pub mod overlay;

pub use overlay::OverlayRenderer;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::RgbImage;
use tracing::{debug, info};

/// 一帧输出
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub index: u64,
    pub image: RgbImage,
    /// 叠加层文字 (每人一行 + 手势行)
    pub lines: Vec<String>,
    pub announcement: String,
    pub fps: f64,
}

/// 帧输出目标
pub trait Presenter {
    fn present(&mut self, frame: &AnnotatedFrame) -> Result<()>;

    /// 用户是否请求退出 (按 q / Escape)
    fn quit_requested(&mut self) -> bool {
        false
    }
}

/// 把每帧写成 `frame_000000.png`
pub struct ImageDirPresenter {
    dir: PathBuf,
    written: u64,
}

impl ImageDirPresenter {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create output dir {}", dir.display()))?;
        info!("💾 输出目录: {}", dir.display());
        Ok(Self { dir, written: 0 })
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl Presenter for ImageDirPresenter {
    fn present(&mut self, frame: &AnnotatedFrame) -> Result<()> {
        let path = self.dir.join(format!("frame_{:06}.png", frame.index));
        frame
            .image
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        self.written += 1;
        debug!("写出 {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_dir_presenter_writes_png() {
        let dir = std::env::temp_dir().join(format!("emogest-present-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let mut presenter = ImageDirPresenter::new(&dir).unwrap();

        let frame = AnnotatedFrame {
            index: 3,
            image: RgbImage::new(8, 6),
            lines: vec![],
            announcement: String::new(),
            fps: 0.0,
        };
        presenter.present(&frame).unwrap();

        let written = image::open(dir.join("frame_000003.png")).unwrap();
        assert_eq!((written.width(), written.height()), (8, 6));
        assert_eq!(presenter.written(), 1);
        assert!(!presenter.quit_requested());
    }
}
