//! 离线帧源: 图片目录 / 合成空白帧

use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use tracing::info;

use super::{Frame, FrameSource};
use crate::error::CaptureError;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// 图片目录帧源, 按文件名排序依次读取
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    cursor: usize,
}

impl ImageSequence {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(CaptureError::Device(format!(
                "no images found in {}",
                dir.display()
            )));
        }
        info!("📂 图片序列: {} 帧 ({})", paths.len(), dir.display());

        Ok(Self { paths, cursor: 0 })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequence {
    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
        let Some(path) = self.paths.get(self.cursor) else {
            return Ok(None);
        };
        let image = image::open(path)?.to_rgb8();
        let frame = Frame::new(self.cursor as u64, image);
        self.cursor += 1;
        Ok(Some(frame))
    }
}

/// 合成空白帧源
pub struct BlankSource {
    width: u32,
    height: u32,
    remaining: u64,
    next_index: u64,
}

impl BlankSource {
    pub fn new(width: u32, height: u32, count: u64) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            remaining: count,
            next_index: 0,
        }
    }
}

impl FrameSource for BlankSource {
    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let image = RgbImage::from_pixel(self.width, self.height, Rgb([32, 32, 32]));
        let frame = Frame::new(self.next_index, image);
        self.next_index += 1;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_source_counts_down() {
        let mut source = BlankSource::new(16, 8, 2);
        let a = source.read().unwrap().unwrap();
        let b = source.read().unwrap().unwrap();
        assert_eq!((a.index, b.index), (0, 1));
        assert_eq!((a.width(), a.height()), (16, 8));
        assert!(source.read().unwrap().is_none());
    }

    #[test]
    fn test_image_sequence_sorted() {
        let dir = std::env::temp_dir().join(format!("emogest-seq-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        RgbImage::new(4, 4).save(dir.join("b.png")).unwrap();
        RgbImage::new(2, 2).save(dir.join("a.png")).unwrap();
        fs::write(dir.join("notes.txt"), "skip me").unwrap();

        let mut seq = ImageSequence::open(&dir).unwrap();
        assert_eq!(seq.len(), 2);
        let first = seq.read().unwrap().unwrap();
        assert_eq!(first.width(), 2);
        let second = seq.read().unwrap().unwrap();
        assert_eq!((second.index, second.width()), (1, 4));
        assert!(seq.read().unwrap().is_none());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_image_sequence_empty_dir() {
        let dir = std::env::temp_dir().join(format!("emogest-empty-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        assert!(ImageSequence::open(&dir).is_err());
        fs::remove_dir_all(&dir).ok();
    }
}
