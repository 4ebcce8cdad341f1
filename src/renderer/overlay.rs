//! 叠加层绘制: 人脸框、姿态骨架、手部骨架和反馈文字

use std::fs;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
    draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use tracing::{info, warn};

use crate::config::OverlayConfig;
use crate::feedback::FrameFeedback;
use crate::perception::{DetectionRecord, Landmark, HAND_CONNECTIONS};

/// 低于该可见度的关键点不绘制
const VISIBILITY_THRESHOLD: f32 = 0.3;

/// 未配置字体时依次尝试的系统字体
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

pub struct OverlayRenderer {
    config: OverlayConfig,
    font: Option<FontVec>,
}

impl OverlayRenderer {
    /// 加载字体; 显式配置的字体加载失败是错误, 系统字体找不到时只绘制图形
    pub fn new(config: OverlayConfig) -> Result<Self> {
        let font = if !config.draw_text {
            None
        } else if let Some(path) = config.font_path.as_ref() {
            Some(load_font(path)?)
        } else {
            let found = SYSTEM_FONTS
                .iter()
                .map(PathBuf::from)
                .find(|p| p.exists())
                .and_then(|p| load_font(&p).ok());
            if found.is_none() {
                warn!("⚠️ 未找到可用字体, 叠加层不绘制文字 (可在配置中设置 overlay.font_path)");
            }
            found
        };
        Ok(Self { config, font })
    }

    /// 不加载字体, 只绘制图形
    pub fn without_text(mut config: OverlayConfig) -> Self {
        config.draw_text = false;
        Self { config, font: None }
    }

    pub fn draws_text(&self) -> bool {
        self.font.is_some()
    }

    pub fn draw(&self, image: &mut RgbImage, record: &DetectionRecord, feedback: &FrameFeedback) {
        let (width, height) = image.dimensions();

        if self.config.draw_face_boxes {
            let color = Rgb(self.config.box_color);
            for face in &record.faces {
                if let Some((x, y, w, h)) = face.pixel_region(width, height, 0.0) {
                    let rect = Rect::at(x as i32, y as i32).of_size(w, h);
                    draw_hollow_rect_mut(image, rect, color);
                    if w > 2 && h > 2 {
                        let inner = Rect::at(x as i32 + 1, y as i32 + 1).of_size(w - 2, h - 2);
                        draw_hollow_rect_mut(image, inner, color);
                    }
                }
            }
        }

        if self.config.draw_landmarks {
            if let Some(pose) = &record.pose {
                draw_skeleton(
                    image,
                    &pose.points,
                    pose.layout.skeleton(),
                    Rgb(self.config.pose_color),
                );
            }
            for hand in &record.hands {
                draw_skeleton(
                    image,
                    &hand.points,
                    &HAND_CONNECTIONS,
                    Rgb(self.config.hand_color),
                );
            }
        }

        if let Some(font) = &self.font {
            self.draw_lines(image, font, feedback);
        }
    }

    fn draw_lines(&self, image: &mut RgbImage, font: &FontVec, feedback: &FrameFeedback) {
        let scale = PxScale::from(self.config.font_size);
        let line_height = (self.config.font_size * 1.3).ceil() as i32;
        let text_color = Rgb(self.config.text_color);
        let stale_color = Rgb(self.config.stale_color);

        let mut y = 10;
        for (i, line) in feedback.lines().iter().enumerate() {
            let stale = feedback
                .people
                .get(i)
                .map(|p| p.emotion.is_stale())
                .unwrap_or(false);
            let (w, h) = text_size(scale, font, line);
            draw_filled_rect_mut(
                image,
                Rect::at(6, y - 2).of_size(w + 8, h.max(1) + 6),
                Rgb([0, 0, 0]),
            );
            let color = if stale { stale_color } else { text_color };
            draw_text_mut(image, color, 10, y, scale, font, line);
            y += line_height;
        }
    }
}

fn load_font(path: &Path) -> Result<FontVec> {
    let bytes = fs::read(path).with_context(|| format!("failed to read font {}", path.display()))?;
    let font = FontVec::try_from_vec(bytes)
        .with_context(|| format!("invalid font file {}", path.display()))?;
    info!("🔤 字体: {}", path.display());
    Ok(font)
}

/// 关键点与连线
fn draw_skeleton(
    image: &mut RgbImage,
    points: &[Landmark],
    connections: &[(usize, usize)],
    color: Rgb<u8>,
) {
    let (width, height) = image.dimensions();
    let visible = |p: &Landmark| p.visibility > VISIBILITY_THRESHOLD;

    for (a, b) in connections {
        let (Some(pa), Some(pb)) = (points.get(*a), points.get(*b)) else {
            continue;
        };
        if visible(pa) && visible(pb) {
            draw_line_segment_mut(
                image,
                pa.to_pixel(width, height),
                pb.to_pixel(width, height),
                color,
            );
        }
    }

    for p in points.iter().filter(|p| visible(*p)) {
        let (x, y) = p.to_pixel(width, height);
        draw_filled_circle_mut(image, (x as i32, y as i32), 3, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::{FaceBox, Landmark, PoseLandmarks, PoseLayout};

    fn record() -> DetectionRecord {
        DetectionRecord {
            faces: vec![FaceBox::new(0.25, 0.25, 0.5, 0.5)],
            hands: vec![],
            pose: None,
        }
    }

    #[test]
    fn test_face_box_outline() {
        let config = OverlayConfig::default();
        let renderer = OverlayRenderer::without_text(config.clone());
        let mut image = RgbImage::new(100, 100);
        let record = record();
        let feedback = FrameFeedback::compose(&record, &[]);

        renderer.draw(&mut image, &record, &feedback);
        assert_eq!(image.get_pixel(25, 25), &Rgb(config.box_color));
        assert_eq!(image.get_pixel(50, 50), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_hidden_keypoints_not_drawn() {
        let config = OverlayConfig::default();
        let renderer = OverlayRenderer::without_text(config.clone());
        let mut points = vec![Landmark::with_visibility(0.5, 0.5, 0.0); 17];
        points[0] = Landmark::new(0.2, 0.2);
        let record = DetectionRecord {
            faces: vec![],
            hands: vec![],
            pose: Some(PoseLandmarks::new(PoseLayout::Coco17, points)),
        };
        let mut image = RgbImage::new(100, 100);
        renderer.draw(&mut image, &record, &FrameFeedback::compose(&record, &[]));

        assert_eq!(image.get_pixel(20, 20), &Rgb(config.pose_color));
        assert_eq!(image.get_pixel(50, 50), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_missing_font_path_is_error() {
        let config = OverlayConfig {
            font_path: Some(PathBuf::from("/nonexistent/emogest.ttf")),
            ..OverlayConfig::default()
        };
        assert!(OverlayRenderer::new(config).is_err());
    }
}
