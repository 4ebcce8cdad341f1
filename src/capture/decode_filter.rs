/// FFmpeg解码过滤器模块
/// FFmpeg decode filter module
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Sender, TrySendError};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame};
use image::RgbImage;
use tracing::{debug, info, warn};

const AV_PIX_FMT_YUV420P: i32 = 0;
const AV_PIX_FMT_YUYV422: i32 = 1;
const AV_PIX_FMT_YUVJ420P: i32 = 12;

/// FFmpeg解码过滤器: 摄像头 → RGB帧
///
/// 主循环忙时直接丢帧 (try_send), 保证拿到的永远是最新画面
#[derive(Clone)]
pub struct DecodeFilter {
    tx: Sender<RgbImage>,
    stop: Arc<AtomicBool>,
    count: usize,
    dropped: usize,
    last: Instant,
}

impl DecodeFilter {
    pub fn new(tx: Sender<RgbImage>, stop: Arc<AtomicBool>) -> Self {
        Self {
            tx,
            stop,
            count: 0,
            dropped: 0,
            last: Instant::now(),
        }
    }
}

/// BT.601 YUV → RGB
#[inline]
fn yuv_to_rgb(y: f32, u: f32, v: f32) -> [u8; 3] {
    let u = u - 128.0;
    let v = v - 128.0;
    [
        (y + 1.402 * v).clamp(0.0, 255.0) as u8,
        (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8,
        (y + 1.772 * u).clamp(0.0, 255.0) as u8,
    ]
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        info!("✅ 摄像头解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        if self.stop.load(Ordering::Relaxed) {
            return Err("capture released".to_string());
        }

        let image = unsafe {
            let raw = frame.as_ptr();
            if raw.is_null() {
                return Ok(Some(frame));
            }

            let w = (*raw).width as u32;
            let h = (*raw).height as u32;
            let mut image = RgbImage::new(w, h);

            match (*raw).format {
                AV_PIX_FMT_YUV420P | AV_PIX_FMT_YUVJ420P => {
                    let data_y = (*raw).data[0];
                    let data_u = (*raw).data[1];
                    let data_v = (*raw).data[2];
                    let y_stride = (*raw).linesize[0] as usize;
                    let uv_stride = (*raw).linesize[1] as usize;
                    for (x, y, pixel) in image.enumerate_pixels_mut() {
                        let (x, y) = (x as usize, y as usize);
                        let luma = *data_y.add(y * y_stride + x) as f32;
                        let u = *data_u.add((y / 2) * uv_stride + x / 2) as f32;
                        let v = *data_v.add((y / 2) * uv_stride + x / 2) as f32;
                        pixel.0 = yuv_to_rgb(luma, u, v);
                    }
                }
                AV_PIX_FMT_YUYV422 => {
                    let data = (*raw).data[0];
                    let stride = (*raw).linesize[0] as usize;
                    for (x, y, pixel) in image.enumerate_pixels_mut() {
                        let (x, y) = (x as usize, y as usize);
                        // Y0 U Y1 V
                        let base = y * stride + (x / 2) * 4;
                        let luma = *data.add(base + (x % 2) * 2) as f32;
                        let u = *data.add(base + 1) as f32;
                        let v = *data.add(base + 3) as f32;
                        pixel.0 = yuv_to_rgb(luma, u, v);
                    }
                }
                other => {
                    warn!("⚠️ 不支持的像素格式: {}, 丢弃该帧", other);
                    return Ok(Some(frame));
                }
            }
            image
        };

        self.count += 1;
        match self.tx.try_send(image) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.dropped += 1,
            Err(TrySendError::Disconnected(_)) => return Err("capture released".to_string()),
        }

        if self.last.elapsed().as_secs_f64() >= 5.0 {
            let fps = self.count as f64 / self.last.elapsed().as_secs_f64();
            debug!("📺 解码统计: {:.1}fps, 丢帧 {}", fps, self.dropped);
            self.last = Instant::now();
            self.count = 0;
            self.dropped = 0;
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        info!("✅ 摄像头解码线程退出");
    }
}
