//! 摄像头输入模块
//!
//! 处理本地摄像头输入,支持 DirectShow(Windows) / AVFoundation(macOS) / V4L2(Linux)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use image::RgbImage;
use tracing::{error, info, warn};

use super::decode_filter::DecodeFilter;
use super::{Frame, FrameSource};
use crate::error::CaptureError;
use crate::ExitSignal;

/// 释放时等待解码线程退出的最长时间
const RELEASE_GRACE: Duration = Duration::from_secs(2);

/// 摄像头帧源
///
/// FFmpeg 在独立线程中解码, 主循环通过 `read` 拉取最新帧
pub struct CameraSource {
    rx: Option<Receiver<RgbImage>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    exited: Receiver<()>,
    read_timeout: Duration,
    next_index: u64,
}

impl CameraSource {
    /// 打开摄像头
    pub fn open(device_index: usize, device_name: &str, read_timeout: Duration) -> Self {
        let url = format_camera_url(device_index, device_name);
        info!("🎥 摄像头: [{}] {} ({})", device_index, device_name, url);

        let (tx, rx) = crossbeam_channel::bounded(2);
        let stop = Arc::new(AtomicBool::new(false));
        let filter = DecodeFilter::new(tx, stop.clone());
        let (exit_tx, exit_rx) = crossbeam_channel::bounded(1);
        let worker = std::thread::Builder::new()
            .name("camera-decode".into())
            .spawn(move || {
                let _signal = ExitSignal(exit_tx);
                decode_camera(&url, filter)
            })
            .map_err(|e| error!("❌ 摄像头线程启动失败: {}", e))
            .ok();

        Self {
            rx: Some(rx),
            stop,
            worker,
            exited: exit_rx,
            read_timeout,
            next_index: 0,
        }
    }
}

impl FrameSource for CameraSource {
    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
        let Some(rx) = self.rx.as_ref() else {
            return Ok(None);
        };
        match rx.recv_timeout(self.read_timeout) {
            Ok(image) => {
                let frame = Frame::new(self.next_index, image);
                self.next_index += 1;
                Ok(Some(frame))
            }
            Err(RecvTimeoutError::Disconnected) => Ok(None),
            Err(RecvTimeoutError::Timeout) => Err(CaptureError::Device(format!(
                "no frame within {:?}",
                self.read_timeout
            ))),
        }
    }

    fn release(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.rx = None;
        if let Some(worker) = self.worker.take() {
            // 停止标志只在新帧到达时检查, 设备停滞时解码线程不会自行结束
            join_within(worker, &self.exited, RELEASE_GRACE);
        }
        info!("📷 摄像头已释放");
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.release();
        }
    }
}

/// 最多等待 `grace` 让解码线程退出, 超时则分离线程
fn join_within(worker: JoinHandle<()>, exited: &Receiver<()>, grace: Duration) -> bool {
    match exited.recv_timeout(grace) {
        Ok(()) => {
            if worker.join().is_err() {
                warn!("⚠️ 摄像头解码线程异常退出");
            }
            true
        }
        Err(_) => {
            warn!("⚠️ 摄像头解码线程未在 {:?} 内结束, 已分离", grace);
            false
        }
    }
}

/// 格式化摄像头URL - 根据平台选择
fn format_camera_url(index: usize, name: &str) -> String {
    #[cfg(target_os = "windows")]
    {
        let _ = index;
        format!("video={}", name)
    }
    #[cfg(not(target_os = "windows"))]
    {
        let _ = name;
        #[cfg(target_os = "linux")]
        {
            format!("/dev/video{}", index)
        }
        #[cfg(not(target_os = "linux"))]
        {
            format!("{}", index)
        }
    }
}

fn input_format() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        "dshow"
    }
    #[cfg(target_os = "macos")]
    {
        "avfoundation"
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        "v4l2"
    }
}

/// 摄像头解码实现 (阻塞直到流结束或帧源被释放)
fn decode_camera(camera_input: &str, filter: DecodeFilter) {
    let max_retries = 3;
    let mut retry_count = 0;

    loop {
        let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
        let pipe = pipe.filter("decode", Box::new(filter.clone()));
        let out = create_null_output().add_frame_pipeline(pipe);
        let input = Input::new(camera_input).set_format(input_format());

        let ctx = match FfmpegContext::builder().input(input).output(out).build() {
            Ok(c) => c,
            Err(e) => {
                retry_count += 1;
                if retry_count >= max_retries {
                    error!("❌ 摄像头构建失败 (重试{}次): {}", max_retries, e);
                    return;
                }
                warn!(
                    "⚠️ 摄像头忙或无法打开, 1秒后重试... ({}/{})",
                    retry_count, max_retries
                );
                std::thread::sleep(Duration::from_secs(1));
                continue;
            }
        };

        let sch = match ctx.start() {
            Ok(s) => s,
            Err(e) => {
                error!("❌ 摄像头启动失败: {}", e);
                return;
            }
        };
        info!("✅ 摄像头连接成功,开始解码");
        let _ = sch.wait();
        info!("📹 摄像头解码循环结束");
        return;
    }
}

/// 获取可用的摄像头设备列表
pub fn get_camera_devices() -> Vec<(usize, String)> {
    match ez_ffmpeg::device::get_input_video_devices() {
        Ok(devices) => devices.into_iter().enumerate().collect(),
        Err(e) => {
            warn!("⚠️ 获取摄像头列表失败: {}", e);
            vec![]
        }
    }
}
