/// 表情/手势/姿态实时反馈 (摄像头 + ONNX + 窗口)
///
/// 主线程: macroquad 事件循环, 每帧驱动一次主循环迭代
/// 后台:   摄像头解码线程, 情绪分类工作线程, 语音线程
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use emogest_rs::capture::{get_camera_devices, CameraSource};
use emogest_rs::emotion::{Emotion, EmotionClassifier, EmotionQuery};
use emogest_rs::error::EmotionError;
use emogest_rs::models::{
    FerPlus, HandLandmarkModel, OnnxHandTracker, OrtEP, SharedPose, YoloPose,
};
use emogest_rs::perception::PerceptionAdapter;
use emogest_rs::renderer::{AnnotatedFrame, OverlayRenderer, Presenter};
use emogest_rs::speech::{CommandSpeech, LogSpeech, SpeechBackend};
use emogest_rs::{logging, AppConfig, Driver};
use macroquad::prelude::*;
use tracing::{error, info, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "表情/手势/姿态实时反馈", long_about = None)]
struct Args {
    /// 摄像头序号
    #[arg(long, default_value_t = 0)]
    camera: usize,

    /// 列出摄像头后退出
    #[arg(long)]
    list_cameras: bool,

    /// 姿态模型 (人脸框由头部关键点推出)
    #[arg(long, default_value = "models/yolov8n-pose.onnx")]
    pose_model: PathBuf,

    /// 手部关键点模型
    #[arg(long, default_value = "models/hand_landmark.onnx")]
    hand_model: PathBuf,

    /// 表情分类模型
    #[arg(long, default_value = "models/emotion-ferplus-8.onnx")]
    emotion_model: PathBuf,

    /// 使用 CUDA 推理
    #[arg(long)]
    cuda: bool,

    /// 配置文件
    #[arg(short, long, default_value = "emogest_config.json")]
    config: PathBuf,

    /// 关闭语音播报
    #[arg(long)]
    mute: bool,

    /// 日志级别 (RUST_LOG 优先)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// 模型缺失时的情绪分类器
struct Unavailable;

impl EmotionClassifier for Unavailable {
    fn classify(&self, _query: &EmotionQuery) -> Result<Emotion, EmotionError> {
        Err(EmotionError::Backend("emotion model not loaded".into()))
    }
}

/// 窗口输出: 画面 + 左下角 FPS
struct Window {
    texture: Option<Texture2D>,
}

impl Presenter for Window {
    fn present(&mut self, frame: &AnnotatedFrame) -> anyhow::Result<()> {
        let (w, h) = frame.image.dimensions();
        let rgba = ::image::DynamicImage::ImageRgb8(frame.image.clone()).to_rgba8();

        let needs_rebuild = self
            .texture
            .as_ref()
            .map_or(true, |t| t.width() != w as f32 || t.height() != h as f32);
        if needs_rebuild {
            let texture = Texture2D::from_rgba8(w as u16, h as u16, rgba.as_raw());
            texture.set_filter(FilterMode::Linear);
            self.texture = Some(texture);
        } else if let Some(texture) = &self.texture {
            texture.update(&Image {
                bytes: rgba.into_raw(),
                width: w as u16,
                height: h as u16,
            });
        }

        clear_background(BLACK);
        if let Some(texture) = &self.texture {
            draw_texture_ex(
                texture,
                0.0,
                0.0,
                WHITE,
                DrawTextureParams {
                    dest_size: Some(vec2(screen_width(), screen_height())),
                    ..Default::default()
                },
            );
        }
        draw_text(
            &format!("FPS: {:.1}", frame.fps),
            10.0,
            screen_height() - 10.0,
            20.0,
            GREEN,
        );
        Ok(())
    }

    fn quit_requested(&mut self) -> bool {
        is_key_pressed(KeyCode::Q) || is_key_pressed(KeyCode::Escape)
    }
}

fn window_conf() -> Conf {
    Conf {
        window_title: "emogest".to_owned(),
        window_width: 1280,
        window_height: 720,
        window_resizable: true,
        ..Default::default()
    }
}

fn build_perception(args: &Args, ep: OrtEP) -> PerceptionAdapter {
    let mut perception = PerceptionAdapter::new();
    match YoloPose::new(&args.pose_model, ep) {
        Ok(model) => {
            let pose = SharedPose::new(model);
            perception = perception
                .with_faces(pose.face_detector())
                .with_pose(pose.pose_tracker());
            match HandLandmarkModel::new(&args.hand_model, ep) {
                Ok(hands) => perception = perception.with_hands(OnnxHandTracker::new(pose, hands)),
                Err(e) => warn!("⚠️ 手部模型不可用, 不识别手势: {:#}", e),
            }
        }
        Err(e) => warn!("⚠️ 姿态模型不可用, 不检测人脸/姿态/手部: {:#}", e),
    }
    perception
}

fn build_classifier(args: &Args, ep: OrtEP) -> Arc<dyn EmotionClassifier> {
    match FerPlus::new(&args.emotion_model, ep) {
        Ok(model) => Arc::new(model),
        Err(e) => {
            warn!("⚠️ 表情模型不可用, 情绪显示为 Unknown: {:#}", e);
            Arc::new(Unavailable)
        }
    }
}

fn build_speech(args: &Args, config: &AppConfig) -> Option<Box<dyn SpeechBackend>> {
    if args.mute {
        return None;
    }
    match CommandSpeech::from_config(&config.speech) {
        Ok(backend) => Some(Box::new(backend)),
        Err(e) => {
            warn!("⚠️ 语音命令不可用, 改为日志输出: {}", e);
            Some(Box::new(LogSpeech))
        }
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    let args = Args::parse();
    if let Err(e) = logging::init(&args.log_level) {
        eprintln!("日志初始化失败: {}", e);
    }

    let devices = get_camera_devices();
    if args.list_cameras {
        for (index, name) in &devices {
            println!("[{}] {}", index, name);
        }
        return;
    }

    let config = AppConfig::load(&args.config);
    config.log_summary();

    let device_name = devices
        .iter()
        .find(|(index, _)| *index == args.camera)
        .map(|(_, name)| name.clone())
        .unwrap_or_default();
    let source = CameraSource::open(args.camera, &device_name, Duration::from_secs(5));

    let ep = if args.cuda { OrtEP::CUDA(0) } else { OrtEP::CPU };
    let perception = build_perception(&args, ep);
    let classifier = build_classifier(&args, ep);
    let speech = build_speech(&args, &config);
    let overlay = match OverlayRenderer::new(config.overlay.clone()) {
        Ok(overlay) => overlay,
        Err(e) => {
            error!("❌ 叠加层初始化失败: {:#}", e);
            return;
        }
    };

    let mut driver = Driver::new(Box::new(source), perception, classifier, speech, overlay, config);
    let mut window = Window { texture: None };
    info!("🚀 启动, 按 q 或 Esc 退出");

    loop {
        if window.quit_requested() {
            driver.request_stop();
        }
        let Some(frame) = driver.step() else {
            break;
        };
        if let Err(e) = window.present(&frame) {
            error!("❌ 显示失败: {:#}", e);
            break;
        }
        next_frame().await;
    }

    let report = driver.shutdown();
    println!("{}", report.summary);
}
