/// 离线回放 (Replay)
///
/// 从 JSON 脚本读取逐帧检测结果与情绪标签, 走完整主循环,
/// 叠加层逐帧写成 PNG. 不需要摄像头和模型.
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use emogest_rs::capture::{BlankSource, FrameSource, ImageSequence};
use emogest_rs::perception::{PerceptionAdapter, ReplayPerception, ReplayScript};
use emogest_rs::renderer::{ImageDirPresenter, OverlayRenderer};
use emogest_rs::speech::{CommandSpeech, LogSpeech, SpeechBackend};
use emogest_rs::{logging, AppConfig, Driver};
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SpeechMode {
    /// 只写日志
    Log,
    /// 调用系统合成/播放命令
    Command,
    /// 关闭播报
    Off,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "表情/手势/姿态反馈 - 离线回放", long_about = None)]
struct Args {
    /// 检测回放脚本 (JSON)
    #[arg(short, long)]
    script: PathBuf,

    /// 图片目录 (按文件名排序); 不指定时按脚本尺寸合成空白帧
    #[arg(short, long)]
    images: Option<PathBuf>,

    /// 叠加层输出目录
    #[arg(short, long, default_value = "replay_out")]
    out: PathBuf,

    /// 配置文件
    #[arg(short, long, default_value = "emogest_config.json")]
    config: PathBuf,

    /// 播报方式
    #[arg(long, value_enum, default_value_t = SpeechMode::Log)]
    speech: SpeechMode,

    /// 最多处理的帧数
    #[arg(long)]
    max_frames: Option<u64>,

    /// 日志级别 (RUST_LOG 优先)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn speech_backend(mode: SpeechMode, config: &AppConfig) -> Option<Box<dyn SpeechBackend>> {
    match mode {
        SpeechMode::Off => None,
        SpeechMode::Log => Some(Box::new(LogSpeech)),
        SpeechMode::Command => match CommandSpeech::from_config(&config.speech) {
            Ok(backend) => Some(Box::new(backend)),
            Err(e) => {
                warn!("⚠️ 语音命令不可用, 改为日志输出: {}", e);
                Some(Box::new(LogSpeech))
            }
        },
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level)?;

    let mut config = AppConfig::load(&args.config);
    if args.max_frames.is_some() {
        config.driver.max_frames = args.max_frames;
    }
    config.log_summary();

    let script = ReplayScript::load(&args.script)?;
    info!(
        "📜 回放脚本: {} ({} 帧, {}x{})",
        args.script.display(),
        script.frames.len(),
        script.width,
        script.height
    );

    let source: Box<dyn FrameSource> = match &args.images {
        Some(dir) => Box::new(ImageSequence::open(dir)?),
        None => Box::new(BlankSource::new(
            script.width,
            script.height,
            script.frames.len() as u64,
        )),
    };

    let replay = ReplayPerception::new(script);
    let perception = PerceptionAdapter::new()
        .with_faces(replay.clone())
        .with_hands(replay.clone())
        .with_pose(replay.clone());
    let overlay = OverlayRenderer::new(config.overlay.clone())?;
    let speech = speech_backend(args.speech, &config);

    let mut presenter = ImageDirPresenter::new(&args.out)?;
    let mut driver = Driver::new(source, perception, Arc::new(replay), speech, overlay, config);
    let report = driver.run(&mut presenter)?;

    info!(
        "✅ 回放完成: {} 帧写入 {}",
        presenter.written(),
        args.out.display()
    );
    println!("{}", report.summary);
    Ok(())
}
