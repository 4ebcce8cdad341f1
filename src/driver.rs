//! 主循环 (Render/Loop Driver)
//!
//! 状态: Running → Stopping → Stopped
//!
//! 每次迭代: 取帧 → 感知 → 手势/姿态分类 → 情绪采样 → 组合文字 → 播报 → 绘制叠加层.
//! 情绪分类与语音合成都在后台线程进行, 主循环只读取它们最近发布的结果.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{info, warn};

use crate::capture::FrameSource;
use crate::config::AppConfig;
use crate::emotion::{face_region, EmotionClassifier, EmotionReading, EmotionSampler, EmotionStats};
use crate::feedback::{FrameFeedback, SessionSummary};
use crate::perception::{PerceptionAdapter, PerceptionStats};
use crate::renderer::{AnnotatedFrame, OverlayRenderer, Presenter};
use crate::speech::{Announcer, SpeechBackend, SpeechStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Running,
    Stopping,
    Stopped,
}

/// 关闭后的会话统计
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub frames: u64,
    pub slow_frames: u64,
    pub perception: PerceptionStats,
    pub emotion: EmotionStats,
    pub speech: Option<SpeechStats>,
    pub summary: String,
}

pub struct Driver {
    source: Box<dyn FrameSource>,
    perception: PerceptionAdapter,
    sampler: EmotionSampler,
    announcer: Option<Announcer>,
    overlay: OverlayRenderer,
    config: AppConfig,
    state: DriverState,
    summary: SessionSummary,
    report: Option<SessionReport>,

    frames: u64,
    slow_frames: u64,
    fps: f64,
    fps_count: u64,
    fps_last: Instant,
}

impl Driver {
    /// `speech` 为 None 或配置中关闭语音时不播报
    pub fn new(
        source: Box<dyn FrameSource>,
        perception: PerceptionAdapter,
        classifier: Arc<dyn EmotionClassifier>,
        speech: Option<Box<dyn SpeechBackend>>,
        overlay: OverlayRenderer,
        config: AppConfig,
    ) -> Self {
        let sampler = EmotionSampler::new(classifier, &config.emotion);
        let announcer = speech
            .filter(|_| config.speech.enabled)
            .map(|backend| Announcer::new(backend, &config.speech));
        if announcer.is_none() {
            info!("🔇 语音播报已关闭");
        }

        Self {
            source,
            perception,
            sampler,
            announcer,
            overlay,
            config,
            state: DriverState::Running,
            summary: SessionSummary::default(),
            report: None,
            frames: 0,
            slow_frames: 0,
            fps: 0.0,
            fps_count: 0,
            fps_last: Instant::now(),
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn perception_stats(&self) -> PerceptionStats {
        self.perception.stats()
    }

    pub fn emotion_stats(&self) -> EmotionStats {
        self.sampler.stats()
    }

    pub fn speech_stats(&self) -> Option<SpeechStats> {
        self.announcer.as_ref().map(Announcer::stats)
    }

    /// 退出键或外部请求
    pub fn request_stop(&mut self) {
        if self.state == DriverState::Running {
            info!("⏹️ 停止主循环");
            self.state = DriverState::Stopping;
        }
    }

    /// 执行一次迭代; 流结束、采集失败或已请求停止时返回 None
    pub fn step(&mut self) -> Option<AnnotatedFrame> {
        if self.state != DriverState::Running {
            return None;
        }
        if let Some(max) = self.config.driver.max_frames {
            if self.frames >= max {
                info!("🏁 已处理 {} 帧, 达到上限", self.frames);
                self.request_stop();
                return None;
            }
        }

        let started = Instant::now();
        let frame = match self.source.read() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("📭 帧源结束");
                self.request_stop();
                return None;
            }
            Err(e) => {
                warn!("⚠️ 读取帧失败, 结束主循环: {}", e);
                self.request_stop();
                return None;
            }
        };

        let record = self.perception.detect(&frame);

        let now = Instant::now();
        let margin = self.config.emotion.face_margin;
        for (slot, face) in record.faces.iter().enumerate() {
            self.sampler.maybe_sample(slot, frame.index, now, || {
                face_region(&frame.image, Some(face), margin)
            });
        }
        let readings: Vec<EmotionReading> = (0..record.faces.len())
            .map(|slot| self.sampler.reading(slot))
            .collect();

        let feedback = FrameFeedback::compose(&record, &readings);
        self.summary.observe(&feedback);
        let announcement = feedback.announcement();
        if let Some(announcer) = self.announcer.as_mut() {
            announcer.offer(&announcement, now);
        }

        let index = frame.index;
        let mut image = frame.image;
        self.overlay.draw(&mut image, &record, &feedback);

        self.frames += 1;
        self.update_fps();
        let elapsed = started.elapsed();
        if elapsed > self.config.driver.slow_frame() {
            self.slow_frames += 1;
            warn!(frame = index, "🐢 慢帧: {:?}", elapsed);
        }

        Some(AnnotatedFrame {
            index,
            image,
            lines: feedback.lines(),
            announcement,
            fps: self.fps,
        })
    }

    fn update_fps(&mut self) {
        self.fps_count += 1;
        let now = Instant::now();
        let elapsed = now.duration_since(self.fps_last);
        if elapsed >= Duration::from_secs(1) {
            self.fps = self.fps_count as f64 / elapsed.as_secs_f64();
            self.fps_count = 0;
            self.fps_last = now;
        }
    }

    /// 运行直到流结束或呈现端请求退出, 然后关闭
    pub fn run(&mut self, presenter: &mut dyn Presenter) -> Result<SessionReport> {
        info!("▶️ 主循环启动");
        while let Some(frame) = self.step() {
            if let Err(e) = presenter.present(&frame) {
                self.shutdown();
                return Err(e);
            }
            if presenter.quit_requested() {
                self.request_stop();
            }
        }
        Ok(self.shutdown())
    }

    /// 停止后台线程并释放帧源; 重复调用返回同一份统计
    pub fn shutdown(&mut self) -> SessionReport {
        if let Some(report) = &self.report {
            return report.clone();
        }
        self.request_stop();

        let grace = self.config.driver.shutdown_grace();
        let mut speech_grace = grace;
        if let Some(announcer) = self.announcer.as_ref() {
            if self.config.speech.summary_on_exit {
                announcer.submit(self.summary.text());
                speech_grace = grace.max(self.config.speech.timeout());
            }
        }

        self.sampler.shutdown(grace);
        if let Some(announcer) = self.announcer.as_mut() {
            announcer.shutdown(speech_grace);
        }
        self.source.release();
        self.state = DriverState::Stopped;

        let report = SessionReport {
            frames: self.frames,
            slow_frames: self.slow_frames,
            perception: self.perception.stats(),
            emotion: self.sampler.stats(),
            speech: self.speech_stats(),
            summary: self.summary.text(),
        };
        info!(
            "📊 共 {} 帧 (慢帧 {}), 情绪分类 {}/{}, 检测失败 人脸 {} 手 {} 姿态 {}",
            report.frames,
            report.slow_frames,
            report.emotion.completed,
            report.emotion.dispatched,
            report.perception.face_failures,
            report.perception.hand_failures,
            report.perception.pose_failures,
        );
        if let Some(speech) = report.speech {
            info!(
                "🔊 播报 {} 次, 替换 {}, 失败 {}, 超时 {}",
                speech.spoken, speech.superseded, speech.failed, speech.timed_out
            );
        }
        info!("👋 {}", report.summary);
        self.report = Some(report.clone());
        report
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if self.state != DriverState::Stopped {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{BlankSource, Frame};
    use crate::emotion::{Emotion, EmotionQuery};
    use crate::error::{CaptureError, EmotionError};

    struct Constant(Emotion);

    impl EmotionClassifier for Constant {
        fn classify(&self, _query: &EmotionQuery) -> Result<Emotion, EmotionError> {
            Ok(self.0)
        }
    }

    struct Broken;

    impl FrameSource for Broken {
        fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
            Err(CaptureError::Device("unplugged".into()))
        }
    }

    fn driver(source: Box<dyn FrameSource>, config: AppConfig) -> Driver {
        Driver::new(
            source,
            PerceptionAdapter::new(),
            Arc::new(Constant(Emotion::Neutral)),
            None,
            OverlayRenderer::without_text(config.overlay.clone()),
            config,
        )
    }

    #[test]
    fn test_end_of_stream_stops() {
        let mut driver = driver(Box::new(BlankSource::new(16, 16, 2)), AppConfig::default());
        assert!(driver.step().is_some());
        assert!(driver.step().is_some());
        assert!(driver.step().is_none());
        assert_eq!(driver.state(), DriverState::Stopping);

        let report = driver.shutdown();
        assert_eq!(driver.state(), DriverState::Stopped);
        assert_eq!(report.frames, 2);
        assert_eq!(report.summary, "You are Unknown with gesture: No gesture detected.");
    }

    #[test]
    fn test_capture_error_ends_loop() {
        let mut driver = driver(Box::new(Broken), AppConfig::default());
        assert!(driver.step().is_none());
        assert_eq!(driver.state(), DriverState::Stopping);
    }

    #[test]
    fn test_max_frames_and_request_stop() {
        let mut config = AppConfig::default();
        config.driver.max_frames = Some(1);
        let mut driver = driver(Box::new(BlankSource::new(16, 16, 10)), config);
        let frame = driver.step().unwrap();
        assert_eq!(
            frame.lines,
            vec![
                "Emotion: Unknown, Posture: No pose detected".to_string(),
                "Gesture: No gesture detected".to_string()
            ]
        );
        assert!(driver.step().is_none());

        let mut driver = self::driver(Box::new(BlankSource::new(16, 16, 10)), AppConfig::default());
        driver.request_stop();
        assert!(driver.step().is_none());
        assert_eq!(driver.shutdown().frames, 0);
    }
}
