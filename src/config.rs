//! 运行配置 - 通过JSON文件调整参数
//!
//! 所有时间参数单位为毫秒; 文件缺字段时使用默认值

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// 情绪采样参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionConfig {
    pub interval_ms: u64,  // 同一槽位两次分类的最小间隔
    pub timeout_ms: u64,   // 单次分类超时
    pub workers: usize,    // 工作线程数
    pub queue_depth: usize, // 待处理队列容量
    pub face_margin: f32,  // 人脸裁剪外扩比例
}

impl Default for EmotionConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            timeout_ms: 3000,
            workers: 2,
            queue_depth: 4,
            face_margin: 0.15,
        }
    }
}

impl EmotionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// 语音播报参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    pub interval_ms: u64, // 相同文本重复播报间隔
    pub min_gap_ms: u64,  // 任意两次播报的最小间隔
    pub timeout_ms: u64,  // 单次合成+播放超时
    /// 合成命令模板, 支持 `{text}` / `{out}` 占位符; None 使用平台默认
    pub synth_command: Option<Vec<String>>,
    /// 播放命令模板, 支持 `{out}` 占位符; 空数组表示合成命令直接发声
    pub player_command: Option<Vec<String>>,
    /// 音频临时文件目录, None 使用用户缓存目录
    pub artifact_dir: Option<PathBuf>,
    pub keep_artifacts: bool,
    /// 退出时播报一次总结
    pub summary_on_exit: bool,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5000,
            min_gap_ms: 1500,
            timeout_ms: 10_000,
            synth_command: None,
            player_command: None,
            artifact_dir: None,
            keep_artifacts: false,
            summary_on_exit: true,
        }
    }
}

impl SpeechConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn min_gap(&self) -> Duration {
        Duration::from_millis(self.min_gap_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// 音频文件目录
    pub fn resolve_artifact_dir(&self) -> PathBuf {
        self.artifact_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("emogest")
        })
    }
}

/// 叠加层绘制参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub draw_text: bool,
    pub draw_face_boxes: bool,
    pub draw_landmarks: bool,
    pub font_path: Option<PathBuf>,
    pub font_size: f32,
    pub text_color: [u8; 3],
    pub stale_color: [u8; 3], // 情绪结果过期时的文字颜色
    pub box_color: [u8; 3],
    pub pose_color: [u8; 3],
    pub hand_color: [u8; 3],
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            draw_text: true,
            draw_face_boxes: true,
            draw_landmarks: true,
            font_path: None,
            font_size: 22.0,
            text_color: [0, 255, 0],
            stale_color: [255, 200, 0],
            box_color: [0, 160, 255],
            pose_color: [255, 64, 64],
            hand_color: [255, 255, 0],
        }
    }
}

/// 主循环参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub slow_frame_ms: u64,      // 超过该耗时的迭代记录警告
    pub shutdown_grace_ms: u64,  // 关闭时等待后台线程的时长
    pub max_frames: Option<u64>, // 处理帧数上限
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            slow_frame_ms: 200,
            shutdown_grace_ms: 2000,
            max_frames: None,
        }
    }
}

impl DriverConfig {
    pub fn slow_frame(&self) -> Duration {
        Duration::from_millis(self.slow_frame_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// 全部运行参数
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub emotion: EmotionConfig,
    pub speech: SpeechConfig,
    pub overlay: OverlayConfig,
    pub driver: DriverConfig,
}

impl AppConfig {
    /// 从JSON文件加载配置, 文件不存在时写出默认配置
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️ 配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在, 创建默认配置: {}", path.display());
                let config = Self::default();
                config.save(path);
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    error!("❌ 保存配置失败: {}", e);
                } else {
                    info!("💾 配置已保存到 {}", path.display());
                }
            }
            Err(e) => error!("❌ 序列化配置失败: {}", e),
        }
    }

    /// 打印当前配置
    pub fn log_summary(&self) {
        info!("🎛️ 当前配置:");
        info!(
            "  情绪采样: 间隔 {}ms, 超时 {}ms, {} 个线程, 队列 {}",
            self.emotion.interval_ms,
            self.emotion.timeout_ms,
            self.emotion.workers,
            self.emotion.queue_depth
        );
        info!(
            "  语音播报: {}, 重复间隔 {}ms, 最小间隔 {}ms, 超时 {}ms",
            if self.speech.enabled { "开启" } else { "关闭" },
            self.speech.interval_ms,
            self.speech.min_gap_ms,
            self.speech.timeout_ms
        );
        info!(
            "  主循环: 慢帧阈值 {}ms, 关闭宽限 {}ms",
            self.driver.slow_frame_ms, self.driver.shutdown_grace_ms
        );
    }
}
