//! 语音后端
//!
//! - CommandSpeech: 系统合成命令写出临时音频文件, 再由播放命令播放
//! - LogSpeech:     只记录日志 (无音频环境/测试)

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::SpeechConfig;
use crate::error::SpeechError;

/// 语音合成后端, 只在语音工作线程中调用 (不要求可重入)
pub trait SpeechBackend: Send {
    /// 合成并播放, 超过 `timeout` 视为失败
    fn speak(&mut self, text: &str, timeout: Duration) -> Result<(), SpeechError>;
}

/// 只记录日志的后端
#[derive(Debug, Default)]
pub struct LogSpeech;

impl SpeechBackend for LogSpeech {
    fn speak(&mut self, text: &str, _timeout: Duration) -> Result<(), SpeechError> {
        info!("🔊 {}", text);
        Ok(())
    }
}

/// 子进程轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// 外部命令后端
///
/// 合成模板支持 `{text}` 与 `{out}` 占位符, 播放模板支持 `{out}`;
/// 播放模板为空时认为合成命令直接发声
#[derive(Debug, Clone)]
pub struct CommandSpeech {
    synth: Vec<String>,
    player: Vec<String>,
    artifact_dir: PathBuf,
    keep_artifacts: bool,
}

static ARTIFACT_SEQ: AtomicU64 = AtomicU64::new(0);

impl CommandSpeech {
    pub fn new(
        synth: Vec<String>,
        player: Vec<String>,
        artifact_dir: impl Into<PathBuf>,
        keep_artifacts: bool,
    ) -> Result<Self, SpeechError> {
        if synth.is_empty() {
            return Err(SpeechError::EmptyCommand);
        }
        Ok(Self {
            synth,
            player,
            artifact_dir: artifact_dir.into(),
            keep_artifacts,
        })
    }

    /// 按配置构建, 未配置的命令使用平台默认
    pub fn from_config(config: &SpeechConfig) -> Result<Self, SpeechError> {
        let synth = config
            .synth_command
            .clone()
            .unwrap_or_else(default_synth_command);
        let player = config
            .player_command
            .clone()
            .unwrap_or_else(default_player_command);
        Self::new(
            synth,
            player,
            config.resolve_artifact_dir(),
            config.keep_artifacts,
        )
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    fn next_artifact(&self) -> PathBuf {
        let seq = ARTIFACT_SEQ.fetch_add(1, Ordering::Relaxed);
        self.artifact_dir.join(format!(
            "speech_{}_{}.wav",
            crate::gen_time_string("-"),
            seq
        ))
    }
}

impl SpeechBackend for CommandSpeech {
    fn speak(&mut self, text: &str, timeout: Duration) -> Result<(), SpeechError> {
        let deadline = Instant::now() + timeout;
        fs::create_dir_all(&self.artifact_dir)?;
        let artifact = self.next_artifact();
        let out = artifact.to_string_lossy().into_owned();
        let text = escape_text(text);

        let result = fill(&self.synth, &text, &out)
            .and_then(|argv| run_until(&argv, deadline, timeout))
            .and_then(|()| {
                if self.player.is_empty() {
                    return Ok(());
                }
                fill(&self.player, &text, &out).and_then(|argv| run_until(&argv, deadline, timeout))
            });

        if !self.keep_artifacts && artifact.exists() {
            if let Err(e) = fs::remove_file(&artifact) {
                warn!("⚠️ 删除音频文件失败 {}: {}", artifact.display(), e);
            }
        }
        result
    }
}

/// 替换模板占位符
fn fill(template: &[String], text: &str, out: &str) -> Result<Vec<String>, SpeechError> {
    if template.is_empty() {
        return Err(SpeechError::EmptyCommand);
    }
    Ok(template
        .iter()
        .map(|arg| arg.replace("{out}", out).replace("{text}", text))
        .collect())
}

/// 运行子进程直到退出或超过截止时间 (超时则杀掉)
fn run_until(argv: &[String], deadline: Instant, timeout: Duration) -> Result<(), SpeechError> {
    let (program, args) = argv.split_first().ok_or(SpeechError::EmptyCommand)?;
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| SpeechError::Spawn {
            program: program.clone(),
            source,
        })?;

    loop {
        match child.try_wait() {
            Ok(Some(status)) if status.success() => {
                debug!("{} 完成", program);
                return Ok(());
            }
            Ok(Some(status)) => {
                return Err(SpeechError::Failed {
                    program: program.clone(),
                    status: status.to_string(),
                })
            }
            Ok(None) => {}
            Err(e) => {
                let _ = child.kill();
                return Err(SpeechError::Spawn {
                    program: program.clone(),
                    source: e,
                });
            }
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SpeechError::Timeout(timeout));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(target_os = "windows")]
fn escape_text(text: &str) -> String {
    // 默认模板把文本放在 PowerShell 单引号字符串中
    text.replace('\'', "''")
}

#[cfg(not(target_os = "windows"))]
fn escape_text(text: &str) -> String {
    text.to_string()
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// 平台默认合成命令
pub fn default_synth_command() -> Vec<String> {
    #[cfg(target_os = "windows")]
    {
        strings(&[
            "powershell",
            "-NoProfile",
            "-Command",
            "Add-Type -AssemblyName System.Speech; \
             $s = New-Object System.Speech.Synthesis.SpeechSynthesizer; \
             $s.SetOutputToWaveFile('{out}'); $s.Speak('{text}'); $s.Dispose()",
        ])
    }
    #[cfg(target_os = "macos")]
    {
        strings(&["say", "-o", "{out}", "--data-format=LEI16@22050", "{text}"])
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        strings(&["espeak-ng", "-w", "{out}", "{text}"])
    }
}

/// 平台默认播放命令
pub fn default_player_command() -> Vec<String> {
    #[cfg(target_os = "windows")]
    {
        strings(&[
            "powershell",
            "-NoProfile",
            "-Command",
            "(New-Object Media.SoundPlayer '{out}').PlaySync()",
        ])
    }
    #[cfg(target_os = "macos")]
    {
        strings(&["afplay", "{out}"])
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        strings(&["aplay", "-q", "{out}"])
    }
}
