/// 语音播报 (Speech Announcer)
///
/// - SpeechCursor: 去重/节流 (文本变化 或 超过重复间隔, 且满足最小间隔)
/// - Announcer:    单个后台语音线程, 一个在途 + 一个待播, 新文本替换待播文本
pub mod backend;

pub use backend::{CommandSpeech, LogSpeech, SpeechBackend};

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::SpeechConfig;
use crate::error::SpeechError;
use crate::ExitSignal;

/// 最近一次播报的文本和时刻, 由主循环独占
#[derive(Debug, Clone)]
pub struct SpeechCursor {
    interval: Duration,
    min_gap: Duration,
    last_text: Option<String>,
    last_at: Option<Instant>,
}

impl SpeechCursor {
    pub fn new(interval: Duration, min_gap: Duration) -> Self {
        Self {
            interval,
            min_gap,
            last_text: None,
            last_at: None,
        }
    }

    /// 是否允许播报 (不修改状态)
    pub fn should_admit(&self, text: &str, now: Instant) -> bool {
        let Some(last_at) = self.last_at else {
            return true;
        };
        let elapsed = now.saturating_duration_since(last_at);
        if elapsed < self.min_gap {
            return false;
        }
        self.last_text.as_deref() != Some(text) || elapsed >= self.interval
    }

    /// 允许则立即更新游标
    pub fn admit(&mut self, text: &str, now: Instant) -> bool {
        if !self.should_admit(text, now) {
            return false;
        }
        self.last_text = Some(text.to_string());
        self.last_at = Some(now);
        true
    }

    pub fn last_text(&self) -> Option<&str> {
        self.last_text.as_deref()
    }
}

/// 播报统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpeechStats {
    pub offered: u64,
    pub admitted: u64,
    pub spoken: u64,
    pub superseded: u64,
    pub failed: u64,
    pub timed_out: u64,
}

pub struct Announcer {
    cursor: SpeechCursor,
    tx: Option<Sender<String>>,
    // 与工作线程共享的接收端, 用于替换待播文本
    pending: Receiver<String>,
    worker: Option<JoinHandle<()>>,
    exited: Receiver<()>,
    stats: Arc<Mutex<SpeechStats>>,
}

impl Announcer {
    pub fn new(backend: Box<dyn SpeechBackend>, config: &SpeechConfig) -> Self {
        let (tx, rx) = crossbeam_channel::bounded::<String>(1);
        let (exit_tx, exit_rx) = crossbeam_channel::bounded(1);
        let stats = Arc::new(Mutex::new(SpeechStats::default()));

        let worker_rx = rx.clone();
        let worker_stats = stats.clone();
        let timeout = config.timeout();
        let worker = std::thread::Builder::new()
            .name("speech".into())
            .spawn(move || {
                let _signal = ExitSignal(exit_tx);
                speech_loop(worker_rx, backend, timeout, worker_stats);
            })
            .map_err(|e| warn!("⚠️ 语音线程启动失败: {}", e))
            .ok();

        Self {
            cursor: SpeechCursor::new(config.interval(), config.min_gap()),
            tx: worker.as_ref().map(|_| tx),
            pending: rx,
            worker,
            exited: exit_rx,
            stats,
        }
    }

    /// 提交候选播报文本, 经过去重/节流后交给语音线程
    pub fn offer(&mut self, text: &str, now: Instant) -> bool {
        self.stats.lock().offered += 1;
        if !self.cursor.admit(text, now) {
            return false;
        }
        self.stats.lock().admitted += 1;
        self.submit(text.to_string());
        true
    }

    /// 绕过节流直接提交 (退出总结)
    pub fn submit(&self, text: String) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        let mut item = text;
        loop {
            match tx.try_send(item) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if let Ok(old) = self.pending.try_recv() {
                        self.stats.lock().superseded += 1;
                        debug!("待播文本被替换: {}", old);
                    }
                    item = back;
                }
                Err(TrySendError::Disconnected(_)) => {
                    warn!("⚠️ 语音线程已退出, 丢弃播报");
                    return;
                }
            }
        }
    }

    pub fn cursor(&self) -> &SpeechCursor {
        &self.cursor
    }

    pub fn stats(&self) -> SpeechStats {
        *self.stats.lock()
    }

    /// 停止接收新文本, 等待在途与待播文本播完, 最多等待 `grace`
    pub fn shutdown(&mut self, grace: Duration) -> bool {
        self.tx = None;
        let Some(worker) = self.worker.take() else {
            return true;
        };
        match self.exited.recv_timeout(grace) {
            Ok(()) => {
                let _ = worker.join();
                info!("✅ 语音线程已退出");
                true
            }
            Err(_) => {
                warn!("⚠️ 语音线程未在 {:?} 内结束, 已分离", grace);
                false
            }
        }
    }
}

impl Drop for Announcer {
    fn drop(&mut self) {
        self.tx = None;
    }
}

fn speech_loop(
    rx: Receiver<String>,
    mut backend: Box<dyn SpeechBackend>,
    timeout: Duration,
    stats: Arc<Mutex<SpeechStats>>,
) {
    while let Ok(text) = rx.recv() {
        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| backend.speak(&text, timeout)))
            .unwrap_or(Err(SpeechError::Panicked));
        match result {
            Ok(()) => {
                stats.lock().spoken += 1;
                debug!(elapsed = ?started.elapsed(), "🔊 播报完成: {}", text);
            }
            Err(SpeechError::Timeout(limit)) => {
                stats.lock().timed_out += 1;
                warn!("⏱️ 播报超时 ({:?}), 已放弃: {}", limit, text);
            }
            Err(e) => {
                stats.lock().failed += 1;
                warn!("⚠️ 播报失败: {}", e);
            }
        }
    }
}
