//! 情绪采样器 (Emotion Sampler)
//!
//! 主循环每帧对每个人物槽位调用 `maybe_sample`, 从不阻塞:
//! - 每个槽位同一时刻至多一个在途请求, 超时后视为失败并释放
//! - 同一槽位两次派发之间至少间隔 `interval`
//! - 固定数量的工作线程 + 有界队列, 队列满时直接放弃本次采样
//! - 每个请求带递增序号, 晚到的旧结果不会覆盖新结果

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use image::RgbImage;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{Emotion, EmotionClassifier, EmotionQuery, UNKNOWN_EMOTION};
use crate::config::EmotionConfig;
use crate::error::EmotionError;
use crate::ExitSignal;

/// `maybe_sample` 的决策结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// 已派发, 附带请求序号
    Dispatched(u64),
    /// 距上次派发不足 interval
    Throttled,
    /// 该槽位仍有未超时的在途请求
    Busy,
    /// 工作队列已满
    QueueFull,
    /// 采样器已关闭
    Closed,
}

/// 某个槽位当前可读的情绪
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmotionReading {
    /// 最近一次成功的分类结果
    pub label: Option<Emotion>,
    pub updated_at: Option<Instant>,
    /// 最近一次成功之后发生失败/超时的时刻
    pub stale_since: Option<Instant>,
}

impl EmotionReading {
    pub fn is_stale(&self) -> bool {
        self.stale_since.is_some()
    }

    /// 显示文本, 无结果时为哨兵标签
    pub fn label_text(&self) -> String {
        match self.label {
            Some(e) => e.to_string(),
            None => UNKNOWN_EMOTION.to_string(),
        }
    }
}

/// 诊断计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmotionStats {
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub stale_discarded: u64,
    pub queue_full: u64,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    seq: u64,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct SlotState {
    label: Option<Emotion>,
    applied_seq: u64,
    updated_at: Option<Instant>,
    stale_since: Option<Instant>,
    last_dispatch: Option<Instant>,
    in_flight: Option<InFlight>,
}

#[derive(Debug)]
enum Completion {
    Applied,
    Failed(EmotionError),
    Stale,
    Closed,
}

/// 全部槽位的情绪状态, 由互斥锁保护
#[derive(Debug, Default)]
struct EmotionBoard {
    slots: HashMap<usize, SlotState>,
    next_seq: u64,
    closed: bool,
    stats: EmotionStats,
}

impl EmotionBoard {
    fn complete(
        &mut self,
        slot: usize,
        seq: u64,
        result: Result<Emotion, EmotionError>,
        now: Instant,
    ) -> Completion {
        if self.closed {
            return Completion::Closed;
        }
        let state = self.slots.entry(slot).or_default();
        if state.in_flight.map(|f| f.seq) == Some(seq) {
            state.in_flight = None;
        }
        if seq <= state.applied_seq {
            self.stats.stale_discarded += 1;
            return Completion::Stale;
        }
        state.applied_seq = seq;

        match result {
            Ok(emotion) => {
                state.label = Some(emotion);
                state.updated_at = Some(now);
                state.stale_since = None;
                self.stats.completed += 1;
                Completion::Applied
            }
            Err(e) => {
                state.stale_since.get_or_insert(now);
                self.stats.failed += 1;
                Completion::Failed(e)
            }
        }
    }
}

struct Job {
    seq: u64,
    query: EmotionQuery,
}

pub struct EmotionSampler {
    board: Arc<Mutex<EmotionBoard>>,
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    exited: Receiver<()>,
    interval: Duration,
    timeout: Duration,
}

impl EmotionSampler {
    pub fn new(classifier: Arc<dyn EmotionClassifier>, config: &EmotionConfig) -> Self {
        let board = Arc::new(Mutex::new(EmotionBoard::default()));
        let (job_tx, job_rx) = crossbeam_channel::bounded::<Job>(config.queue_depth.max(1));
        let (exit_tx, exit_rx) = crossbeam_channel::unbounded();

        let worker_count = config.workers.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let jobs = job_rx.clone();
            let classifier = classifier.clone();
            let board = board.clone();
            let signal = ExitSignal(exit_tx.clone());
            let spawned = std::thread::Builder::new()
                .name(format!("emotion-{}", id))
                .spawn(move || {
                    let _signal = signal;
                    worker_loop(id, jobs, classifier, board);
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => warn!("⚠️ 情绪工作线程 {} 启动失败: {}", id, e),
            }
        }
        info!(
            "✅ 情绪采样器启动: {} 个工作线程, 队列深度 {}",
            workers.len(),
            config.queue_depth.max(1)
        );

        Self {
            board,
            jobs: Some(job_tx),
            workers,
            exited: exit_rx,
            interval: config.interval(),
            timeout: config.timeout(),
        }
    }

    /// 判断是否为该槽位派发一次分类, `region` 只在真正派发时才被调用
    ///
    /// 先在锁内预留序号和在途标记, 裁剪人脸区域时不持有锁
    pub fn maybe_sample(
        &self,
        slot: usize,
        frame_index: u64,
        now: Instant,
        region: impl FnOnce() -> RgbImage,
    ) -> SampleOutcome {
        let Some(jobs) = self.jobs.as_ref() else {
            return SampleOutcome::Closed;
        };

        let (seq, previous_dispatch) = {
            let mut guard = self.board.lock();
            let board = &mut *guard;
            if board.closed {
                return SampleOutcome::Closed;
            }

            let state = board.slots.entry(slot).or_default();
            if let Some(flight) = state.in_flight {
                if now < flight.deadline {
                    return SampleOutcome::Busy;
                }
                warn!(slot, seq = flight.seq, "⏱️ 情绪分类超时 ({:?})", self.timeout);
                state.in_flight = None;
                state.stale_since.get_or_insert(now);
                board.stats.timed_out += 1;
            }
            if let Some(last) = state.last_dispatch {
                if now.saturating_duration_since(last) < self.interval {
                    return SampleOutcome::Throttled;
                }
            }
            if jobs.is_full() {
                board.stats.queue_full += 1;
                return SampleOutcome::QueueFull;
            }

            board.next_seq += 1;
            let seq = board.next_seq;
            let state = board.slots.entry(slot).or_default();
            state.in_flight = Some(InFlight {
                seq,
                deadline: now + self.timeout,
            });
            (seq, state.last_dispatch.replace(now))
        };

        let job = Job {
            seq,
            query: EmotionQuery {
                slot,
                frame_index,
                region: region(),
            },
        };
        let sent = jobs.try_send(job);

        let mut board = self.board.lock();
        match sent {
            Ok(()) => {
                board.stats.dispatched += 1;
                debug!(slot, seq, frame = frame_index, "情绪分类已派发");
                SampleOutcome::Dispatched(seq)
            }
            Err(e) => {
                let state = board.slots.entry(slot).or_default();
                if state.in_flight.map(|f| f.seq) == Some(seq) {
                    state.in_flight = None;
                    state.last_dispatch = previous_dispatch;
                }
                match e {
                    TrySendError::Full(_) => {
                        board.stats.queue_full += 1;
                        SampleOutcome::QueueFull
                    }
                    TrySendError::Disconnected(_) => SampleOutcome::Closed,
                }
            }
        }
    }

    /// 读取某槽位最近发布的情绪
    pub fn reading(&self, slot: usize) -> EmotionReading {
        let board = self.board.lock();
        board
            .slots
            .get(&slot)
            .map(|s| EmotionReading {
                label: s.label,
                updated_at: s.updated_at,
                stale_since: s.stale_since,
            })
            .unwrap_or_default()
    }

    pub fn stats(&self) -> EmotionStats {
        self.board.lock().stats
    }

    /// 关闭采样器: 之后完成的结果一律丢弃, 最多等待 `grace` 让工作线程退出
    ///
    /// 返回所有工作线程是否都已退出
    pub fn shutdown(&mut self, grace: Duration) -> bool {
        self.board.lock().closed = true;
        self.jobs = None;

        let deadline = Instant::now() + grace;
        let mut exited = 0;
        while exited < self.workers.len() {
            match self.exited.recv_deadline(deadline) {
                Ok(()) => exited += 1,
                Err(_) => break,
            }
        }

        let workers = std::mem::take(&mut self.workers);
        if exited == workers.len() {
            for worker in workers {
                let _ = worker.join();
            }
            info!("✅ 情绪采样器已关闭");
            true
        } else {
            warn!(
                "⚠️ {} 个情绪工作线程未在 {:?} 内退出, 已分离 (结果将被丢弃)",
                workers.len() - exited,
                grace
            );
            false
        }
    }
}

impl Drop for EmotionSampler {
    fn drop(&mut self) {
        self.board.lock().closed = true;
        self.jobs = None;
    }
}

fn worker_loop(
    id: usize,
    jobs: Receiver<Job>,
    classifier: Arc<dyn EmotionClassifier>,
    board: Arc<Mutex<EmotionBoard>>,
) {
    while let Ok(job) = jobs.recv() {
        if board.lock().closed {
            continue;
        }
        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| classifier.classify(&job.query)))
            .unwrap_or_else(|_| Err(EmotionError::Backend("classifier panicked".to_string())));
        let elapsed = started.elapsed();

        let slot = job.query.slot;
        match board.lock().complete(slot, job.seq, result, Instant::now()) {
            Completion::Applied => {
                debug!(worker = id, slot, seq = job.seq, ?elapsed, "情绪已更新")
            }
            Completion::Failed(e) => {
                warn!(worker = id, slot, seq = job.seq, "⚠️ 情绪分类失败, 保留上次结果: {}", e)
            }
            Completion::Stale => {
                debug!(worker = id, slot, seq = job.seq, "丢弃过期的情绪结果")
            }
            Completion::Closed => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// 按帧序号返回预设结果, 可对指定帧设置闸门阻塞
    struct Scripted {
        labels: HashMap<u64, Emotion>,
        gates: Mutex<HashMap<u64, Receiver<()>>>,
        started: Sender<u64>,
    }

    impl EmotionClassifier for Scripted {
        fn classify(&self, query: &EmotionQuery) -> Result<Emotion, EmotionError> {
            let _ = self.started.send(query.frame_index);
            let gate = self.gates.lock().remove(&query.frame_index);
            if let Some(gate) = gate {
                let _ = gate.recv();
            }
            self.labels
                .get(&query.frame_index)
                .copied()
                .ok_or_else(|| EmotionError::Backend("scripted failure".into()))
        }
    }

    struct Harness {
        sampler: EmotionSampler,
        started: Receiver<u64>,
        gates: HashMap<u64, Sender<()>>,
    }

    fn harness(
        labels: &[(u64, Emotion)],
        gated: &[u64],
        config: EmotionConfig,
    ) -> Harness {
        let (started_tx, started_rx) = crossbeam_channel::unbounded();
        let mut gate_rx = HashMap::new();
        let mut gate_tx = HashMap::new();
        for frame in gated {
            let (tx, rx) = crossbeam_channel::bounded(1);
            gate_tx.insert(*frame, tx);
            gate_rx.insert(*frame, rx);
        }
        let classifier = Scripted {
            labels: labels.iter().copied().collect(),
            gates: Mutex::new(gate_rx),
            started: started_tx,
        };
        Harness {
            sampler: EmotionSampler::new(Arc::new(classifier), &config),
            started: started_rx,
            gates: gate_tx,
        }
    }

    fn config(workers: usize, queue_depth: usize, interval_ms: u64, timeout_ms: u64) -> EmotionConfig {
        EmotionConfig {
            interval_ms,
            timeout_ms,
            workers,
            queue_depth,
            ..EmotionConfig::default()
        }
    }

    fn region() -> RgbImage {
        RgbImage::new(4, 4)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_busy_and_throttled() {
        let h = harness(&[(1, Emotion::Happy), (2, Emotion::Sad)], &[1], config(2, 4, 1000, 5000));
        let t0 = Instant::now();

        assert_eq!(h.sampler.maybe_sample(0, 1, t0, region), SampleOutcome::Dispatched(1));
        assert_eq!(
            h.sampler.maybe_sample(0, 2, t0 + Duration::from_millis(10), region),
            SampleOutcome::Busy
        );
        // 其它槽位不受影响
        assert_eq!(h.sampler.maybe_sample(1, 2, t0, region), SampleOutcome::Dispatched(2));

        h.gates[&1].send(()).unwrap();
        wait_until(|| h.sampler.reading(0).label == Some(Emotion::Happy));
        assert_eq!(
            h.sampler.maybe_sample(0, 3, t0 + Duration::from_millis(100), region),
            SampleOutcome::Throttled
        );
        assert!(matches!(
            h.sampler.maybe_sample(0, 3, t0 + Duration::from_millis(1100), region),
            SampleOutcome::Dispatched(_)
        ));
    }

    #[test]
    fn test_region_only_built_on_dispatch() {
        let h = harness(&[], &[1], config(1, 1, 1000, 5000));
        let t0 = Instant::now();
        let mut built = 0;
        h.sampler.maybe_sample(0, 1, t0, || {
            built += 1;
            region()
        });
        h.sampler.maybe_sample(0, 2, t0, || {
            built += 1;
            region()
        });
        assert_eq!(built, 1);
        h.gates[&1].send(()).unwrap();
    }

    #[test]
    fn test_late_stale_result_is_discarded() {
        let h = harness(&[(1, Emotion::Sad), (2, Emotion::Happy)], &[1], config(2, 4, 0, 50));
        let t0 = Instant::now();

        assert_eq!(h.sampler.maybe_sample(0, 1, t0, region), SampleOutcome::Dispatched(1));
        assert_eq!(h.started.recv().unwrap(), 1);

        // 第一个请求超时, 槽位被释放, 第二个请求很快完成
        let t1 = t0 + Duration::from_millis(60);
        assert_eq!(h.sampler.maybe_sample(0, 2, t1, region), SampleOutcome::Dispatched(2));
        wait_until(|| h.sampler.reading(0).label == Some(Emotion::Happy));
        assert_eq!(h.sampler.stats().timed_out, 1);
        assert!(!h.sampler.reading(0).is_stale());

        // 旧请求此时才返回
        h.gates[&1].send(()).unwrap();
        wait_until(|| h.sampler.stats().stale_discarded == 1);
        assert_eq!(h.sampler.reading(0).label, Some(Emotion::Happy));
    }

    #[test]
    fn test_failure_keeps_last_known_label() {
        let h = harness(&[(1, Emotion::Happy)], &[], config(1, 2, 0, 5000));
        assert_eq!(h.sampler.reading(0).label_text(), "Unknown");

        let t0 = Instant::now();
        h.sampler.maybe_sample(0, 1, t0, region);
        wait_until(|| h.sampler.reading(0).label.is_some());

        // 帧 2 没有预设结果 → 分类失败
        h.sampler
            .maybe_sample(0, 2, t0 + Duration::from_millis(1), region);
        wait_until(|| h.sampler.stats().failed == 1);

        let reading = h.sampler.reading(0);
        assert_eq!(reading.label_text(), "happy");
        assert!(reading.is_stale());
    }

    #[test]
    fn test_queue_full() {
        let h = harness(&[], &[1], config(1, 1, 0, 5000));
        let t0 = Instant::now();

        assert_eq!(h.sampler.maybe_sample(0, 1, t0, region), SampleOutcome::Dispatched(1));
        assert_eq!(h.started.recv().unwrap(), 1);
        assert_eq!(h.sampler.maybe_sample(1, 2, t0, region), SampleOutcome::Dispatched(2));
        let mut built = false;
        let outcome = h.sampler.maybe_sample(2, 3, t0, || {
            built = true;
            region()
        });
        assert_eq!(outcome, SampleOutcome::QueueFull);
        assert!(!built);
        assert_eq!(h.sampler.stats().queue_full, 1);

        // 队列满不占用槽位, 也不计入节流
        h.gates[&1].send(()).unwrap();
        wait_until(|| h.sampler.stats().failed == 2);
        assert!(matches!(
            h.sampler.maybe_sample(2, 4, t0, region),
            SampleOutcome::Dispatched(_)
        ));
    }

    #[test]
    fn test_region_built_without_board_lock() {
        let h = harness(&[(1, Emotion::Happy)], &[], config(1, 1, 0, 5000));
        let t0 = Instant::now();
        // 裁剪回调里读取看板, 若仍持有锁则会死锁
        let outcome = h.sampler.maybe_sample(0, 1, t0, || {
            assert_eq!(h.sampler.reading(0).label, None);
            region()
        });
        assert_eq!(outcome, SampleOutcome::Dispatched(1));
        wait_until(|| h.sampler.reading(0).label == Some(Emotion::Happy));
    }

    #[test]
    fn test_timeout_frees_slot_and_marks_stale() {
        let h = harness(&[(1, Emotion::Happy)], &[2], config(1, 2, 0, 50));
        let t0 = Instant::now();

        h.sampler.maybe_sample(0, 1, t0, region);
        wait_until(|| h.sampler.reading(0).label == Some(Emotion::Happy));
        assert!(!h.sampler.reading(0).is_stale());

        // 帧 2 的请求卡在闸门上
        let t1 = t0 + Duration::from_millis(10);
        assert_eq!(h.sampler.maybe_sample(0, 2, t1, region), SampleOutcome::Dispatched(2));
        assert_eq!(h.started.recv().unwrap(), 1);
        assert_eq!(h.started.recv().unwrap(), 2);
        assert_eq!(
            h.sampler.maybe_sample(0, 3, t1 + Duration::from_millis(20), region),
            SampleOutcome::Busy
        );

        // 超过截止时间: 槽位被释放并重新派发, 旧结果标记为过期
        let t2 = t1 + Duration::from_millis(60);
        assert_eq!(h.sampler.maybe_sample(0, 3, t2, region), SampleOutcome::Dispatched(3));
        let reading = h.sampler.reading(0);
        assert!(reading.is_stale());
        assert_eq!(reading.stale_since, Some(t2));
        assert_eq!(reading.label, Some(Emotion::Happy));
        assert_eq!(h.sampler.stats().timed_out, 1);

        h.gates[&2].send(()).unwrap();
    }

    #[test]
    fn test_shutdown_discards_late_results() {
        let mut h = harness(&[(1, Emotion::Happy)], &[1], config(1, 1, 0, 5000));
        let t0 = Instant::now();
        h.sampler.maybe_sample(0, 1, t0, region);
        assert_eq!(h.started.recv().unwrap(), 1);

        // 工作线程卡住, 宽限期内无法退出
        assert!(!h.sampler.shutdown(Duration::from_millis(20)));
        assert_eq!(h.sampler.maybe_sample(1, 2, t0, region), SampleOutcome::Closed);

        h.gates[&1].send(()).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(h.sampler.reading(0).label, None);
    }

    #[test]
    fn test_clean_shutdown_joins_workers() {
        let mut h = harness(&[], &[], config(3, 2, 0, 5000));
        assert!(h.sampler.shutdown(Duration::from_secs(2)));
    }
}
