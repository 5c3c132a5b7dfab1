//! VQA工作线程
//! 职责: 有界队列取任务 → 问答模型 → 关键词分类 → 写入LRU缓存
//!
//! 每个槽位有一个代次: 槽位空出时代次加一并删除缓存, 旧代次的结论到达后被丢弃。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use image::RgbImage;
use tracing::{debug, info, warn};

use super::cache::LruCache;
use super::classifier::{AnswerClassifier, QuestionKind};
use super::oracle::VqaOracle;

/// 一个槽位的问答任务
pub struct VqaJob {
    pub slot: usize,
    /// 提交时槽位的代次
    pub generation: u64,
    pub person_crop: Option<RgbImage>,
    pub head_crop: Option<RgbImage>,
}

/// 问答结论, 按槽位缓存
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VqaResult {
    pub is_fallen: bool,
    pub no_helmet: bool,
}

struct VqaState {
    cache: LruCache<usize, VqaResult>,
    generations: HashMap<usize, u64>,
}

impl VqaState {
    fn generation(&self, slot: usize) -> u64 {
        self.generations.get(&slot).copied().unwrap_or(0)
    }
}

type SharedState = Arc<Mutex<VqaState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, VqaState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 分析线程持有的一端: 非阻塞提交 + 读取缓存
#[derive(Clone)]
pub struct VqaHandle {
    tx: Sender<VqaJob>,
    state: SharedState,
}

/// 工作线程持有的一端
pub struct VqaQueue {
    rx: Receiver<VqaJob>,
    state: SharedState,
}

/// 创建任务队列与共享缓存
pub fn vqa_channel(queue_capacity: usize, cache_size: usize) -> (VqaHandle, VqaQueue) {
    let (tx, rx) = bounded(queue_capacity);
    let state = Arc::new(Mutex::new(VqaState {
        cache: LruCache::new(cache_size),
        generations: HashMap::new(),
    }));
    (
        VqaHandle {
            tx,
            state: state.clone(),
        },
        VqaQueue { rx, state },
    )
}

impl VqaHandle {
    /// 非阻塞提交; 队列满 (或工作线程已退出) 时丢弃并返回 false
    pub fn try_submit(&self, job: VqaJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                debug!("⏭️  VQA队列已满, 丢弃槽位 {} 的任务", job.slot);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// 读取槽位结果并标记为最近使用
    pub fn fetch(&self, slot: usize) -> Option<VqaResult> {
        lock(&self.state).cache.get(&slot)
    }

    /// 槽位当前代次, 随任务一起提交
    pub fn generation(&self, slot: usize) -> u64 {
        lock(&self.state).generation(slot)
    }

    /// 槽位空出: 删除缓存结论, 代次加一使在途任务作废
    pub fn forget(&self, slot: usize) {
        let mut state = lock(&self.state);
        let next = state.generation(slot).wrapping_add(1);
        state.generations.insert(slot, next);
        if state.cache.remove(&slot).is_some() {
            debug!("🗑️  槽位 {} 已空出, 删除VQA结论", slot);
        }
    }

    pub fn cached(&self) -> usize {
        lock(&self.state).cache.len()
    }

    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

pub struct VqaWorker {
    queue: VqaQueue,
    oracle: Box<dyn VqaOracle>,
    classifier: Box<dyn AnswerClassifier>,
    fallen_aspect_ratio: f32,
    running: Arc<AtomicBool>,
}

impl VqaWorker {
    pub fn new(
        queue: VqaQueue,
        oracle: Box<dyn VqaOracle>,
        classifier: Box<dyn AnswerClassifier>,
        fallen_aspect_ratio: f32,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            queue,
            oracle,
            classifier,
            fallen_aspect_ratio,
            running,
        }
    }

    /// 对一个任务求结论; 模型异常按安全侧默认 (未倒地 / 佩戴安全帽)
    pub fn answer(&mut self, job: &VqaJob) -> VqaResult {
        let mut result = VqaResult::default();

        if let Some(crop) = &job.person_crop {
            let (w, h) = crop.dimensions();
            let horizontal = w as f32 / (h as f32 + 1e-6) > self.fallen_aspect_ratio;
            result.is_fallen = if horizontal {
                true
            } else {
                self.ask(crop, QuestionKind::Fallen, job.slot).unwrap_or(false)
            };
        }

        if let Some(crop) = &job.head_crop {
            let wearing = self.ask(crop, QuestionKind::Helmet, job.slot).unwrap_or(true);
            result.no_helmet = !wearing;
        }

        result
    }

    fn ask(&mut self, crop: &RgbImage, kind: QuestionKind, slot: usize) -> Option<bool> {
        match self.oracle.ask(crop, kind.question()) {
            Ok(answer) => {
                let verdict = self.classifier.classify(kind, &answer);
                debug!("🧠 槽位 {} {:?}: \"{}\" → {}", slot, kind, answer.trim(), verdict);
                Some(verdict)
            }
            Err(e) => {
                warn!("⚠️  VQA推理失败 (槽位 {}, {:?}): {:#}", slot, kind, e);
                None
            }
        }
    }

    /// 写入缓存 (超出容量时淘汰最久未使用的条目)
    ///
    /// 槽位代次已变化 (原来的人已离开) 时丢弃结论并返回 false。
    pub fn store(&self, slot: usize, generation: u64, result: VqaResult) -> bool {
        let mut state = lock(&self.queue.state);
        if state.generation(slot) != generation {
            debug!("⏭️  槽位 {} 的VQA结论已过期 (代次 {}), 丢弃", slot, generation);
            return false;
        }
        let evicted = state.cache.put(slot, result);
        if !evicted.is_empty() {
            debug!("🗑️  VQA缓存淘汰槽位 {:?}", evicted);
        }
        true
    }

    /// 工作循环: 队列为空时阻塞, 定期检查退出标志
    pub fn run(mut self) {
        info!("🧠 VQA工作线程启动");
        let poll = Duration::from_millis(100);
        let mut answered: u64 = 0;

        while self.running.load(Ordering::Relaxed) {
            let job = match self.queue.rx.recv_timeout(poll) {
                Ok(job) => job,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let started = Instant::now();
            let result = self.answer(&job);
            self.store(job.slot, job.generation, result);
            answered += 1;
            debug!(
                "🧠 VQA槽位 {} 完成: fallen={} no_helmet={} ({:.0}ms)",
                job.slot,
                result.is_fallen,
                result.no_helmet,
                started.elapsed().as_secs_f64() * 1000.0
            );
        }

        info!("🛑 VQA工作线程退出 (共处理 {} 个任务)", answered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vqa::KeywordClassifier;
    use image::Rgb;
    use std::sync::atomic::AtomicUsize;

    /// 按问题类型返回固定回答
    struct ScriptedOracle {
        fallen: &'static str,
        helmet: Result<&'static str, &'static str>,
        calls: Arc<AtomicUsize>,
    }

    impl VqaOracle for ScriptedOracle {
        fn ask(&mut self, _image: &RgbImage, question: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if question == QuestionKind::Fallen.question() {
                Ok(self.fallen.to_string())
            } else {
                self.helmet
                    .map(str::to_string)
                    .map_err(|e| anyhow::anyhow!(e))
            }
        }
    }

    fn worker(
        fallen: &'static str,
        helmet: Result<&'static str, &'static str>,
    ) -> (VqaHandle, VqaWorker, Arc<AtomicUsize>) {
        let (handle, queue) = vqa_channel(8, 50);
        let calls = Arc::new(AtomicUsize::new(0));
        let oracle = ScriptedOracle {
            fallen,
            helmet,
            calls: calls.clone(),
        };
        let worker = VqaWorker::new(
            queue,
            Box::new(oracle),
            Box::new(KeywordClassifier),
            1.8,
            Arc::new(AtomicBool::new(true)),
        );
        (handle, worker, calls)
    }

    fn crop(w: u32, h: u32) -> Option<RgbImage> {
        Some(RgbImage::from_pixel(w, h, Rgb([128, 128, 128])))
    }

    #[test]
    fn test_upright_person_asks_both_questions() {
        let (_, mut worker, calls) = worker("no", Ok("No, no helmet"));
        let result = worker.answer(&VqaJob {
            slot: 0,
            generation: 0,
            person_crop: crop(40, 100),
            head_crop: crop(30, 30),
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!result.is_fallen);
        assert!(result.no_helmet);
    }

    #[test]
    fn test_horizontal_crop_skips_fallen_question() {
        let (_, mut worker, calls) = worker("no", Ok("yes"));
        let result = worker.answer(&VqaJob {
            slot: 1,
            generation: 0,
            person_crop: crop(200, 60),
            head_crop: None,
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(result.is_fallen);
        assert!(!result.no_helmet);
    }

    #[test]
    fn test_oracle_failure_defaults_to_safe_side() {
        let (_, mut worker, _) = worker("yes, lying", Err("timeout"));
        let result = worker.answer(&VqaJob {
            slot: 2,
            generation: 0,
            person_crop: crop(40, 100),
            head_crop: crop(20, 20),
        });
        assert!(result.is_fallen);
        assert!(!result.no_helmet);
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (handle, _queue) = vqa_channel(2, 50);
        let job = |slot| VqaJob {
            slot,
            generation: 0,
            person_crop: None,
            head_crop: crop(8, 8),
        };
        assert!(handle.try_submit(job(0)));
        assert!(handle.try_submit(job(1)));

        let started = Instant::now();
        assert!(!handle.try_submit(job(2)));
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(handle.pending(), 2);
    }

    #[test]
    fn test_results_visible_through_handle() {
        let (handle, worker, _) = worker("no", Ok("yes"));
        assert!(handle.fetch(0).is_none());
        assert!(worker.store(
            0,
            handle.generation(0),
            VqaResult {
                is_fallen: true,
                no_helmet: false,
            },
        ));
        assert_eq!(handle.fetch(0).map(|r| r.is_fallen), Some(true));
        assert_eq!(handle.cached(), 1);
    }

    #[test]
    fn test_forget_drops_result_and_in_flight_answer() {
        let (handle, worker, _) = worker("no", Ok("no"));
        let old = handle.generation(1);
        let fallen = VqaResult {
            is_fallen: true,
            no_helmet: true,
        };
        assert!(worker.store(1, old, fallen));

        handle.forget(1);
        assert!(handle.fetch(1).is_none());
        assert_eq!(handle.cached(), 0);

        // 原来那个人的在途结论到达时已过期
        assert!(!worker.store(1, old, fallen));
        assert!(handle.fetch(1).is_none());

        // 新的占用者按新代次正常写入
        assert!(worker.store(1, handle.generation(1), VqaResult::default()));
        assert_eq!(handle.fetch(1), Some(VqaResult::default()));
    }

    #[test]
    fn test_worker_thread_processes_jobs() {
        let (handle, worker, _) = worker("no", Ok("no"));
        let running = worker.running.clone();
        let thread = std::thread::spawn(move || worker.run());

        assert!(handle.try_submit(VqaJob {
            slot: 0,
            generation: handle.generation(0),
            person_crop: crop(40, 100),
            head_crop: crop(20, 20),
        }));
        let deadline = Instant::now() + Duration::from_secs(2);
        while handle.fetch(0).is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(
            handle.fetch(0),
            Some(VqaResult {
                is_fallen: false,
                no_helmet: true
            })
        );

        running.store(false, Ordering::Relaxed);
        thread.join().unwrap();
    }
}
