//! 分析与仲裁引擎 (Analysis Engine)
//! 职责: 最新帧 → 两路检测 → 槽位 → VQA调度/读取 → 告警仲裁 → 标注帧 + 指令

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{debug, info, warn};

use super::alert::{AlertArbiter, AlertLevel, AlertSignals};
use super::annotate::{Annotator, Scene};
use super::geometry::{crop_head, crop_safe, is_horizontal, HeadRegion};
use crate::config::EngineConfig;
use crate::detection::{Detection, Detector, PersonState, SlotTracker};
use crate::protocol::{Motion, Speech};
use crate::speech::SpeechHandle;
use crate::store::{CommandStore, FrameStore, SourceFrame};
use crate::telemetry::RateMeter;
use crate::vqa::{VqaHandle, VqaJob};

/// 单个周期的结果 (日志与测试使用)
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub frame_idx: u64,
    pub level: AlertLevel,
    pub motion: Motion,
    pub speech: Option<Speech>,
    pub persons: usize,
    pub obstacles: usize,
    pub fire: usize,
    /// 本周期成功提交的VQA任务数
    pub submitted: usize,
    /// 因队列已满被丢弃的VQA任务数
    pub dropped: usize,
    /// 各活跃槽位融合后的状态 (几何判断 或 VQA结论)
    pub states: Vec<PersonState>,
    /// 标注帧是否写入帧存储 (分析期间连接断开时为 false)
    pub annotated: bool,
    pub inference_ms: f64,
}

pub struct AnalysisEngine {
    config: EngineConfig,
    head: HeadRegion,
    fire_detector: Box<dyn Detector>,
    object_detector: Box<dyn Detector>,
    frames: FrameStore,
    commands: CommandStore,
    vqa: VqaHandle,
    speech: SpeechHandle,
    annotator: Annotator,
    slots: SlotTracker,
    arbiter: AlertArbiter,
    frame_idx: u64,
    last_level: AlertLevel,
    snapshot_dir: Option<PathBuf>,
}

impl AnalysisEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        fire_detector: Box<dyn Detector>,
        object_detector: Box<dyn Detector>,
        frames: FrameStore,
        commands: CommandStore,
        vqa: VqaHandle,
        speech: SpeechHandle,
        annotator: Annotator,
    ) -> Self {
        let head = HeadRegion {
            ratio: config.head_ratio,
            min_px: config.head_min_px,
            pad_px: config.head_pad_px,
        };
        Self {
            slots: SlotTracker::new(config.top_k),
            arbiter: AlertArbiter::new(config.cooldown()),
            head,
            config,
            fire_detector,
            object_detector,
            frames,
            commands,
            vqa,
            speech,
            annotator,
            frame_idx: 0,
            last_level: AlertLevel::Safe,
            snapshot_dir: None,
        }
    }

    /// 危险播报时把标注帧保存到 `dir`
    pub fn with_alert_snapshots(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    fn detect(detector: &mut dyn Detector, frame: &RgbImage) -> Vec<Detection> {
        match detector.detect(frame) {
            Ok(detections) => detections,
            Err(e) => {
                // 推理失败按"无检测"处理, 不中断分析线程
                warn!("⚠️  检测模型 {} 推理失败: {:#}", detector.name(), e);
                Vec::new()
            }
        }
    }

    /// 处理一帧
    pub fn process_frame(&mut self, source: &SourceFrame, now: Instant) -> CycleReport {
        let frame: &RgbImage = &source.frame;
        self.frame_idx += 1;
        let started = Instant::now();

        // 1. 两路检测
        let fire = Self::detect(self.fire_detector.as_mut(), frame);
        let objects = Self::detect(self.object_detector.as_mut(), frame);
        let inference_ms = started.elapsed().as_secs_f64() * 1000.0;

        // 2. 分类
        let mut scene = Scene {
            fire,
            ..Scene::default()
        };
        for det in objects {
            if det.class_id == self.config.person_class {
                scene.persons.push(det);
            } else if self.config.obstacle_classes.contains(&det.class_id) {
                scene.obstacles.push(det);
            } else {
                scene.others.push(det);
            }
        }

        // 3. 槽位更新 (消失的槽位状态被删除)
        let slots = self.slots.update(&scene.persons).to_vec();
        for index in self.slots.vacated() {
            self.vqa.forget(index);
        }

        // 4. VQA调度 + 读取
        let schedule = self.frame_idx % self.config.vqa_every_n.max(1) == 0;
        let mut submitted = 0;
        let mut dropped = 0;
        let mut states = Vec::with_capacity(slots.len());

        for slot in &slots {
            if schedule {
                let person_crop = crop_safe(frame, &slot.bbox, 0);
                let head_crop = crop_head(frame, &slot.bbox, &self.head);
                if person_crop.is_some() || head_crop.is_some() {
                    let job = VqaJob {
                        slot: slot.index,
                        generation: self.vqa.generation(slot.index),
                        person_crop,
                        head_crop,
                    };
                    if self.vqa.try_submit(job) {
                        submitted += 1;
                    } else {
                        dropped += 1;
                    }
                }
            }

            if let Some(result) = self.vqa.fetch(slot.index) {
                self.slots.set_state(
                    slot.index,
                    PersonState {
                        is_fallen: result.is_fallen,
                        no_helmet: result.no_helmet,
                    },
                );
            }

            let cached = self.slots.state(slot.index);
            let fused = PersonState {
                is_fallen: cached.is_fallen
                    || is_horizontal(&slot.bbox, self.config.fallen_aspect_ratio),
                no_helmet: cached.no_helmet,
            };

            let mut label = format!("P{}", slot.index);
            if fused.is_fallen {
                label.push_str(" FALLEN");
            }
            if fused.no_helmet {
                label.push_str(" NO HELMET");
            }
            scene.slot_labels.push((slot.bbox, label));
            states.push(fused);
        }

        // 5. 仲裁
        let signals = AlertSignals {
            fire: !scene.fire.is_empty(),
            fallen: states.iter().any(|s| s.is_fallen),
            no_helmet: states.iter().any(|s| s.no_helmet),
            person: !scene.persons.is_empty(),
            obstacle: !scene.obstacles.is_empty(),
        };
        let decision = self.arbiter.decide(&signals, now);

        if decision.level != self.last_level {
            if decision.level.is_hazard() {
                warn!(
                    "🧠 告警级别: {} → {} ({})",
                    self.last_level, decision.level, decision.motion
                );
            } else {
                info!(
                    "🧠 告警级别: {} → {} ({}){}",
                    self.last_level,
                    decision.level,
                    decision.motion,
                    if self.arbiter.gate().is_clear() { ", 冷却已清零" } else { "" }
                );
            }
            self.last_level = decision.level;
        }

        // 6. 标注 + 发布
        let annotated = self.annotator.render(frame, &scene, decision.level);

        if let Some(speech) = &decision.speech {
            info!("🔊 播报 [{}]: {}", decision.level, speech.text);
            self.speech.say(speech.text.clone());
            self.save_alert_snapshot(&annotated, decision.level);
        }

        let published = self.frames.publish_annotated(source, annotated);
        if !published {
            debug!("⏭️  视频连接已断开, 丢弃第 {} 帧的标注结果", self.frame_idx);
        }
        self.commands.publish(decision.motion, decision.speech.clone());

        CycleReport {
            frame_idx: self.frame_idx,
            level: decision.level,
            motion: decision.motion,
            speech: decision.speech,
            persons: scene.persons.len(),
            obstacles: scene.obstacles.len(),
            fire: scene.fire.len(),
            submitted,
            dropped,
            states,
            annotated: published,
            inference_ms,
        }
    }

    /// 取最新帧处理一次; 没有帧时返回 None
    ///
    /// 视频断开后第一次空转时释放所有槽位。
    pub fn step(&mut self, now: Instant) -> Option<CycleReport> {
        let Some(source) = self.frames.latest_source() else {
            if self.slots.track_count() > 0 {
                for index in self.slots.reset() {
                    self.vqa.forget(index);
                }
                info!("🧠 视频断开, 已释放所有人员槽位");
            }
            return None;
        };
        Some(self.process_frame(&source, now))
    }

    fn save_alert_snapshot(&self, annotated: &RgbImage, level: AlertLevel) {
        let Some(dir) = &self.snapshot_dir else {
            return;
        };
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!("❌ 创建截图目录失败 {}: {}", dir.display(), e);
            return;
        }
        let path = dir.join(crate::snapshot_file_name(&format!(
            "alert_{}",
            level.as_str().to_lowercase()
        )));
        match annotated.save(&path) {
            Ok(()) => info!("📸 告警截图已保存: {}", path.display()),
            Err(e) => warn!("❌ 告警截图保存失败: {}", e),
        }
    }

    /// 分析主循环
    pub fn run(mut self, running: Arc<AtomicBool>) {
        info!("🧠 分析线程启动");
        let idle = Duration::from_millis(self.config.idle_sleep_ms);
        let cycle = Duration::from_millis(self.config.cycle_sleep_ms);
        let mut meter = RateMeter::new();

        while running.load(Ordering::Relaxed) {
            match self.step(Instant::now()) {
                None => {
                    std::thread::sleep(idle);
                    continue;
                }
                Some(report) => {
                    if let Some(fps) = meter.tick() {
                        debug!(
                            "📊 分析 {:.1} FPS | 推理 {:.1}ms | 人 {} (有状态 {}) | VQA 提交 {} 丢弃 {} 待处理 {} 缓存 {}",
                            fps,
                            report.inference_ms,
                            report.persons,
                            self.slots.state_count(),
                            report.submitted,
                            report.dropped,
                            self.vqa.pending(),
                            self.vqa.cached()
                        );
                    }
                }
            }
            std::thread::sleep(cycle);
        }

        info!("🛑 分析线程退出 (共处理 {} 帧)", self.frame_idx);
    }
}
