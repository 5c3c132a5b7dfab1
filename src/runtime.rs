//! 运行时: 启动所有线程, 协作式退出
//!
//! 全局运行标志在每个循环顶部检查; 退出时对每个线程最多等待一个超时。

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{info, warn};

use crate::config::SentinelConfig;
use crate::detection::{Detector, DetectorSpec, InferenceClient, RemoteDetector};
use crate::engine::{AnalysisEngine, Annotator};
use crate::server::{DispatchServer, IngestServer};
use crate::speech::{CommandSpeechEngine, SpeechEngine, SpeechWorker};
use crate::store::{CommandStore, FrameStore};
use crate::vqa::{vqa_channel, KeywordClassifier, RemoteVqaOracle, VqaOracle, VqaWorker};

/// 外部协作者 (检测模型 / 问答模型 / 语音引擎)
pub struct Collaborators {
    pub fire_detector: Box<dyn Detector>,
    pub object_detector: Box<dyn Detector>,
    pub oracle: Box<dyn VqaOracle>,
    /// 启动失败的语音引擎会退化为空操作
    pub speech: crate::error::Result<Box<dyn SpeechEngine>>,
}

impl Collaborators {
    /// 按配置创建HTTP推理协作者与本机TTS
    pub fn remote(config: &SentinelConfig) -> Self {
        let models = &config.models;
        let timeout = Duration::from_millis(models.timeout_ms);
        let client =
            |endpoint: &str| InferenceClient::new(endpoint, timeout, models.jpeg_quality);

        let fire_detector = RemoteDetector::new(
            "fire",
            client(&models.fire_endpoint),
            DetectorSpec::new(models.conf_threshold),
        );
        let mut allowed = vec![config.engine.person_class];
        allowed.extend(config.engine.obstacle_classes.iter().copied());
        let object_detector = RemoteDetector::new(
            "objects",
            client(&models.object_endpoint),
            DetectorSpec::new(models.conf_threshold).with_classes(allowed),
        );
        let oracle = RemoteVqaOracle::new(client(&models.vqa_endpoint), config.vqa.max_side);
        let speech = CommandSpeechEngine::new(&config.speech)
            .map(|engine| Box::new(engine) as Box<dyn SpeechEngine>);

        Self {
            fire_detector: Box::new(fire_detector),
            object_detector: Box::new(object_detector),
            oracle: Box::new(oracle),
            speech,
        }
    }

    /// 模型预热, 任何失败都是致命启动错误
    pub fn warm_up(&mut self) -> anyhow::Result<()> {
        self.fire_detector.warm_up()?;
        self.object_detector.warm_up()?;
        self.oracle.warm_up()?;
        info!("✅ AI模型全部就绪");
        Ok(())
    }
}

fn spawn_named<F>(name: &str, f: F) -> anyhow::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .with_context(|| format!("无法启动线程 {}", name))
}

pub struct Runtime {
    running: Arc<AtomicBool>,
    frames: FrameStore,
    commands: CommandStore,
    ingest_addr: SocketAddr,
    command_addr: SocketAddr,
    threads: Vec<(String, JoinHandle<()>)>,
}

impl Runtime {
    /// 绑定两个端口并启动全部工作线程
    pub fn start(config: &SentinelConfig, collaborators: Collaborators) -> anyhow::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let frames = FrameStore::new();
        let commands = CommandStore::new();
        let mut threads = Vec::new();

        // 端口绑定失败属于启动错误
        let ingest = IngestServer::new(config.server.clone(), frames.clone(), running.clone());
        let ingest_listener = ingest.bind()?;
        let ingest_addr = ingest_listener.local_addr()?;
        let dispatch = DispatchServer::new(config.server.clone(), commands.clone(), running.clone());
        let command_listener = dispatch.bind()?;
        let command_addr = command_listener.local_addr()?;

        let Collaborators {
            fire_detector,
            object_detector,
            oracle,
            speech,
        } = collaborators;

        // 语音
        let (speech_handle, speech_worker) = SpeechWorker::new(speech, running.clone());
        info!(
            "🔊 本机语音播报: {}",
            if speech_handle.is_enabled() { "启用" } else { "关闭" }
        );
        if let Some(worker) = speech_worker {
            threads.push((
                "sentinel-speech".to_string(),
                spawn_named("sentinel-speech", move || worker.run())?,
            ));
        }

        // VQA
        let (vqa_handle, vqa_queue) = vqa_channel(config.vqa.queue_capacity, config.vqa.cache_size);
        let vqa_worker = VqaWorker::new(
            vqa_queue,
            oracle,
            Box::new(KeywordClassifier),
            config.engine.fallen_aspect_ratio,
            running.clone(),
        );
        threads.push((
            "sentinel-vqa".to_string(),
            spawn_named("sentinel-vqa", move || vqa_worker.run())?,
        ));

        // 分析
        let annotator = Annotator::new(config.display.font_path.as_deref());
        if !annotator.has_font() {
            warn!("⚠️  未找到可用字体, 标注将不显示文字");
        }
        let mut engine = AnalysisEngine::new(
            config.engine.clone(),
            fire_detector,
            object_detector,
            frames.clone(),
            commands.clone(),
            vqa_handle,
            speech_handle,
            annotator,
        );
        if config.display.alert_snapshots {
            engine = engine.with_alert_snapshots(&config.display.snapshot_dir);
        }
        let flag = running.clone();
        threads.push((
            "sentinel-analysis".to_string(),
            spawn_named("sentinel-analysis", move || engine.run(flag))?,
        ));

        // 网络
        threads.push((
            "sentinel-ingest".to_string(),
            spawn_named("sentinel-ingest", move || ingest.serve(ingest_listener))?,
        ));
        threads.push((
            "sentinel-dispatch".to_string(),
            spawn_named("sentinel-dispatch", move || dispatch.serve(command_listener))?,
        ));

        info!("🚀 所有线程已启动 ({} 个)", threads.len());
        Ok(Self {
            running,
            frames,
            commands,
            ingest_addr,
            command_addr,
            threads,
        })
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// 请求退出, 不等待
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn frames(&self) -> &FrameStore {
        &self.frames
    }

    pub fn commands(&self) -> &CommandStore {
        &self.commands
    }

    pub fn ingest_addr(&self) -> SocketAddr {
        self.ingest_addr
    }

    pub fn command_addr(&self) -> SocketAddr {
        self.command_addr
    }

    /// 清除运行标志, 每个线程最多等待 `timeout`; 超时的线程被分离
    pub fn shutdown(self, timeout: Duration) -> usize {
        info!("🛑 正在停止所有线程...");
        self.request_stop();

        let mut detached = 0;
        for (name, handle) in self.threads {
            let deadline = Instant::now() + timeout;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!("⚠️  线程 {} 异常退出", name);
                }
            } else {
                warn!("⚠️  线程 {} 未在 {:?} 内退出, 已分离", name, timeout);
                detached += 1;
            }
        }
        info!("✅ 卫兵已停止");
        detached
    }
}
