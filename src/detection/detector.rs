//! 检测器 (Detector)
//! 职责: RgbImage → 检测结果列表, 本地按置信度/类别过滤

use std::time::{Duration, Instant};

use anyhow::Context;
use image::RgbImage;
use serde::Deserialize;
use tracing::{debug, info};

use super::remote::InferenceClient;
use super::types::Detection;

/// 检测模型接口 (火焰模型 / 通用目标模型各一个实例)
pub trait Detector: Send {
    /// 日志中显示的名称
    fn name(&self) -> &str;

    /// 启动时探测模型是否可用
    fn warm_up(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// 对一帧执行检测 (同步调用)
    fn detect(&mut self, frame: &RgbImage) -> anyhow::Result<Vec<Detection>>;
}

/// 本地过滤规则
#[derive(Clone, Debug, PartialEq)]
pub struct DetectorSpec {
    pub conf_threshold: f32,
    /// `None` 表示不限制类别
    pub allowed_classes: Option<Vec<u32>>,
}

impl DetectorSpec {
    pub fn new(conf_threshold: f32) -> Self {
        Self {
            conf_threshold,
            allowed_classes: None,
        }
    }

    pub fn with_classes(mut self, classes: impl IntoIterator<Item = u32>) -> Self {
        self.allowed_classes = Some(classes.into_iter().collect());
        self
    }

    pub fn accepts(&self, det: &Detection) -> bool {
        det.confidence >= self.conf_threshold
            && self
                .allowed_classes
                .as_ref()
                .map_or(true, |classes| classes.contains(&det.class_id))
    }
}

/// 按置信度和类别白名单过滤
pub fn filter_detections(detections: Vec<Detection>, spec: &DetectorSpec) -> Vec<Detection> {
    detections.into_iter().filter(|d| spec.accepts(d)).collect()
}

#[derive(Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

/// 远程HTTP检测器
pub struct RemoteDetector {
    name: String,
    client: InferenceClient,
    spec: DetectorSpec,

    // 统计
    count: u64,
    total: Duration,
    last: Instant,
}

impl RemoteDetector {
    pub fn new(name: impl Into<String>, client: InferenceClient, spec: DetectorSpec) -> Self {
        Self {
            name: name.into(),
            client,
            spec,
            count: 0,
            total: Duration::ZERO,
            last: Instant::now(),
        }
    }

    pub fn spec(&self) -> &DetectorSpec {
        &self.spec
    }
}

impl Detector for RemoteDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn warm_up(&mut self) -> anyhow::Result<()> {
        self.client
            .health()
            .with_context(|| format!("检测模型 {} 预热失败", self.name))?;
        info!("✅ 检测模型 {} 就绪: {}", self.name, self.client.endpoint());
        Ok(())
    }

    fn detect(&mut self, frame: &RgbImage) -> anyhow::Result<Vec<Detection>> {
        let started = Instant::now();
        let body = self.client.post_image(frame, &[])?;
        let response: DetectResponse = serde_json::from_str(&body)
            .with_context(|| format!("检测模型 {} 返回无效JSON", self.name))?;
        let detections = filter_detections(response.detections, &self.spec);

        self.count += 1;
        self.total += started.elapsed();
        if self.last.elapsed() >= Duration::from_secs(1) {
            debug!(
                "🎯 {} 推理: {:.1} 次/秒, 平均 {:.1}ms",
                self.name,
                self.count as f64 / self.last.elapsed().as_secs_f64(),
                self.total.as_secs_f64() * 1000.0 / self.count as f64
            );
            self.count = 0;
            self.total = Duration::ZERO;
            self.last = Instant::now();
        }

        Ok(detections)
    }
}
