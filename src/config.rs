//! 卫兵配置 - 通过JSON文件调整参数, 命令行覆盖

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// 安全卫兵命令行参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "机器人安全卫兵 - Robot Safety Sentinel", long_about = None)]
pub struct Args {
    /// JSON配置文件路径 (不存在时写入默认配置)
    #[arg(short, long, default_value = "sentinel.json")]
    pub config: PathBuf,

    /// 视频接收端口 (覆盖配置文件)
    #[arg(long)]
    pub ingest_port: Option<u16>,

    /// 指令发送端口 (覆盖配置文件)
    #[arg(long)]
    pub command_port: Option<u16>,

    /// 无窗口模式, 在stdin输入 q 退出
    #[arg(long)]
    pub headless: bool,

    /// 禁用本机语音播报
    #[arg(long)]
    pub no_speech: bool,

    /// 日志级别 (RUST_LOG 优先)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// 网络服务参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub ingest_port: u16,        // 视频接收端口
    pub command_port: u16,       // 指令发送端口
    pub command_period_ms: u64,  // 指令推送周期
    pub max_frame_bytes: usize,  // 单帧负载上限
    pub backoff_initial_ms: u64, // 异常后首次退避
    pub backoff_max_ms: u64,     // 退避上限
    pub poll_interval_ms: u64,   // accept/读超时轮询间隔 (检查退出标志)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            ingest_port: 9999,
            command_port: 9998,
            command_period_ms: 100,
            max_frame_bytes: 16 * 1024 * 1024, // 16MB
            backoff_initial_ms: 1000,
            backoff_max_ms: 8000,
            poll_interval_ms: 200,
        }
    }
}

/// 分析引擎参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub top_k: usize,              // 每帧跟踪的人数上限
    pub vqa_every_n: u64,          // 每N帧提交一次VQA
    pub alert_cooldown_ms: u64,    // 同类播报最小间隔
    pub fallen_aspect_ratio: f32,  // 宽高比超过该值视为倒地
    pub head_ratio: f32,           // 头部区域占人框高度比例
    pub head_min_px: u32,          // 头部区域最小高度
    pub head_pad_px: u32,          // 头部裁剪外扩
    pub idle_sleep_ms: u64,        // 无帧时休眠
    pub cycle_sleep_ms: u64,       // 每周期让出
    pub person_class: u32,         // 人的类别ID
    pub obstacle_classes: Vec<u32>, // 障碍物类别 (椅子/沙发/餐桌)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            vqa_every_n: 8,
            alert_cooldown_ms: 5000,
            fallen_aspect_ratio: 1.8,
            head_ratio: 0.28,
            head_min_px: 20,
            head_pad_px: 4,
            idle_sleep_ms: 50,
            cycle_sleep_ms: 10,
            person_class: 0,
            obstacle_classes: vec![56, 57, 60],
        }
    }
}

impl EngineConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.alert_cooldown_ms)
    }
}

/// VQA工作线程参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VqaConfig {
    pub queue_capacity: usize, // 有界任务队列
    pub cache_size: usize,     // LRU结果缓存上限
    pub max_side: u32,         // 上传前最长边
}

impl Default for VqaConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 8,
            cache_size: 50,
            max_side: 448,
        }
    }
}

/// 远程推理服务
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub fire_endpoint: String,
    pub object_endpoint: String,
    pub vqa_endpoint: String,
    pub conf_threshold: f32,
    pub timeout_ms: u64,
    pub jpeg_quality: u8,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            fire_endpoint: "http://127.0.0.1:8500/fire".to_string(),
            object_endpoint: "http://127.0.0.1:8500/objects".to_string(),
            vqa_endpoint: "http://127.0.0.1:8500/vqa".to_string(),
            conf_threshold: 0.5,
            timeout_ms: 5000,
            jpeg_quality: 85,
        }
    }
}

/// 本机语音播报
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    pub program: String,
    pub rate: u32,
    pub voice: Option<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "espeak".to_string(),
            rate: 180,
            voice: None,
        }
    }
}

/// 展示与截图
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub font_path: Option<String>,
    pub snapshot_dir: String,
    pub alert_snapshots: bool,
    pub shutdown_timeout_ms: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            snapshot_dir: "snapshots".to_string(),
            alert_snapshots: false,
            shutdown_timeout_ms: 1000,
        }
    }
}

/// 卫兵完整配置
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub vqa: VqaConfig,
    pub models: ModelConfig,
    pub speech: SpeechConfig,
    pub display: DisplayConfig,
}

impl SentinelConfig {
    /// 从JSON文件加载配置
    pub fn load(path: &std::path::Path) -> Self {
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    warn!("❌ 保存配置失败: {:#}", e);
                }
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    /// 命令行参数覆盖文件配置
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(port) = args.ingest_port {
            self.server.ingest_port = port;
        }
        if let Some(port) = args.command_port {
            self.server.command_port = port;
        }
        if args.no_speech {
            self.speech.enabled = false;
        }
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️  当前卫兵配置:");
        info!(
            "  视频端口: {} | 指令端口: {} | 推送周期: {}ms",
            self.server.ingest_port, self.server.command_port, self.server.command_period_ms
        );
        info!(
            "  Top-K: {} | VQA间隔: 每{}帧 | 冷却: {}ms",
            self.engine.top_k, self.engine.vqa_every_n, self.engine.alert_cooldown_ms
        );
        info!(
            "  VQA队列: {} | VQA缓存: {} | 检测置信度: {:.2}",
            self.vqa.queue_capacity, self.vqa.cache_size, self.models.conf_threshold
        );
        info!(
            "  语音: {} ({})",
            if self.speech.enabled { "启用" } else { "禁用" },
            self.speech.program
        );
    }
}
