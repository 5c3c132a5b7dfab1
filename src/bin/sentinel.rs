/// 机器人安全卫兵 (Robot Safety Sentinel)
///
/// 系统架构:
/// 1. 视频接收线程: 机器人 → 卫兵, 长度前缀JPEG帧
/// 2. 分析线程:     检测 → 槽位 → VQA → 告警仲裁
/// 3. VQA / 语音线程: 有界问答队列, 本机播报
/// 4. 指令发送线程: 每100ms推送 `MOTION|SPEECH`
/// 5. 主线程:       画面显示 (macroquad) 或无窗口模式
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use image::buffer::ConvertBuffer;
use image::RgbaImage;
use macroquad::prelude::*;
use mimalloc::MiMalloc;
use tracing::{info, warn};

use safety_sentinel::codec::RawFrame;
use safety_sentinel::store::{CommandStore, DisplayFrame, FrameStore};
use safety_sentinel::telemetry::{self, RateMeter};
use safety_sentinel::{snapshot_file_name, Args, Collaborators, Runtime, SentinelConfig};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const WAITING_TEXT: &str = "Waiting for robot video connection...";

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init(&args.log_level);

    info!("🚀 机器人安全卫兵启动");
    let mut config = SentinelConfig::load(&args.config);
    config.apply_args(&args);
    config.print_summary();

    // 模型不可用时无法履行职责, 直接退出
    let mut collaborators = Collaborators::remote(&config);
    collaborators.warm_up()?;

    let runtime = Runtime::start(&config, collaborators)?;
    info!(
        "✅ 卫兵就绪: 视频端口 {} | 指令端口 {}",
        runtime.ingest_addr(),
        runtime.command_addr()
    );
    let timeout = Duration::from_millis(config.display.shutdown_timeout_ms);

    if args.headless {
        run_headless(&runtime);
    } else {
        let viewer = Viewer::new(
            runtime.frames().clone(),
            runtime.commands().clone(),
            runtime.running(),
            PathBuf::from(&config.display.snapshot_dir),
        );
        macroquad::Window::from_config(window_conf(), viewer.run());
    }

    runtime.shutdown(timeout);
    Ok(())
}

fn window_conf() -> Conf {
    Conf {
        window_title: "机器人安全卫兵 - Robot Safety Sentinel".to_owned(),
        window_width: 960,
        window_height: 720,
        window_resizable: true,
        high_dpi: false,
        ..Default::default()
    }
}

/// 无窗口模式: stdin 输入 q 或关闭 stdin 时退出
fn run_headless(runtime: &Runtime) {
    info!("🖥️  无窗口模式, 输入 q 回车退出");
    let flag = runtime.running();
    let spawned = std::thread::Builder::new()
        .name("sentinel-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) if line.trim().eq_ignore_ascii_case("q") => break,
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
            info!("⌨️  收到退出指令");
            flag.store(false, Ordering::Relaxed);
        });
    if let Err(e) = spawned {
        warn!("❌ 无法监听stdin: {}", e);
    }

    while runtime.is_running() {
        std::thread::sleep(Duration::from_millis(100));
    }
}

/// 画面显示: 标注帧 → 原始帧 → 等待画面
struct Viewer {
    frames: FrameStore,
    commands: CommandStore,
    running: Arc<AtomicBool>,
    snapshot_dir: PathBuf,
    texture: Option<Texture2D>,
    shown: Option<RawFrame>,
    meter: RateMeter,
}

impl Viewer {
    fn new(
        frames: FrameStore,
        commands: CommandStore,
        running: Arc<AtomicBool>,
        snapshot_dir: PathBuf,
    ) -> Self {
        Self {
            frames,
            commands,
            running,
            snapshot_dir,
            texture: None,
            shown: None,
            meter: RateMeter::new(),
        }
    }

    async fn run(mut self) {
        info!("🎨 显示窗口启动 (Q/Esc 退出, S 截图)");
        loop {
            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            if is_key_pressed(KeyCode::Q) || is_key_pressed(KeyCode::Escape) {
                info!("⌨️  收到退出按键");
                break;
            }

            let current = match self.frames.display_frame() {
                DisplayFrame::Annotated(frame) | DisplayFrame::Raw(frame) => Some(frame),
                DisplayFrame::Waiting => None,
            };

            if is_key_pressed(KeyCode::S) {
                self.save_snapshot(current.as_ref());
            }

            self.upload(current);
            self.draw();
            if let Some(fps) = self.meter.tick() {
                tracing::debug!("🎨 显示 {:.1} FPS", fps);
            }
            next_frame().await;
        }
        self.running.store(false, Ordering::Relaxed);
    }

    /// 只有帧变化时才上传纹理
    fn upload(&mut self, current: Option<RawFrame>) {
        let Some(frame) = current else {
            self.shown = None;
            return;
        };
        if let Some(shown) = &self.shown {
            if Arc::ptr_eq(shown, &frame) {
                return;
            }
        }

        let rgba: RgbaImage = frame.as_ref().convert();
        let (width, height) = (rgba.width() as u16, rgba.height() as u16);
        let needs_rebuild = match &self.texture {
            Some(tex) => tex.width() != width as f32 || tex.height() != height as f32,
            None => true,
        };

        if needs_rebuild {
            let texture = Texture2D::from_rgba8(width, height, rgba.as_raw());
            texture.set_filter(FilterMode::Linear);
            self.texture = Some(texture);
        } else if let Some(tex) = &self.texture {
            tex.update(&Image {
                bytes: rgba.into_raw(),
                width,
                height,
            });
        }
        self.shown = Some(frame);
    }

    fn draw(&self) {
        clear_background(BLACK);
        match (&self.shown, &self.texture) {
            (Some(_), Some(texture)) => {
                draw_texture_ex(
                    texture,
                    0.0,
                    0.0,
                    WHITE,
                    DrawTextureParams {
                        dest_size: Some(vec2(screen_width(), screen_height())),
                        ..Default::default()
                    },
                );
            }
            _ => {
                draw_text(WAITING_TEXT, 50.0, screen_height() / 2.0, 32.0, WHITE);
            }
        }

        // 当前下发给机器人的动作
        let motion = self.commands.peek().motion;
        draw_text(
            &format!("MOTION: {}", motion),
            10.0,
            screen_height() - 12.0,
            24.0,
            YELLOW,
        );
    }

    fn save_snapshot(&self, frame: Option<&RawFrame>) {
        let Some(frame) = frame else {
            warn!("⚠️  暂无画面, 跳过截图");
            return;
        };
        if let Err(e) = std::fs::create_dir_all(&self.snapshot_dir) {
            warn!("❌ 创建截图目录失败: {}", e);
            return;
        }
        let path = self.snapshot_dir.join(snapshot_file_name("snap"));
        match frame.save(&path) {
            Ok(()) => info!("📸 截图已保存: {}", path.display()),
            Err(e) => warn!("❌ 截图保存失败: {}", e),
        }
    }
}
