/// 机器人模拟端
///
/// 连接卫兵的两个端口:
/// - 视频端口: 按固定帧率推送长度前缀JPEG帧 (目录中的图片, 或生成的测试画面)
/// - 指令端口: 逐行读取 `MOTION|SPEECH` 并打印
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use tracing::{debug, info, warn};

use safety_sentinel::codec::encode_jpeg;
use safety_sentinel::protocol::{write_frame, Command, Motion};
use safety_sentinel::telemetry::{self, RateMeter};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "机器人模拟端: 推送视频帧并接收卫兵指令")]
struct SimArgs {
    /// 卫兵主机地址
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// 视频端口
    #[arg(long, default_value_t = 9999)]
    video_port: u16,

    /// 指令端口
    #[arg(long, default_value_t = 9998)]
    command_port: u16,

    /// 图片目录 (jpg/png), 不指定则推送生成的测试画面
    #[arg(long)]
    frames: Option<PathBuf>,

    /// 推流帧率
    #[arg(long, default_value_t = 10.0)]
    fps: f64,

    /// 测试画面尺寸
    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,

    /// 运行秒数, 不指定则一直运行
    #[arg(long)]
    duration: Option<u64>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

/// 帧来源: 图片目录循环播放或生成画面
enum FrameSource {
    Files { paths: Vec<PathBuf>, next: usize },
    Pattern { width: u32, height: u32, tick: u32 },
}

impl FrameSource {
    fn open(args: &SimArgs) -> anyhow::Result<Self> {
        match &args.frames {
            Some(dir) => {
                let paths = list_images(dir)?;
                if paths.is_empty() {
                    anyhow::bail!("目录中没有图片: {}", dir.display());
                }
                info!("🎞️  从 {} 循环推送 {} 张图片", dir.display(), paths.len());
                Ok(Self::Files { paths, next: 0 })
            }
            None => {
                info!("🎞️  推送生成的测试画面 {}x{}", args.width, args.height);
                Ok(Self::Pattern {
                    width: args.width.max(32),
                    height: args.height.max(32),
                    tick: 0,
                })
            }
        }
    }

    /// 下一帧的压缩负载
    fn next_payload(&mut self) -> anyhow::Result<Vec<u8>> {
        match self {
            Self::Files { paths, next } => {
                let path = &paths[*next % paths.len()];
                *next = next.wrapping_add(1);
                std::fs::read(path).with_context(|| format!("读取 {} 失败", path.display()))
            }
            Self::Pattern {
                width,
                height,
                tick,
            } => {
                let frame = test_pattern(*width, *height, *tick);
                *tick = tick.wrapping_add(1);
                Ok(encode_jpeg(&frame, 80)?)
            }
        }
    }
}

fn list_images(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("无法读取目录 {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// 灰色背景上水平移动的方块
fn test_pattern(width: u32, height: u32, tick: u32) -> RgbImage {
    let mut frame = RgbImage::from_pixel(width, height, Rgb([90, 90, 90]));
    let size = (height / 4).max(8);
    let span = width.saturating_sub(size).max(1);
    let x = (tick * 8) % span;
    let y = (height - size) / 2;
    draw_filled_rect_mut(
        &mut frame,
        Rect::at(x as i32, y as i32).of_size(size, size),
        Rgb([230, 230, 230]),
    );
    frame
}

fn connect_retry(addr: &str, running: &AtomicBool) -> Option<TcpStream> {
    let mut delay = Duration::from_millis(200);
    while running.load(Ordering::Relaxed) {
        match TcpStream::connect(addr) {
            Ok(stream) => return Some(stream),
            Err(e) => {
                debug!("⏳ 连接 {} 失败: {}, {:?} 后重试", addr, e, delay);
                thread::sleep(delay);
                delay = (delay * 2).min(Duration::from_secs(2));
            }
        }
    }
    None
}

fn stream_video(args: &SimArgs, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", args.host, args.video_port);
    let period = Duration::from_secs_f64(1.0 / args.fps.max(0.1));
    let mut source = FrameSource::open(args)?;
    let mut meter = RateMeter::new();

    while running.load(Ordering::Relaxed) {
        let Some(stream) = connect_retry(&addr, &running) else {
            break;
        };
        info!("📹 视频已连接 {}", addr);
        let mut writer = BufWriter::new(stream);

        while running.load(Ordering::Relaxed) {
            let started = Instant::now();
            let payload = source.next_payload()?;
            let sent = write_frame(&mut writer, &payload)
                .and_then(|_| writer.flush().map_err(Into::into));
            if let Err(e) = sent {
                warn!("🔌 视频连接断开: {}", e);
                break;
            }
            if let Some(fps) = meter.tick() {
                debug!("📤 推流 {:.1} FPS", fps);
            }
            if let Some(rest) = period.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }
    }
    Ok(())
}

fn receive_commands(addr: String, running: Arc<AtomicBool>) {
    while running.load(Ordering::Relaxed) {
        let Some(stream) = connect_retry(&addr, &running) else {
            break;
        };
        let _ = stream.set_read_timeout(Some(Duration::from_millis(500)));
        info!("🤖 指令通道已连接 {}", addr);

        let mut reader = BufReader::new(stream);
        let mut last_motion: Option<Motion> = None;
        let mut line = String::new();
        while running.load(Ordering::Relaxed) {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => {
                    warn!("🔌 指令通道关闭");
                    break;
                }
                Ok(_) => match Command::parse_line(&line) {
                    Ok(command) => {
                        if last_motion != Some(command.motion) {
                            info!("➡️  动作: {}", command.motion);
                            last_motion = Some(command.motion);
                        }
                        if let Some(speech) = command.speech {
                            info!("🔊 语音: [{}] {}", speech.tag.as_str(), speech.text);
                        }
                    }
                    Err(e) => warn!("⚠️  无法解析指令 {:?}: {}", line, e),
                },
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    continue
                }
                Err(e) => {
                    warn!("🔌 指令通道异常: {}", e);
                    break;
                }
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = SimArgs::parse();
    telemetry::init(&args.log_level);
    info!("🤖 机器人模拟端启动");

    let running = Arc::new(AtomicBool::new(true));

    let command_addr = format!("{}:{}", args.host, args.command_port);
    let flag = running.clone();
    let receiver = thread::Builder::new()
        .name("robot-commands".into())
        .spawn(move || receive_commands(command_addr, flag))
        .context("无法启动指令接收线程")?;

    if let Some(secs) = args.duration {
        let flag = running.clone();
        thread::Builder::new()
            .name("robot-timer".into())
            .spawn(move || {
                thread::sleep(Duration::from_secs(secs));
                flag.store(false, Ordering::Relaxed);
            })
            .context("无法启动计时线程")?;
    }

    let result = stream_video(&args, running.clone());
    running.store(false, Ordering::Relaxed);
    if receiver.join().is_err() {
        warn!("⚠️  指令接收线程异常退出");
    }
    info!("🛑 模拟端已退出");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use safety_sentinel::codec::decode_frame;

    #[test]
    fn test_pattern_moves() {
        let a = test_pattern(320, 240, 0);
        let b = test_pattern(320, 240, 5);
        assert_eq!(a.dimensions(), (320, 240));
        assert_ne!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn test_generated_payload_decodes() {
        let mut source = FrameSource::Pattern {
            width: 64,
            height: 48,
            tick: 0,
        };
        let payload = source.next_payload().unwrap();
        assert_eq!(decode_frame(&payload).unwrap().dimensions(), (64, 48));
    }
}
