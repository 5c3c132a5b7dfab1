//! 视频接收服务 (机器人 → 卫兵)
//!
//! 每个连接读取连续的长度前缀帧, 解码后覆盖共享帧存储中的原始帧。
//! 单帧解码失败只丢弃该帧; 连接断开时清空帧存储。

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};

use super::{accept_until, bind_listener, read_full, sleep_while_running, Backoff, Link, LinkEvent, LinkState};
use crate::codec::decode_frame;
use crate::config::ServerConfig;
use crate::error::SentinelError;
use crate::protocol::{read_frame_with, FrameRead};
use crate::store::FrameStore;
use crate::telemetry::RateMeter;

pub struct IngestServer {
    config: ServerConfig,
    frames: FrameStore,
    running: Arc<AtomicBool>,
}

impl IngestServer {
    pub fn new(config: ServerConfig, frames: FrameStore, running: Arc<AtomicBool>) -> Self {
        Self {
            config,
            frames,
            running,
        }
    }

    /// 绑定配置中的视频端口
    pub fn bind(&self) -> anyhow::Result<TcpListener> {
        bind_listener(&self.config.bind_addr, self.config.ingest_port).with_context(|| {
            format!(
                "无法绑定视频端口 {}:{}",
                self.config.bind_addr, self.config.ingest_port
            )
        })
    }

    /// accept 循环: 同一时间只服务一个连接
    pub fn serve(&self, listener: TcpListener) {
        let poll = self.poll_interval();
        let mut link = Link::new(Backoff::new(
            Duration::from_millis(self.config.backoff_initial_ms),
            Duration::from_millis(self.config.backoff_max_ms),
        ));

        if let Ok(addr) = listener.local_addr() {
            info!("📡 视频接收服务监听于 {}", addr);
        }

        while self.running.load(Ordering::Relaxed) {
            match link.state() {
                LinkState::Listening => match accept_until(&listener, &self.running, poll) {
                    Ok(Some((stream, addr))) => {
                        link.on(LinkEvent::Accepted(addr));
                        info!("📹 机器人视频已连接: {}", addr);
                        let event = self.serve_client(stream, addr);
                        self.frames.clear();
                        link.on(event);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("❌ 视频端口accept失败: {}", e);
                        link.on(LinkEvent::Failed);
                    }
                },
                LinkState::Connected(_) => {
                    link.on(LinkEvent::Disconnected);
                }
                LinkState::Backoff(delay) => {
                    info!("⏳ 视频服务退避 {:?} 后重新监听", delay);
                    sleep_while_running(delay, &self.running, poll);
                    link.on(LinkEvent::BackoffElapsed);
                }
            }
        }

        self.frames.clear();
        info!("🛑 视频接收服务已退出");
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms.max(1))
    }

    /// 服务单个连接, 返回驱动状态机的事件
    fn serve_client(&self, mut stream: TcpStream, addr: SocketAddr) -> LinkEvent {
        if let Err(e) = stream.set_read_timeout(Some(self.poll_interval())) {
            warn!("❌ 设置读超时失败: {}", e);
            return LinkEvent::Failed;
        }

        let max_len = self.config.max_frame_bytes;
        let running = &self.running;
        let mut meter = RateMeter::new();
        let mut received: u64 = 0;
        let mut dropped: u64 = 0;

        let event = loop {
            let result = read_frame_with(max_len, |buf| read_full(&mut stream, buf, running));
            match result {
                Ok(FrameRead::Payload(payload)) => match decode_frame(&payload) {
                    Ok(frame) => {
                        self.frames.publish_raw(frame);
                        received += 1;
                        if let Some(fps) = meter.tick() {
                            debug!("📥 接收帧率: {:.1} FPS", fps);
                        }
                    }
                    Err(e) => {
                        dropped += 1;
                        warn!("⚠️  丢弃无法解码的帧 ({} 字节): {}", payload.len(), e);
                    }
                },
                Ok(FrameRead::Closed) => {
                    info!("📹 机器人视频断开: {}", addr);
                    break LinkEvent::Disconnected;
                }
                Err(SentinelError::FrameTooLarge { len, max }) => {
                    warn!(
                        "⚠️  帧长度 {} 超过上限 {}, 断开 {} (无法重新同步)",
                        len, max, addr
                    );
                    break LinkEvent::Disconnected;
                }
                Err(e) => {
                    warn!("❌ 视频连接异常 {}: {}", addr, e);
                    break LinkEvent::Failed;
                }
            }
        };

        debug!("📊 连接 {} 共接收 {} 帧, 丢弃 {} 帧", addr, received, dropped);
        event
    }
}
