/// 网络服务 (Network Servers)
///
/// 两个独立线程, 各自监听一个TCP端口且同一时间只服务一个连接:
/// - Ingest:   视频接收 (机器人 → 卫兵, 长度前缀帧)
/// - Dispatch: 指令发送 (卫兵 → 机器人, 每100ms一行)
///
/// accept 循环本身就是重试机制: 断开后回到监听, 异常后按退避等待。
pub mod dispatch;
pub mod ingest;

use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub use dispatch::DispatchServer;
pub use ingest::IngestServer;

// ========== 连接状态机 ==========

/// 服务端链路状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// 等待对端连接
    Listening,
    /// 正在服务一个对端
    Connected(SocketAddr),
    /// 异常后等待一段时间再回到监听
    Backoff(Duration),
}

/// 驱动状态机的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Accepted(SocketAddr),
    /// 对端正常关闭或写失败, 直接回到监听
    Disconnected,
    /// 意外错误, 进入退避
    Failed,
    BackoffElapsed,
}

/// 指数退避策略 (首次 `initial`, 每次翻倍, 不超过 `max`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// 第 `attempt` 次 (从1开始) 连续失败后的等待时间
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

/// 链路状态机: 当前状态 + 连续失败计数
///
/// 连续失败次数跨越 Backoff → Listening 保留, 一次成功 accept 后清零。
#[derive(Debug, Clone)]
pub struct Link {
    state: LinkState,
    failures: u32,
    backoff: Backoff,
}

impl Link {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: LinkState::Listening,
            failures: 0,
            backoff,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// 状态转移, 返回新状态
    pub fn on(&mut self, event: LinkEvent) -> LinkState {
        self.state = match (self.state, event) {
            (_, LinkEvent::Accepted(addr)) => {
                self.failures = 0;
                LinkState::Connected(addr)
            }
            (LinkState::Connected(_) | LinkState::Listening, LinkEvent::Disconnected) => {
                LinkState::Listening
            }
            (_, LinkEvent::Failed) => {
                self.failures = self.failures.saturating_add(1);
                LinkState::Backoff(self.backoff.delay(self.failures))
            }
            (LinkState::Backoff(_), LinkEvent::BackoffElapsed) => LinkState::Listening,
            (state, _) => state,
        };
        self.state
    }
}

// ========== 套接字辅助 ==========

/// 绑定非阻塞监听套接字 (便于轮询退出标志)
pub fn bind_listener(addr: &str, port: u16) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind((addr, port))?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// 轮询accept, 直到有连接或收到退出信号
///
/// 返回 `Ok(None)` 表示程序正在退出。
pub fn accept_until(
    listener: &TcpListener,
    running: &AtomicBool,
    poll: Duration,
) -> std::io::Result<Option<(TcpStream, SocketAddr)>> {
    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                // 监听套接字为非阻塞, 连接需显式恢复阻塞模式
                stream.set_nonblocking(false)?;
                return Ok(Some((stream, addr)));
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(poll),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

/// 读满 `buf`, 读超时只用于检查退出标志, 不破坏帧边界
///
/// `Ok(false)`: 对端在读满前关闭, 或程序正在退出。
pub fn read_full(stream: &mut TcpStream, buf: &mut [u8], running: &AtomicBool) -> std::io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        if !running.load(Ordering::Relaxed) {
            return Ok(false);
        }
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) if is_disconnect(&e) => return Ok(false),
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// 对端复位/断管 等视为普通断开
pub fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::NotConnected
    )
}

/// 可被退出信号打断的休眠
pub fn sleep_while_running(total: Duration, running: &AtomicBool, poll: Duration) {
    let mut left = total;
    while !left.is_zero() && running.load(Ordering::Relaxed) {
        let step = left.min(poll);
        std::thread::sleep(step);
        left = left.saturating_sub(step);
    }
}
