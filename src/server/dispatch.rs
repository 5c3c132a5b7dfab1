//! 指令发送服务 (卫兵 → 机器人)
//!
//! 连接期间每个周期读取一次指令存储并写出一行 `MOTION|SPEECH\n`。
//! 语音字段在读取时即被清空, 保证每条语音只投递一次。

use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{debug, info, warn};

use super::{accept_until, bind_listener, is_disconnect, sleep_while_running, Backoff, Link, LinkEvent, LinkState};
use crate::config::ServerConfig;
use crate::store::CommandStore;

pub struct DispatchServer {
    config: ServerConfig,
    commands: CommandStore,
    running: Arc<AtomicBool>,
}

impl DispatchServer {
    pub fn new(config: ServerConfig, commands: CommandStore, running: Arc<AtomicBool>) -> Self {
        Self {
            config,
            commands,
            running,
        }
    }

    pub fn bind(&self) -> anyhow::Result<TcpListener> {
        bind_listener(&self.config.bind_addr, self.config.command_port).with_context(|| {
            format!(
                "无法绑定指令端口 {}:{}",
                self.config.bind_addr, self.config.command_port
            )
        })
    }

    pub fn serve(&self, listener: TcpListener) {
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let mut link = Link::new(Backoff::new(
            Duration::from_millis(self.config.backoff_initial_ms),
            Duration::from_millis(self.config.backoff_max_ms),
        ));

        if let Ok(addr) = listener.local_addr() {
            info!("📡 指令发送服务监听于 {}", addr);
        }

        while self.running.load(Ordering::Relaxed) {
            match link.state() {
                LinkState::Listening => match accept_until(&listener, &self.running, poll) {
                    Ok(Some((stream, addr))) => {
                        link.on(LinkEvent::Accepted(addr));
                        info!("🤖 机器人指令通道已连接: {}", addr);
                        let event = self.serve_client(stream, addr);
                        link.on(event);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("❌ 指令端口accept失败: {}", e);
                        link.on(LinkEvent::Failed);
                    }
                },
                LinkState::Connected(_) => {
                    link.on(LinkEvent::Disconnected);
                }
                LinkState::Backoff(delay) => {
                    info!("⏳ 指令服务退避 {:?} 后重新监听", delay);
                    sleep_while_running(delay, &self.running, poll);
                    link.on(LinkEvent::BackoffElapsed);
                }
            }
        }

        info!("🛑 指令发送服务已退出");
    }

    fn serve_client(&self, mut stream: TcpStream, addr: SocketAddr) -> LinkEvent {
        let period = Duration::from_millis(self.config.command_period_ms.max(1));
        let _ = stream.set_nodelay(true);
        if let Err(e) = stream.set_write_timeout(Some(period * 10)) {
            warn!("❌ 设置写超时失败: {}", e);
            return LinkEvent::Failed;
        }

        let mut next_tick = Instant::now();
        let mut sent: u64 = 0;

        while self.running.load(Ordering::Relaxed) {
            let command = self.commands.take();
            let line = command.to_line();

            if let Err(e) = stream.write_all(line.as_bytes()) {
                if let Some(speech) = &command.speech {
                    warn!("🔇 语音未送达 ({}): {}", speech, e);
                }
                if is_disconnect(&e) {
                    info!("🔌 机器人指令通道断开: {} (已发送 {} 条)", addr, sent);
                    return LinkEvent::Disconnected;
                }
                warn!("❌ 指令发送失败 {}: {}", addr, e);
                return LinkEvent::Failed;
            }

            sent += 1;
            match &command.speech {
                Some(speech) => info!("📢 已下发语音: {}", speech),
                None => debug!("➡️  {}", line.trim_end()),
            }

            next_tick += period;
            let now = Instant::now();
            if next_tick > now {
                std::thread::sleep(next_tick - now);
            } else {
                // 落后超过一个周期时不补发
                next_tick = now;
            }
        }

        LinkEvent::Disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, Motion, Speech, SpeechTag};
    use std::io::{BufRead, BufReader};
    use std::thread;

    fn start(commands: CommandStore) -> (Arc<AtomicBool>, SocketAddr, thread::JoinHandle<()>) {
        let config = ServerConfig {
            bind_addr: "127.0.0.1".to_string(),
            command_port: 0,
            command_period_ms: 20,
            poll_interval_ms: 10,
            ..ServerConfig::default()
        };
        let running = Arc::new(AtomicBool::new(true));
        let server = DispatchServer::new(config, commands, running.clone());
        let listener = server.bind().unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || server.serve(listener));
        (running, addr, handle)
    }

    fn read_lines(addr: SocketAddr, n: usize) -> Vec<String> {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut reader = BufReader::new(stream);
        (0..n)
            .map(|_| {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                line
            })
            .collect()
    }

    #[test]
    fn test_speech_sent_exactly_once() {
        let commands = CommandStore::new();
        commands.publish(
            Motion::Stop,
            Some(Speech::new(SpeechTag::Alert, "Fire detected!")),
        );
        let (running, addr, handle) = start(commands.clone());

        let lines = read_lines(addr, 5);
        assert_eq!(lines[0], "STOP|ALERT|Fire detected!\n");
        for line in &lines[1..] {
            assert_eq!(line, "STOP|\n");
        }

        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();
    }

    #[test]
    fn test_default_command_is_forward() {
        let (running, addr, handle) = start(CommandStore::new());

        let lines = read_lines(addr, 3);
        for line in &lines {
            let command = Command::parse_line(line).unwrap();
            assert_eq!(command.motion, Motion::Forward);
            assert!(command.speech.is_none());
        }

        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();
    }

    #[test]
    fn test_robot_reconnects_after_drop() {
        let commands = CommandStore::new();
        let (running, addr, handle) = start(commands.clone());

        // 第一个客户端读一行后断开
        let first = read_lines(addr, 1);
        assert_eq!(first[0], "FORWARD|\n");
        thread::sleep(Duration::from_millis(300));

        // 两次连接之间产生的语音留给下一个客户端
        commands.publish(
            Motion::Stop,
            Some(Speech::new(SpeechTag::Alert, "Person fallen")),
        );
        assert!(commands.peek().speech.is_some());

        let lines = read_lines(addr, 5);
        assert_eq!(lines[0], "STOP|ALERT|Person fallen\n");
        for line in &lines[1..] {
            assert_eq!(line, "STOP|\n");
        }
        assert_eq!(lines.iter().filter(|l| l.contains("ALERT")).count(), 1);

        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();
    }

    #[test]
    fn test_speech_waits_for_client() {
        let commands = CommandStore::new();
        let (running, addr, handle) = start(commands.clone());
        commands.publish(Motion::Stop, Some(Speech::new(SpeechTag::Warn, "Helmet")));
        thread::sleep(Duration::from_millis(100));

        // 无客户端期间语音不会被消费
        assert!(commands.peek().speech.is_some());
        let lines = read_lines(addr, 1);
        assert_eq!(lines[0], "STOP|WARN|Helmet\n");

        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();
    }
}
