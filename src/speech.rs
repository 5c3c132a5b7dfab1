//! 本机语音播报
//! Local text-to-speech: one consumer thread, utterances never interleave.
//!
//! 引擎启动失败时所有提交静默丢弃, 调用方无需检查可用性。

use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::config::SpeechConfig;
use crate::error::{Result, SentinelError};

/// 语音引擎接口, `speak` 阻塞到本句播报结束
pub trait SpeechEngine: Send {
    fn speak(&mut self, text: &str) -> anyhow::Result<()>;
}

/// 调用外部TTS程序 (默认 espeak)
pub struct CommandSpeechEngine {
    program: String,
    rate: u32,
    voice: Option<String>,
}

impl CommandSpeechEngine {
    /// 探测程序是否可执行
    pub fn new(config: &SpeechConfig) -> Result<Self> {
        if !config.enabled {
            return Err(SentinelError::SpeechUnavailable("disabled by configuration".into()));
        }
        let status = Command::new(&config.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| SentinelError::SpeechUnavailable(format!("{}: {}", config.program, e)))?;
        if !status.success() {
            return Err(SentinelError::SpeechUnavailable(format!(
                "{} exited with {}",
                config.program, status
            )));
        }
        Ok(Self {
            program: config.program.clone(),
            rate: config.rate,
            voice: config.voice.clone(),
        })
    }
}

impl SpeechEngine for CommandSpeechEngine {
    fn speak(&mut self, text: &str) -> anyhow::Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-s").arg(self.rate.to_string());
        if let Some(voice) = &self.voice {
            cmd.arg("-v").arg(voice);
        }
        let status = cmd
            .arg(text)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if !status.success() {
            anyhow::bail!("{} exited with {}", self.program, status);
        }
        Ok(())
    }
}

/// 提交端; 没有引擎时 `say` 为空操作
#[derive(Clone, Default)]
pub struct SpeechHandle {
    tx: Option<Sender<String>>,
}

impl SpeechHandle {
    /// 不带工作线程的空句柄
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn say(&self, text: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(text.into());
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }
}

pub struct SpeechWorker {
    engine: Box<dyn SpeechEngine>,
    rx: Receiver<String>,
    running: Arc<AtomicBool>,
}

impl SpeechWorker {
    /// 引擎可用时返回 (句柄, 工作者); 否则返回空句柄且不需要线程
    pub fn new(
        engine: Result<Box<dyn SpeechEngine>>,
        running: Arc<AtomicBool>,
    ) -> (SpeechHandle, Option<SpeechWorker>) {
        match engine {
            Ok(engine) => {
                let (tx, rx) = unbounded();
                info!("🔊 语音引擎已启动");
                (
                    SpeechHandle { tx: Some(tx) },
                    Some(SpeechWorker {
                        engine,
                        rx,
                        running,
                    }),
                )
            }
            Err(e) => {
                warn!("⚠️  语音引擎不可用, 播报将被忽略: {}", e);
                (SpeechHandle::disabled(), None)
            }
        }
    }

    pub fn run(mut self) {
        let poll = Duration::from_millis(100);
        while self.running.load(Ordering::Relaxed) {
            let text = match self.rx.recv_timeout(poll) {
                Ok(text) => text,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            debug!("🔊 播报: {}", text);
            if let Err(e) = self.engine.speak(&text) {
                warn!("⚠️  语音播报失败: {:#}", e);
            }
        }
        info!("🛑 语音线程退出");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    struct RecordingEngine {
        spoken: Arc<Mutex<Vec<String>>>,
    }

    impl SpeechEngine for RecordingEngine {
        fn speak(&mut self, text: &str) -> anyhow::Result<()> {
            std::thread::sleep(Duration::from_millis(5));
            self.spoken.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_utterances_spoken_in_order() {
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));
        let engine: Box<dyn SpeechEngine> = Box::new(RecordingEngine {
            spoken: spoken.clone(),
        });
        let (handle, worker) = SpeechWorker::new(Ok(engine), running.clone());
        let thread = std::thread::spawn(move || worker.unwrap().run());

        handle.say("one");
        handle.say("two");
        handle.say("three");

        let deadline = Instant::now() + Duration::from_secs(2);
        while spoken.lock().unwrap().len() < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(*spoken.lock().unwrap(), vec!["one", "two", "three"]);

        running.store(false, Ordering::Relaxed);
        thread.join().unwrap();
    }

    #[test]
    fn test_failed_engine_is_noop() {
        let running = Arc::new(AtomicBool::new(true));
        let (handle, worker) = SpeechWorker::new(
            Err(SentinelError::SpeechUnavailable("missing".into())),
            running,
        );
        assert!(worker.is_none());
        assert!(!handle.is_enabled());
        handle.say("ignored");
    }

    #[test]
    fn test_missing_program_is_unavailable() {
        let config = SpeechConfig {
            program: "definitely-not-a-tts-program".to_string(),
            ..SpeechConfig::default()
        };
        assert!(matches!(
            CommandSpeechEngine::new(&config),
            Err(SentinelError::SpeechUnavailable(_))
        ));
    }
}
