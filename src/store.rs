//! 共享存储 (帧 / 指令)
//! Shared single-slot stores handed to every thread that needs them.
//!
//! 锁只在指针交换期间持有,绝不跨越推理调用。

use std::sync::{Arc, Mutex, MutexGuard};

use image::RgbImage;

use crate::codec::RawFrame;
use crate::protocol::{Command, Motion, Speech};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // 持锁线程panic不应卡死整个流水线
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct FrameSlots {
    raw: Option<RawFrame>,
    annotated: Option<RawFrame>,
    // 每次 clear() 加一, 标记视频连接的代次
    epoch: u64,
}

/// 分析线程取出的原始帧, 附带取出时的连接代次
#[derive(Clone)]
pub struct SourceFrame {
    pub frame: RawFrame,
    pub epoch: u64,
}

/// 展示层可见的帧
#[derive(Clone)]
pub enum DisplayFrame {
    Annotated(RawFrame),
    Raw(RawFrame),
    /// 尚无视频连接
    Waiting,
}

/// 最新原始帧 + 最新标注帧, 新帧覆盖旧帧
#[derive(Clone, Default)]
pub struct FrameStore {
    inner: Arc<Mutex<FrameSlots>>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_raw(&self, frame: RgbImage) {
        let frame = Arc::new(frame);
        lock(&self.inner).raw = Some(frame);
    }

    /// 发布标注帧
    ///
    /// 只有原始帧仍在且连接代次与 `source` 相同时才写入; 分析期间连接
    /// 断开的结果被丢弃, 返回 false。
    pub fn publish_annotated(&self, source: &SourceFrame, frame: RgbImage) -> bool {
        let frame = Arc::new(frame);
        let mut slots = lock(&self.inner);
        if slots.raw.is_none() || slots.epoch != source.epoch {
            return false;
        }
        slots.annotated = Some(frame);
        true
    }

    /// 最新原始帧 + 当前连接代次 (同一把锁下读取)
    pub fn latest_source(&self) -> Option<SourceFrame> {
        let slots = lock(&self.inner);
        slots.raw.clone().map(|frame| SourceFrame {
            frame,
            epoch: slots.epoch,
        })
    }

    /// 连接断开时清空,避免展示过期画面
    pub fn clear(&self) {
        let mut slots = lock(&self.inner);
        slots.raw = None;
        slots.annotated = None;
        slots.epoch = slots.epoch.wrapping_add(1);
    }

    /// 标注帧优先, 其次原始帧, 否则等待画面
    pub fn display_frame(&self) -> DisplayFrame {
        let slots = lock(&self.inner);
        if let Some(frame) = &slots.annotated {
            DisplayFrame::Annotated(frame.clone())
        } else if let Some(frame) = &slots.raw {
            DisplayFrame::Raw(frame.clone())
        } else {
            DisplayFrame::Waiting
        }
    }
}

struct CommandSlots {
    motion: Motion,
    speech: Option<Speech>,
}

/// 当前运动指令 + 待投递语音指令 (语音读一次即清空)
#[derive(Clone)]
pub struct CommandStore {
    inner: Arc<Mutex<CommandSlots>>,
}

impl Default for CommandStore {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CommandSlots {
                motion: Motion::Forward,
                speech: None,
            })),
        }
    }
}

impl CommandStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 发布本周期的指令; 没有新语音时保留尚未投递的旧语音
    pub fn publish(&self, motion: Motion, speech: Option<Speech>) {
        let mut slots = lock(&self.inner);
        slots.motion = motion;
        if speech.is_some() {
            slots.speech = speech;
        }
    }

    /// 原子地读取指令并清空语音字段
    pub fn take(&self) -> Command {
        let mut slots = lock(&self.inner);
        Command {
            motion: slots.motion,
            speech: slots.speech.take(),
        }
    }

    /// 只读查看 (不消费语音)
    pub fn peek(&self) -> Command {
        let slots = lock(&self.inner);
        Command {
            motion: slots.motion,
            speech: slots.speech.clone(),
        }
    }
}
