//! 告警仲裁 + 冷却
//! Strict-priority alert arbitration with per-category announcement cooldowns.
//!
//! 优先级: FIRE > FALLEN > NO_HELMET > PERSON_PRESENT > OBSTACLE > SAFE

use std::fmt;
use std::time::{Duration, Instant};

use crate::protocol::{Motion, Speech, SpeechTag};

/// 告警级别, 声明顺序即优先级 (越靠前越高)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AlertLevel {
    Fire,
    Fallen,
    NoHelmet,
    PersonPresent,
    Obstacle,
    Safe,
}

impl AlertLevel {
    pub const ALL: [AlertLevel; 6] = [
        AlertLevel::Fire,
        AlertLevel::Fallen,
        AlertLevel::NoHelmet,
        AlertLevel::PersonPresent,
        AlertLevel::Obstacle,
        AlertLevel::Safe,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Fire => "FIRE",
            AlertLevel::Fallen => "FALLEN",
            AlertLevel::NoHelmet => "NO_HELMET",
            AlertLevel::PersonPresent => "PERSON_PRESENT",
            AlertLevel::Obstacle => "OBSTACLE",
            AlertLevel::Safe => "SAFE",
        }
    }

    /// 需要播报的危险类别 (受冷却控制)
    pub fn is_hazard(&self) -> bool {
        matches!(self, AlertLevel::Fire | AlertLevel::Fallen | AlertLevel::NoHelmet)
    }

    pub fn motion(&self) -> Motion {
        match self {
            AlertLevel::Fire | AlertLevel::Fallen | AlertLevel::NoHelmet => Motion::Stop,
            AlertLevel::PersonPresent => Motion::Stop,
            AlertLevel::Obstacle => Motion::TurnLeft,
            AlertLevel::Safe => Motion::Forward,
        }
    }

    /// 播报/横幅使用的描述
    pub fn description(&self) -> &'static str {
        match self {
            AlertLevel::Fire => "Fire detected! Stopping immediately!",
            AlertLevel::Fallen => "Emergency! A fallen person has been found!",
            AlertLevel::NoHelmet => "Warning! Safety helmet not worn!",
            AlertLevel::PersonPresent => "Person confirmed (safe). Robot stopping.",
            AlertLevel::Obstacle => "Obstacle detected. Turning to avoid.",
            AlertLevel::Safe => "Patrolling. All clear.",
        }
    }

    /// 危险横幅文字
    pub fn banner_text(&self) -> Option<&'static str> {
        match self {
            AlertLevel::Fire => Some("EMERGENCY: FIRE DETECTED!"),
            AlertLevel::Fallen => Some("EMERGENCY: PERSON FALLEN!"),
            AlertLevel::NoHelmet => Some("WARNING: NO HELMET!"),
            _ => None,
        }
    }

    pub fn speech_tag(&self) -> Option<SpeechTag> {
        match self {
            AlertLevel::Fire | AlertLevel::Fallen => Some(SpeechTag::Alert),
            AlertLevel::NoHelmet => Some(SpeechTag::Warn),
            _ => None,
        }
    }

    fn cooldown_slot(&self) -> Option<usize> {
        match self {
            AlertLevel::Fire => Some(0),
            AlertLevel::Fallen => Some(1),
            AlertLevel::NoHelmet => Some(2),
            _ => None,
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 本周期的原始信号
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertSignals {
    pub fire: bool,
    pub fallen: bool,
    pub no_helmet: bool,
    pub person: bool,
    pub obstacle: bool,
}

/// 取最高优先级的信号
pub fn arbitrate(signals: &AlertSignals) -> AlertLevel {
    if signals.fire {
        AlertLevel::Fire
    } else if signals.fallen {
        AlertLevel::Fallen
    } else if signals.no_helmet {
        AlertLevel::NoHelmet
    } else if signals.person {
        AlertLevel::PersonPresent
    } else if signals.obstacle {
        AlertLevel::Obstacle
    } else {
        AlertLevel::Safe
    }
}

/// 每个危险类别的播报冷却
#[derive(Debug, Clone)]
pub struct CooldownGate {
    interval: Duration,
    last: [Option<Instant>; 3],
}

impl CooldownGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: [None; 3],
        }
    }

    /// 判断本周期是否播报; 非危险级别清零所有计时
    pub fn admit(&mut self, level: AlertLevel, now: Instant) -> bool {
        let Some(slot) = level.cooldown_slot() else {
            self.reset();
            return false;
        };
        let ready = match self.last[slot] {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.interval,
        };
        if ready {
            self.last[slot] = Some(now);
        }
        ready
    }

    pub fn reset(&mut self) {
        self.last = [None; 3];
    }

    /// 三个计时是否都为零
    pub fn is_clear(&self) -> bool {
        self.last.iter().all(Option::is_none)
    }
}

/// 仲裁结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub level: AlertLevel,
    pub motion: Motion,
    /// 通过冷却的播报
    pub speech: Option<Speech>,
}

/// 仲裁器: 纯函数仲裁 + 持久冷却状态
#[derive(Debug, Clone)]
pub struct AlertArbiter {
    gate: CooldownGate,
}

impl AlertArbiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            gate: CooldownGate::new(cooldown),
        }
    }

    pub fn decide(&mut self, signals: &AlertSignals, now: Instant) -> Decision {
        let level = arbitrate(signals);
        let speech = if self.gate.admit(level, now) {
            level
                .speech_tag()
                .map(|tag| Speech::new(tag, level.description()))
        } else {
            None
        };
        Decision {
            level,
            motion: level.motion(),
            speech,
        }
    }

    pub fn gate(&self) -> &CooldownGate {
        &self.gate
    }
}
