//! 日志初始化
//! Tracing subscriber setup for the binaries.

use tracing_subscriber::{fmt, EnvFilter};

/// 安装全局fmt订阅者; RUST_LOG 优先于 `default_level`
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .with_timer(fmt::time::uptime())
        .try_init();
}

/// 每秒速率统计 (接收帧率 / 分析周期率)
#[derive(Debug)]
pub struct RateMeter {
    count: u64,
    since: std::time::Instant,
}

impl RateMeter {
    pub fn new() -> Self {
        Self {
            count: 0,
            since: std::time::Instant::now(),
        }
    }

    /// 计数一次; 满1秒时返回该窗口的速率并重新计时
    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(std::time::Instant::now())
    }

    pub fn tick_at(&mut self, now: std::time::Instant) -> Option<f64> {
        self.count += 1;
        let elapsed = now.saturating_duration_since(self.since);
        if elapsed.as_secs_f64() < 1.0 {
            return None;
        }
        let rate = self.count as f64 / elapsed.as_secs_f64();
        self.count = 0;
        self.since = now;
        Some(rate)
    }
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_rate_meter_reports_once_per_second() {
        let start = Instant::now();
        let mut meter = RateMeter {
            count: 0,
            since: start,
        };
        for i in 1..10 {
            assert!(meter.tick_at(start + Duration::from_millis(i * 100)).is_none());
        }
        let rate = meter.tick_at(start + Duration::from_secs(1)).unwrap();
        assert!((rate - 10.0).abs() < 1e-6);
        assert!(meter.tick_at(start + Duration::from_millis(1100)).is_none());
    }
}
