pub mod codec; // 帧编解码适配
pub mod config; // 卫兵配置参数
pub mod detection; // 目标检测与人员槽位
pub mod engine; // 分析与仲裁引擎
pub mod error; // 错误类型
pub mod protocol; // 机器人通信协议
pub mod runtime; // 线程启动与退出
pub mod server; // 视频接收 / 指令发送服务
pub mod speech; // 本机语音播报
pub mod store; // 共享帧/指令存储
pub mod telemetry; // 日志
pub mod vqa; // 视觉问答工作线程

pub use crate::config::{Args, SentinelConfig};
pub use crate::error::{Result, SentinelError};
pub use crate::runtime::{Collaborators, Runtime};

/// 本地时间字符串, 如 `20250101_120000`
pub fn gen_time_string() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// 截图文件名: `<prefix>_YYYYMMDD_HHMMSS.png`
pub fn snapshot_file_name(prefix: &str) -> String {
    format!("{}_{}.png", prefix, gen_time_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_file_name_shape() {
        let name = snapshot_file_name("snap");
        assert!(name.starts_with("snap_"));
        assert!(name.ends_with(".png"));
        // snap_ + 8位日期 + _ + 6位时间 + .png
        assert_eq!(name.len(), "snap_".len() + 8 + 1 + 6 + ".png".len());
    }
}
