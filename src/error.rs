//! 错误类型定义
//! Error types for the safety sentinel

use thiserror::Error;

/// 卫兵系统错误类型
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("frame payload of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    #[error("frame decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("frame has degenerate size {width}x{height}")]
    EmptyFrame { width: u32, height: u32 },

    #[error("remote inference failed: {0}")]
    Inference(String),

    #[error("speech engine unavailable: {0}")]
    SpeechUnavailable(String),

    #[error("invalid command line: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for sentinel operations
pub type Result<T> = std::result::Result<T, SentinelError>;
