//! 帧编解码适配器
//! Frame codec adapter: opaque compressed payloads ⇄ RGB frames.

use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::error::{Result, SentinelError};

/// 已解码的原始帧 (写入后不可变,读者共享Arc)
pub type RawFrame = Arc<RgbImage>;

/// 解码一帧负载 (JPEG/PNG等 image 支持的格式)
pub fn decode_frame(payload: &[u8]) -> Result<RgbImage> {
    let img = image::load_from_memory(payload)?.to_rgb8();
    if img.width() == 0 || img.height() == 0 {
        return Err(SentinelError::EmptyFrame {
            width: img.width(),
            height: img.height(),
        });
    }
    Ok(img)
}

/// 编码为JPEG (推理上传 / 机器人模拟推流)
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity((frame.width() * frame.height()) as usize / 4);
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder.encode_image(frame)?;
    Ok(buf)
}
