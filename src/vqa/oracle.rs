//! VQA问答模型接口
//! Vision question answering oracle: image crop + yes/no question → free text.

use std::borrow::Cow;

use anyhow::Context;
use fast_image_resize as fr;
use image::RgbImage;
use serde::Deserialize;
use tracing::info;

use crate::detection::InferenceClient;

pub trait VqaOracle: Send {
    fn warm_up(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn ask(&mut self, image: &RgbImage, question: &str) -> anyhow::Result<String>;
}

/// 缩放使最长边不超过 `max_side`, 已满足时不复制
pub fn limit_side(image: &RgbImage, max_side: u32) -> anyhow::Result<Cow<'_, RgbImage>> {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if max_side == 0 || longest <= max_side {
        return Ok(Cow::Borrowed(image));
    }

    let scale = max_side as f32 / longest as f32;
    let dst_w = ((width as f32 * scale).round() as u32).clamp(1, max_side);
    let dst_h = ((height as f32 * scale).round() as u32).clamp(1, max_side);

    let src = fr::images::Image::from_vec_u8(width, height, image.as_raw().clone(), fr::PixelType::U8x3)
        .context("构建缩放源图像失败")?;
    let mut dst = fr::images::Image::new(dst_w, dst_h, fr::PixelType::U8x3);

    let mut resizer = fr::Resizer::new();
    resizer
        .resize(
            &src,
            &mut dst,
            &fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )
        .context("缩放失败")?;

    let resized = RgbImage::from_raw(dst_w, dst_h, dst.into_vec())
        .context("缩放结果尺寸不匹配")?;
    Ok(Cow::Owned(resized))
}

#[derive(Deserialize)]
struct AnswerResponse {
    answer: String,
}

/// 远程HTTP VQA模型
pub struct RemoteVqaOracle {
    client: InferenceClient,
    max_side: u32,
}

impl RemoteVqaOracle {
    pub fn new(client: InferenceClient, max_side: u32) -> Self {
        Self { client, max_side }
    }
}

impl VqaOracle for RemoteVqaOracle {
    fn warm_up(&mut self) -> anyhow::Result<()> {
        self.client.health().context("VQA模型预热失败")?;
        info!("✅ VQA模型就绪: {}", self.client.endpoint());
        Ok(())
    }

    fn ask(&mut self, image: &RgbImage, question: &str) -> anyhow::Result<String> {
        let image = limit_side(image, self.max_side)?;
        let body = self.client.post_image(&image, &[("question", question)])?;
        let response: AnswerResponse =
            serde_json::from_str(&body).context("VQA模型返回无效JSON")?;
        Ok(response.answer)
    }
}
