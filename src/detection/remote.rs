//! HTTP推理服务客户端
//! Thin ureq client shared by the remote detector and the remote VQA oracle.
//!
//! 协议: `POST <endpoint>` 上传JPEG (Content-Type: image/jpeg), 返回JSON;
//! `GET <endpoint>/health` 返回 2xx 表示模型已加载。

use std::time::Duration;

use anyhow::Context;
use image::RgbImage;

use crate::codec::encode_jpeg;
use crate::error::SentinelError;

pub struct InferenceClient {
    agent: ureq::Agent,
    endpoint: String,
    jpeg_quality: u8,
}

impl InferenceClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration, jpeg_quality: u8) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            endpoint: endpoint.into(),
            jpeg_quality,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.endpoint.trim_end_matches('/'))
    }

    /// 启动探测, 失败即为致命启动错误
    pub fn health(&self) -> anyhow::Result<()> {
        let url = self.health_url();
        self.agent
            .get(&url)
            .call()
            .with_context(|| format!("推理服务不可用: {}", url))?;
        Ok(())
    }

    /// 上传一张图片 (可附带查询参数), 返回响应正文
    pub fn post_image(&self, image: &RgbImage, query: &[(&str, &str)]) -> anyhow::Result<String> {
        let jpeg = encode_jpeg(image, self.jpeg_quality)?;
        let mut request = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "image/jpeg");
        for (key, value) in query {
            request = request.query(key, value);
        }
        let response = request
            .send_bytes(&jpeg)
            .map_err(|e| SentinelError::Inference(format!("{}: {}", self.endpoint, e)))?;
        let body = response
            .into_string()
            .with_context(|| format!("读取推理响应失败: {}", self.endpoint))?;
        Ok(body)
    }
}
