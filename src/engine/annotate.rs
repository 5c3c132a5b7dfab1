//! 标注渲染 (检测框 / 半透明覆盖 / 顶部横幅)

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{info, warn};

use super::alert::AlertLevel;
use crate::detection::{BBox, Detection};

const FIRE_COLOR: Rgb<u8> = Rgb([255, 165, 0]);
const PERSON_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const OBSTACLE_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const OTHER_COLOR: Rgb<u8> = Rgb([200, 200, 200]);
const ALERT_BANNER: Rgb<u8> = Rgb([255, 0, 0]);
const ALERT_TEXT: Rgb<u8> = Rgb([255, 255, 0]);
const SAFE_BANNER: Rgb<u8> = Rgb([128, 128, 128]);
const SAFE_TEXT: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_TEXT: Rgb<u8> = Rgb([255, 255, 255]);

pub const BANNER_HEIGHT: u32 = 80;

/// 字体候选 (按顺序尝试)
const FONT_CANDIDATES: &[&str] = &[
    "assets/font/msyh.ttc",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/noto/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
    "C:\\Windows\\Fonts\\malgun.ttf",
    "/System/Library/Fonts/AppleSDGothicNeo.ttc",
];

/// 一个周期需要绘制的内容
#[derive(Debug, Default, Clone)]
pub struct Scene {
    pub fire: Vec<Detection>,
    pub persons: Vec<Detection>,
    pub obstacles: Vec<Detection>,
    /// 绘制但不参与决策
    pub others: Vec<Detection>,
    /// 槽位标签 (槽位框, 文字)
    pub slot_labels: Vec<(BBox, String)>,
}

pub struct Annotator {
    font: Option<FontArc>,
}

impl Annotator {
    /// 优先使用配置的字体, 否则按候选列表查找; 都失败时只画图形
    pub fn new(font_path: Option<&str>) -> Self {
        let font = font_path
            .into_iter()
            .chain(FONT_CANDIDATES.iter().copied())
            .find_map(load_font);
        Self { font }
    }

    #[cfg(test)]
    pub(crate) fn without_font() -> Self {
        Self { font: None }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 在原始帧的副本上绘制, 原始帧保持不变
    pub fn render(&self, frame: &RgbImage, scene: &Scene, level: AlertLevel) -> RgbImage {
        let mut out = frame.clone();

        for det in &scene.others {
            draw_box(&mut out, &det.bbox, OTHER_COLOR, 1);
        }
        for det in &scene.persons {
            fill_translucent(&mut out, &det.bbox, PERSON_COLOR, 0.1);
            draw_box(&mut out, &det.bbox, PERSON_COLOR, 2);
        }
        for det in &scene.obstacles {
            fill_translucent(&mut out, &det.bbox, OBSTACLE_COLOR, 0.1);
            draw_box(&mut out, &det.bbox, OBSTACLE_COLOR, 2);
        }
        for det in &scene.fire {
            fill_translucent(&mut out, &det.bbox, FIRE_COLOR, 0.4);
            draw_box(&mut out, &det.bbox, FIRE_COLOR, 3);
        }

        if let Some(font) = &self.font {
            for (bbox, label) in &scene.slot_labels {
                let y = (bbox.y2 as i32 - 18).max(0);
                draw_text_mut(&mut out, LABEL_TEXT, bbox.x1.max(0.0) as i32 + 2, y, PxScale::from(16.0), font, label);
            }
        }

        self.draw_banner(&mut out, level);
        out
    }

    fn draw_banner(&self, img: &mut RgbImage, level: AlertLevel) {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return;
        }
        let banner_h = BANNER_HEIGHT.min(height);

        let (background, text_color, text, scale) = match level.banner_text() {
            Some(text) => (ALERT_BANNER, ALERT_TEXT, text, 34.0),
            None => (SAFE_BANNER, SAFE_TEXT, level.description(), 30.0),
        };
        draw_filled_rect_mut(img, Rect::at(0, 0).of_size(width, banner_h), background);

        if let Some(font) = &self.font {
            draw_text_mut(img, text_color, 15, 22, PxScale::from(scale), font, text);
        }
    }
}

fn load_font(path: &str) -> Option<FontArc> {
    if !Path::new(path).exists() {
        return None;
    }
    let bytes = std::fs::read(path).ok()?;
    match FontArc::try_from_vec(bytes) {
        Ok(font) => {
            info!("✅ 字体加载成功: {}", path);
            Some(font)
        }
        Err(e) => {
            warn!("⚠️  字体加载失败 {}: {}", path, e);
            None
        }
    }
}

/// 框内像素按 alpha 混合
fn fill_translucent(img: &mut RgbImage, bbox: &BBox, color: Rgb<u8>, alpha: f32) {
    let (width, height) = img.dimensions();
    let x1 = bbox.x1.max(0.0) as u32;
    let y1 = bbox.y1.max(0.0) as u32;
    let x2 = (bbox.x2.max(0.0) as u32).min(width);
    let y2 = (bbox.y2.max(0.0) as u32).min(height);

    for y in y1..y2 {
        for x in x1..x2 {
            let px = img.get_pixel_mut(x, y);
            for c in 0..3 {
                let blended = color.0[c] as f32 * alpha + px.0[c] as f32 * (1.0 - alpha);
                px.0[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// 向内加粗的空心框
fn draw_box(img: &mut RgbImage, bbox: &BBox, color: Rgb<u8>, thickness: u32) {
    let x = bbox.x1 as i32;
    let y = bbox.y1 as i32;
    let w = bbox.width() as i32;
    let h = bbox.height() as i32;

    for t in 0..thickness as i32 {
        let (rw, rh) = (w - 2 * t, h - 2 * t);
        if rw < 1 || rh < 1 {
            break;
        }
        draw_hollow_rect_mut(img, Rect::at(x + t, y + t).of_size(rw as u32, rh as u32), color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> RgbImage {
        RgbImage::from_pixel(320, 240, Rgb([0, 0, 0]))
    }

    fn det(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection::new(BBox::new(x1, y1, x2, y2), 0, "x", 0.9)
    }

    #[test]
    fn test_banner_color_follows_level() {
        let annotator = Annotator::without_font();
        let scene = Scene::default();

        let fire = annotator.render(&frame(), &scene, AlertLevel::Fire);
        assert_eq!(fire.get_pixel(5, 5), &ALERT_BANNER);
        assert_eq!(fire.get_pixel(5, 100), &Rgb([0, 0, 0]));

        let safe = annotator.render(&frame(), &scene, AlertLevel::Obstacle);
        assert_eq!(safe.get_pixel(5, 5), &SAFE_BANNER);
    }

    #[test]
    fn test_fire_overlay_is_translucent() {
        let annotator = Annotator::without_font();
        let scene = Scene {
            fire: vec![det(100.0, 120.0, 200.0, 220.0)],
            ..Scene::default()
        };
        let src = frame();
        let out = annotator.render(&src, &scene, AlertLevel::Fire);

        // 框内部: 0.4 * 橙色
        assert_eq!(out.get_pixel(150, 170), &Rgb([102, 66, 0]));
        // 边框
        assert_eq!(out.get_pixel(100, 170), &FIRE_COLOR);
        // 原始帧不被修改
        assert_eq!(src.get_pixel(150, 170), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_boxes_outside_frame_are_safe() {
        let annotator = Annotator::without_font();
        let scene = Scene {
            persons: vec![det(-50.0, -50.0, 1000.0, 1000.0), det(10.0, 10.0, 10.0, 10.0)],
            obstacles: vec![det(400.0, 300.0, 500.0, 400.0)],
            ..Scene::default()
        };
        let out = annotator.render(&frame(), &scene, AlertLevel::PersonPresent);
        assert_eq!(out.dimensions(), (320, 240));
    }

    #[test]
    fn test_tiny_frame_gets_clipped_banner() {
        let annotator = Annotator::without_font();
        let out = annotator.render(&RgbImage::new(4, 4), &Scene::default(), AlertLevel::Safe);
        assert_eq!(out.get_pixel(3, 3), &SAFE_BANNER);
    }
}
