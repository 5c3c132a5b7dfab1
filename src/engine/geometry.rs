//! 裁剪与几何判断

use image::RgbImage;

use crate::detection::BBox;

/// 头部区域估计参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadRegion {
    /// 占人框高度的比例
    pub ratio: f32,
    /// 最小高度 (像素)
    pub min_px: u32,
    /// 裁剪时四周外扩 (像素)
    pub pad_px: u32,
}

impl Default for HeadRegion {
    fn default() -> Self {
        Self {
            ratio: 0.28,
            min_px: 20,
            pad_px: 4,
        }
    }
}

/// 宽高比超过阈值视为身体水平 (倒地)
pub fn is_horizontal(bbox: &BBox, ratio: f32) -> bool {
    bbox.aspect_ratio() > ratio
}

/// 把框外扩 `pad` 后夹紧到图像内, 返回 (x, y, w, h); 退化时为 None
///
/// 右/下边界夹到 `w-1`/`h-1`, 与整数像素框的惯例一致。
pub fn clamp_box(bbox: &BBox, pad: u32, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }
    let pad = pad as f32;
    let x1 = (bbox.x1 - pad).max(0.0) as i64;
    let y1 = (bbox.y1 - pad).max(0.0) as i64;
    let x2 = ((bbox.x2 + pad) as i64).min(width as i64 - 1);
    let y2 = ((bbox.y2 + pad) as i64).min(height as i64 - 1);
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some((x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
}

/// 安全裁剪, 退化几何返回 None
pub fn crop_safe(frame: &RgbImage, bbox: &BBox, pad: u32) -> Option<RgbImage> {
    let (x, y, w, h) = clamp_box(bbox, pad, frame.width(), frame.height())?;
    Some(image::imageops::crop_imm(frame, x, y, w, h).to_image())
}

/// 人框顶部的头部区域 (未外扩)
pub fn head_box(person: &BBox, region: &HeadRegion) -> BBox {
    let head_h = (region.ratio * person.height()).floor().max(region.min_px as f32);
    BBox::new(person.x1, person.y1, person.x2, person.y1 + head_h)
}

/// 头部裁剪 (带外扩)
pub fn crop_head(frame: &RgbImage, person: &BBox, region: &HeadRegion) -> Option<RgbImage> {
    crop_safe(frame, &head_box(person, region), region.pad_px)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_inside_image() {
        let b = BBox::new(-10.0, -5.0, 700.0, 500.0);
        assert_eq!(clamp_box(&b, 0, 640, 480), Some((0, 0, 639, 479)));
    }

    #[test]
    fn test_degenerate_box_rejected() {
        let outside = BBox::new(650.0, 10.0, 700.0, 50.0);
        assert!(clamp_box(&outside, 0, 640, 480).is_none());
        let flat = BBox::new(10.0, 10.0, 50.0, 10.0);
        assert!(clamp_box(&flat, 0, 640, 480).is_none());
        assert!(clamp_box(&flat, 0, 0, 0).is_none());
    }

    #[test]
    fn test_head_region_uses_ratio_or_minimum() {
        let region = HeadRegion::default();
        let tall = BBox::new(100.0, 50.0, 160.0, 250.0);
        assert_eq!(head_box(&tall, &region).y2, 50.0 + 56.0);

        let short = BBox::new(100.0, 50.0, 160.0, 90.0);
        assert_eq!(head_box(&short, &region).y2, 50.0 + 20.0);
    }

    #[test]
    fn test_head_crop_is_padded() {
        let frame = RgbImage::new(640, 480);
        let person = BBox::new(100.0, 50.0, 160.0, 250.0);
        let head = crop_head(&frame, &person, &HeadRegion::default()).unwrap();
        assert_eq!(head.dimensions(), (68, 64));
    }

    #[test]
    fn test_horizontal_threshold() {
        assert!(is_horizontal(&BBox::new(0.0, 0.0, 190.0, 100.0), 1.8));
        assert!(!is_horizontal(&BBox::new(0.0, 0.0, 180.0, 100.0), 1.8));
    }
}
