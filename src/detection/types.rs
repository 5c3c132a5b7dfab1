/// 检测数据结构定义
/// Data structures shared by detectors, slot tracking and annotation

use serde::Deserialize;

// ========== 公共常量 ==========

/// COCO "person" 类别
pub const PERSON_CLASS: u32 = 0;

// ========== 数据结构 ==========

/// 检测框, 像素坐标 (x1,y1) 左上, (x2,y2) 右下
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// 宽高比 w/h, 高度为0时不会除零
    pub fn aspect_ratio(&self) -> f32 {
        self.width() / (self.height() + 1e-6)
    }
}

/// 一个检测结果
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub class_id: u32,
    #[serde(default)]
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BBox, class_id: u32, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            label: label.into(),
            confidence,
        }
    }
}

/// 每个槽位的语义状态 (由VQA结果和几何判断合成)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PersonState {
    pub is_fallen: bool,
    pub no_helmet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_geometry() {
        let b = BBox::new(10.0, 20.0, 110.0, 70.0);
        assert_eq!(b.width(), 100.0);
        assert_eq!(b.height(), 50.0);
        assert_eq!(b.area(), 5000.0);
        assert!((b.aspect_ratio() - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_degenerate_bbox() {
        let flat = BBox::new(0.0, 5.0, 40.0, 5.0);
        assert_eq!(flat.area(), 0.0);
        assert!(flat.aspect_ratio() > 1.8);
        let inverted = BBox::new(10.0, 10.0, 5.0, 5.0);
        assert_eq!(inverted.width(), 0.0);
    }

    #[test]
    fn test_detection_from_json() {
        let json = r#"{"bbox":{"x1":1,"y1":2,"x2":3,"y2":4},"class_id":0,"confidence":0.9}"#;
        let det: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(det.class_id, PERSON_CLASS);
        assert!(det.label.is_empty());
    }
}
