/// 分析与仲裁引擎
///
/// - Geometry: 安全裁剪 / 头部区域 / 水平姿态判断
/// - Alert:    优先级仲裁 + 分类冷却
/// - Annotate: 标注帧绘制
/// - Analysis: 主循环
pub mod alert;
pub mod analysis;
pub mod annotate;
pub mod geometry;

pub use alert::{arbitrate, AlertArbiter, AlertLevel, AlertSignals, CooldownGate, Decision};
pub use analysis::{AnalysisEngine, CycleReport};
pub use annotate::{Annotator, Scene};
pub use geometry::{clamp_box, crop_head, crop_safe, head_box, is_horizontal, HeadRegion};
