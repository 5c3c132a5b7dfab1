/// 检测系统 (Detection System)
///
/// - Detector: 目标检测接口 + 远程HTTP实现
/// - Slots:    按面积排名的人员槽位与每槽位状态
pub mod detector;
pub mod remote;
pub mod slots;
pub mod types;

pub use detector::{filter_detections, Detector, DetectorSpec, RemoteDetector};
pub use remote::InferenceClient;
pub use slots::{rank_persons, PersonSlot, SlotTracker};
pub use types::{BBox, Detection, PersonState};
