//! 按面积排名的人员槽位
//! Rank-based person slots: slot 0 is always the largest person of the current frame.
//!
//! 槽位身份是位置性的, 不是跨帧目标身份。

use std::collections::HashMap;
use std::ops::Range;

use super::types::{BBox, Detection, PersonState};

/// 本周期的一个人员槽位
#[derive(Clone, Debug, PartialEq)]
pub struct PersonSlot {
    pub index: usize,
    pub bbox: BBox,
    pub area: f32,
    pub confidence: f32,
}

/// 按面积降序排列并取前 `top_k` 个
pub fn rank_persons(persons: &[Detection], top_k: usize) -> Vec<PersonSlot> {
    let mut ranked: Vec<&Detection> = persons.iter().collect();
    // 稳定排序: 面积相同的人保持检测顺序
    ranked.sort_by(|a, b| b.bbox.area().total_cmp(&a.bbox.area()));
    ranked
        .into_iter()
        .take(top_k)
        .enumerate()
        .map(|(index, det)| PersonSlot {
            index,
            bbox: det.bbox,
            area: det.bbox.area(),
            confidence: det.confidence,
        })
        .collect()
}

/// 槽位 + 每槽位持久状态
pub struct SlotTracker {
    top_k: usize,
    slots: Vec<PersonSlot>,
    states: HashMap<usize, PersonState>,
    // 最近一次 update 空出的槽位
    vacated: Range<usize>,
}

impl SlotTracker {
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k,
            slots: Vec::with_capacity(top_k),
            states: HashMap::new(),
            vacated: 0..0,
        }
    }

    /// 用本帧的人员检测更新槽位
    ///
    /// 本帧没有对应检测的槽位, 其状态被删除。
    pub fn update(&mut self, persons: &[Detection]) -> &[PersonSlot] {
        let previous = self.slots.len();
        self.slots = rank_persons(persons, self.top_k);
        let active = self.slots.len();
        self.vacated = active..previous.max(active);
        self.states.retain(|index, _| *index < active);
        &self.slots
    }

    /// 上一次 `update` 中由占用变为空闲的槽位
    pub fn vacated(&self) -> Range<usize> {
        self.vacated.clone()
    }

    /// 清除所有槽位和状态; 返回被清空的槽位
    pub fn reset(&mut self) -> Range<usize> {
        let vacated = 0..self.slots.len();
        self.slots.clear();
        self.states.clear();
        self.vacated = 0..0;
        vacated
    }

    pub fn track_count(&self) -> usize {
        self.slots.len()
    }

    /// 槽位状态, 尚无结果时为默认值 (未倒地 / 佩戴安全帽)
    pub fn state(&self, index: usize) -> PersonState {
        self.states.get(&index).copied().unwrap_or_default()
    }

    /// 写入槽位状态, 不存在的槽位忽略
    pub fn set_state(&mut self, index: usize, state: PersonState) {
        if index < self.slots.len() {
            self.states.insert(index, state);
        }
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn person(w: f32, h: f32) -> Detection {
        Detection::new(BBox::new(0.0, 0.0, w, h), 0, "person", 0.9)
    }

    #[test]
    fn test_rank_by_area_descending() {
        let persons = vec![person(10.0, 10.0), person(40.0, 40.0), person(20.0, 20.0), person(5.0, 5.0)];
        let slots = rank_persons(&persons, 3);
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0].area, 1600.0);
        assert_eq!(slots[1].area, 400.0);
        assert_eq!(slots[2].area, 100.0);
        assert_eq!(
            slots.iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_vanished_slot_loses_state() {
        let mut tracker = SlotTracker::new(3);
        tracker.update(&[person(10.0, 10.0), person(20.0, 20.0), person(30.0, 30.0)]);
        tracker.set_state(
            2,
            PersonState {
                is_fallen: true,
                no_helmet: true,
            },
        );
        assert_eq!(tracker.state_count(), 1);

        // 只剩两个人: 槽位2的状态不能遗留
        tracker.update(&[person(10.0, 10.0), person(20.0, 20.0)]);
        assert_eq!(tracker.state_count(), 0);
        assert_eq!(tracker.state(2), PersonState::default());

        // 同一个人重新出现时从默认状态开始
        tracker.update(&[person(10.0, 10.0), person(20.0, 20.0), person(30.0, 30.0)]);
        assert!(!tracker.state(2).is_fallen);
    }

    #[test]
    fn test_vacated_slots_reported() {
        let mut tracker = SlotTracker::new(3);
        tracker.update(&[person(10.0, 10.0), person(20.0, 20.0), person(30.0, 30.0)]);
        assert!(tracker.vacated().is_empty());

        tracker.update(&[person(10.0, 10.0)]);
        assert_eq!(tracker.vacated(), 1..3);

        tracker.update(&[person(10.0, 10.0), person(20.0, 20.0)]);
        assert!(tracker.vacated().is_empty());
    }

    #[test]
    fn test_set_state_ignores_inactive_slot() {
        let mut tracker = SlotTracker::new(3);
        tracker.update(&[person(10.0, 10.0)]);
        tracker.set_state(1, PersonState { is_fallen: true, no_helmet: false });
        assert_eq!(tracker.state_count(), 0);
    }

    #[test]
    fn test_random_cycles_never_leak_state() {
        let mut rng = rand::thread_rng();
        let mut tracker = SlotTracker::new(3);
        for _ in 0..500 {
            let n = rng.gen_range(0..6);
            let persons: Vec<Detection> = (0..n)
                .map(|_| person(rng.gen_range(1.0..200.0), rng.gen_range(1.0..200.0)))
                .collect();
            tracker.update(&persons);
            for slot in 0..3 {
                if rng.gen_bool(0.5) {
                    tracker.set_state(slot, PersonState { is_fallen: true, no_helmet: rng.gen() });
                }
            }
            assert!(tracker.track_count() <= 3);
            assert!(tracker.state_count() <= tracker.track_count());

            let next = rng.gen_range(0..6);
            let persons: Vec<Detection> = (0..next).map(|_| person(5.0, 5.0)).collect();
            tracker.update(&persons);
            for index in tracker.track_count()..3 {
                assert!(!tracker.states.contains_key(&index));
            }
        }
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut tracker = SlotTracker::new(2);
        tracker.update(&[person(10.0, 10.0)]);
        tracker.set_state(0, PersonState { is_fallen: true, no_helmet: false });
        assert_eq!(tracker.reset(), 0..1);
        assert_eq!(tracker.track_count(), 0);
        assert_eq!(tracker.state_count(), 0);
    }
}
