//! 有界LRU缓存
//! Bounded cache evicting the least-recently fetched-or-inserted entry.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

pub struct LruCache<K, V> {
    capacity: usize,
    entries: HashMap<K, (V, u64)>,
    // 使用时间戳 → 键, 最小的即最久未使用
    order: BTreeMap<u64, K>,
    tick: u64,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: BTreeMap::new(),
            tick: 0,
        }
    }

    fn touch(&mut self, key: &K) {
        self.tick += 1;
        let tick = self.tick;
        if let Some((_, stamp)) = self.entries.get_mut(key) {
            self.order.remove(stamp);
            *stamp = tick;
            self.order.insert(tick, key.clone());
        }
    }

    /// 读取并标记为最近使用
    pub fn get(&mut self, key: &K) -> Option<V> {
        if !self.entries.contains_key(key) {
            return None;
        }
        self.touch(key);
        self.entries.get(key).map(|(value, _)| value.clone())
    }

    /// 插入或覆盖, 超出容量时淘汰最久未使用的条目; 返回被淘汰的键
    pub fn put(&mut self, key: K, value: V) -> Vec<K> {
        self.tick += 1;
        let tick = self.tick;
        if let Some((_, stamp)) = self.entries.insert(key.clone(), (value, tick)) {
            self.order.remove(&stamp);
        }
        self.order.insert(tick, key);

        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            match self.order.pop_first() {
                Some((_, oldest)) => {
                    self.entries.remove(&oldest);
                    evicted.push(oldest);
                }
                None => break,
            }
        }
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (value, stamp) = self.entries.remove(key)?;
        self.order.remove(&stamp);
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
