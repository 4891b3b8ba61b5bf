use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;

/// Queue keys are small copyable identifiers; the kernel uses a
/// `(tag, host_index)` enum so at-most-one-per-host events are unique by
/// construction.
pub trait QueueKey: Copy + Eq + Hash + fmt::Debug {}
impl<T: Copy + Eq + Hash + fmt::Debug> QueueKey for T {}

const TOL: f64 = 1e-10;

#[derive(Clone, Copy, Debug)]
struct Entry<K> {
    t: f64,
    seq: u64,
    key: K,
}

impl<K> Entry<K> {
    fn precedes(&self, other: &Self) -> bool {
        self.t < other.t || (self.t == other.t && self.seq < other.seq)
    }
}

/// Priority queue keyed by simulation time with FIFO tie-break on insertion
/// order. Both implementations share the same contract; the calendar queue is
/// faster for this workload, the heap uses predictable memory.
pub enum EventQueue<K: QueueKey> {
    Calendar(CalendarQueue<K>),
    Heap(HeapQueue<K>),
}

impl<K: QueueKey> EventQueue<K> {
    pub fn calendar(t_min: f64, min_bucket_width: f64) -> Self {
        EventQueue::Calendar(CalendarQueue::new(t_min, 1.0, min_bucket_width))
    }

    pub fn heap() -> Self {
        EventQueue::Heap(HeapQueue::new())
    }

    pub fn len(&self) -> usize {
        match self {
            EventQueue::Calendar(q) => q.len(),
            EventQueue::Heap(q) => q.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: K) -> bool {
        match self {
            EventQueue::Calendar(q) => q.contains(key),
            EventQueue::Heap(q) => q.contains(key),
        }
    }

    pub fn get_time(&self, key: K) -> Option<f64> {
        match self {
            EventQueue::Calendar(q) => q.get_time(key),
            EventQueue::Heap(q) => q.get_time(key),
        }
    }

    pub fn add(&mut self, key: K, t: f64) {
        match self {
            EventQueue::Calendar(q) => q.add(key, t),
            EventQueue::Heap(q) => q.add(key, t),
        }
    }

    pub fn update(&mut self, key: K, t: f64) {
        match self {
            EventQueue::Calendar(q) => q.update(key, t),
            EventQueue::Heap(q) => q.update(key, t),
        }
    }

    pub fn add_or_update(&mut self, key: K, t: f64) {
        if self.contains(key) {
            self.update(key, t);
        } else {
            self.add(key, t);
        }
    }

    pub fn remove(&mut self, key: K) {
        match self {
            EventQueue::Calendar(q) => q.remove(key),
            EventQueue::Heap(q) => q.remove(key),
        }
    }

    pub fn remove_if_present(&mut self, key: K) {
        if self.contains(key) {
            self.remove(key);
        }
    }

    pub fn peek(&self) -> Option<(K, f64)> {
        match self {
            EventQueue::Calendar(q) => q.peek(),
            EventQueue::Heap(q) => q.peek(),
        }
    }

    pub fn pop(&mut self) -> Option<(K, f64)> {
        match self {
            EventQueue::Calendar(q) => q.pop(),
            EventQueue::Heap(q) => q.pop(),
        }
    }

    /// Current bucket width of the calendar variant, for progress logging.
    pub fn bucket_width(&self) -> Option<f64> {
        match self {
            EventQueue::Calendar(q) => Some(q.bucket_width()),
            EventQueue::Heap(_) => None,
        }
    }

    pub fn verify(&self) {
        match self {
            EventQueue::Calendar(q) => q.verify(),
            EventQueue::Heap(q) => q.verify(),
        }
    }
}

/// Calendar queue: a vector of fixed-width time buckets starting at `t_min`,
/// each holding entries sorted by `(time, insertion)`. A key-to-bucket map
/// gives O(1) resolution for keyed update and removal; bucket operations are
/// O(bucket size).
///
/// Two adaptive maintenance passes keep the structure matched to the
/// workload: a cheap resize drops consumed buckets from the front once the
/// pop cursor has passed the halfway point, and a rescale rebuilds the
/// buckets at a new width when the observed mean inter-event interval drifts
/// away from the current width by more than a factor of two.
pub struct CalendarQueue<K: QueueKey> {
    t_min: f64,
    t: f64,
    bucket_width: f64,
    min_bucket_width: f64,
    n_events_rescale: u64,
    dt_sum: f64,
    n_events: u64,
    cur_step: usize,
    cal: Vec<VecDeque<Entry<K>>>,
    index: HashMap<K, usize>,
    step_offset: usize,
    counter: u64,
    len: usize,
}

impl<K: QueueKey> CalendarQueue<K> {
    pub const DEFAULT_N_EVENTS_RESCALE: u64 = 1_000_000;

    pub fn new(t_min: f64, bucket_width: f64, min_bucket_width: f64) -> Self {
        assert!(
            bucket_width > min_bucket_width,
            "initial bucket width {bucket_width} must exceed the minimum {min_bucket_width}"
        );
        Self {
            t_min,
            t: t_min,
            bucket_width,
            min_bucket_width,
            n_events_rescale: Self::DEFAULT_N_EVENTS_RESCALE,
            dt_sum: 0.0,
            n_events: 0,
            cur_step: 0,
            cal: Vec::new(),
            index: HashMap::new(),
            step_offset: 0,
            counter: 0,
            len: 0,
        }
    }

    /// Override how many pops pass between rescale checks.
    pub fn with_rescale_interval(mut self, n_events: u64) -> Self {
        assert!(n_events > 0);
        self.n_events_rescale = n_events;
        self
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket_width(&self) -> f64 {
        self.bucket_width
    }

    /// Time of the most recently popped entry.
    pub fn current_time(&self) -> f64 {
        self.t
    }

    pub fn contains(&self, key: K) -> bool {
        self.index.contains_key(&key)
    }

    pub fn get_time(&self, key: K) -> Option<f64> {
        let step = *self.index.get(&key)? - self.step_offset;
        self.cal[step].iter().find(|e| e.key == key).map(|e| e.t)
    }

    fn step_for(&self, t: f64) -> usize {
        ((t - self.t_min) / self.bucket_width) as usize
    }

    pub fn add(&mut self, key: K, t: f64) {
        let mut rescaled = false;
        if (self.n_events + 1) % self.n_events_rescale == 0 {
            rescaled = self.rescale();
        }
        if !rescaled && self.cur_step > self.cal.len() / 2 {
            self.resize();
        }

        assert!(
            !self.index.contains_key(&key),
            "duplicate queue key {key:?}"
        );
        assert!(t >= self.t_min, "event time {t} precedes queue origin {}", self.t_min);

        let step = self.step_for(t);
        assert!(step >= self.cur_step, "event time {t} precedes the pop cursor");

        self.index.insert(key, step + self.step_offset);
        let seq = self.counter;
        self.counter += 1;
        self.insert_entry(step, Entry { t, seq, key });
        self.len += 1;
    }

    fn insert_entry(&mut self, step: usize, entry: Entry<K>) {
        while self.cal.len() <= step {
            self.cal.push(VecDeque::new());
        }
        let bucket = &mut self.cal[step];
        let pos = bucket.partition_point(|e| e.precedes(&entry));
        bucket.insert(pos, entry);
    }

    pub fn remove(&mut self, key: K) {
        let step = self
            .index
            .remove(&key)
            .unwrap_or_else(|| panic!("removing absent queue key {key:?}"))
            - self.step_offset;
        let bucket = &mut self.cal[step];
        let pos = bucket
            .iter()
            .position(|e| e.key == key)
            .expect("bucket index out of sync with bucket contents");
        bucket.remove(pos).expect("bucket entry vanished");
        self.len -= 1;
    }

    pub fn remove_if_present(&mut self, key: K) {
        if self.contains(key) {
            self.remove(key);
        }
    }

    pub fn update(&mut self, key: K, t: f64) {
        let old_step = self
            .index
            .get(&key)
            .copied()
            .unwrap_or_else(|| panic!("updating absent queue key {key:?}"))
            - self.step_offset;
        let new_step = self.step_for(t);
        assert!(new_step >= self.cur_step, "event time {t} precedes the pop cursor");

        let bucket = &mut self.cal[old_step];
        let pos = bucket
            .iter()
            .position(|e| e.key == key)
            .expect("bucket index out of sync with bucket contents");
        bucket.remove(pos).expect("bucket entry vanished");

        let seq = self.counter;
        self.counter += 1;
        self.insert_entry(new_step, Entry { t, seq, key });
        self.index.insert(key, new_step + self.step_offset);
    }

    pub fn add_or_update(&mut self, key: K, t: f64) {
        if self.contains(key) {
            self.update(key, t);
        } else {
            self.add(key, t);
        }
    }

    pub fn peek(&self) -> Option<(K, f64)> {
        if self.len == 0 {
            return None;
        }
        self.cal[self.cur_step..]
            .iter()
            .find_map(|bucket| bucket.front().map(|e| (e.key, e.t)))
    }

    pub fn pop(&mut self) -> Option<(K, f64)> {
        if self.len == 0 {
            return None;
        }
        loop {
            match self.cal[self.cur_step].pop_front() {
                None => self.cur_step += 1,
                Some(entry) => {
                    assert!(entry.t >= self.t, "pop time went backwards");
                    self.dt_sum += entry.t - self.t;
                    self.n_events += 1;
                    self.t = entry.t;
                    self.index.remove(&entry.key);
                    self.len -= 1;
                    return Some((entry.key, entry.t));
                }
            }
        }
    }

    /// Drop consumed buckets from the front, shifting the origin so existing
    /// key-to-bucket handles stay valid.
    fn resize(&mut self) -> bool {
        if self.cur_step == 0 {
            return false;
        }
        self.cal.drain(..self.cur_step);
        self.t_min += self.bucket_width * self.cur_step as f64;
        self.step_offset += self.cur_step;
        self.cur_step = 0;
        true
    }

    /// Rebuild the buckets at a width of twice the observed mean inter-event
    /// interval, clamped below by `min_bucket_width`. Skipped while the
    /// target stays within a factor of two of the current width. Live entries
    /// keep their `(time, insertion)` pairs, so ordering is unchanged.
    fn rescale(&mut self) -> bool {
        let dt_mean = self.dt_sum / self.n_events as f64;
        let target_width = (dt_mean * 2.0).max(self.min_bucket_width);

        self.dt_sum = 0.0;
        self.n_events = 0;

        if target_width > 0.5 * self.bucket_width && target_width < 2.0 * self.bucket_width {
            return false;
        }

        let old_cal = std::mem::take(&mut self.cal);
        self.bucket_width = target_width;
        self.t_min = self.t;
        self.cur_step = 0;
        self.step_offset = 0;
        self.index.clear();

        // Old buckets cover strictly increasing time windows and are sorted
        // internally, so iterating them yields entries in (t, seq) order and
        // pushing to the back of each new bucket keeps them sorted.
        for entry in old_cal.into_iter().flatten() {
            let step = self.step_for(entry.t);
            self.index.insert(entry.key, step);
            while self.cal.len() <= step {
                self.cal.push(VecDeque::new());
            }
            self.cal[step].push_back(entry);
        }
        true
    }

    pub fn verify(&self) {
        let mut total = 0;
        for (step, bucket) in self.cal.iter().enumerate() {
            if step < self.cur_step {
                assert!(bucket.is_empty(), "consumed bucket {step} is not empty");
                continue;
            }
            let t_lo = self.t_min + self.bucket_width * step as f64 - TOL;
            let t_hi = self.t_min + self.bucket_width * (step + 1) as f64 + TOL;
            let mut prev: Option<&Entry<K>> = None;
            for entry in bucket {
                assert!(
                    entry.t >= t_lo && entry.t < t_hi,
                    "entry {:?} at t = {} outside bucket {step} window",
                    entry.key,
                    entry.t
                );
                if let Some(p) = prev {
                    assert!(p.precedes(entry), "bucket {step} out of order");
                }
                assert_eq!(
                    self.index.get(&entry.key),
                    Some(&(step + self.step_offset)),
                    "index out of sync for {:?}",
                    entry.key
                );
                prev = Some(entry);
                total += 1;
            }
        }
        assert_eq!(total, self.len, "entry count does not match len");
        assert_eq!(self.index.len(), self.len, "index size does not match len");
    }
}

/// Indexed binary min-heap over `(time, insertion)` with a key-to-slot map
/// for keyed update and removal.
pub struct HeapQueue<K: QueueKey> {
    heap: Vec<Entry<K>>,
    index: HashMap<K, usize>,
    counter: u64,
}

impl<K: QueueKey> Default for HeapQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: QueueKey> HeapQueue<K> {
    pub fn new() -> Self {
        Self {
            heap: Vec::new(),
            index: HashMap::new(),
            counter: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, key: K) -> bool {
        self.index.contains_key(&key)
    }

    pub fn get_time(&self, key: K) -> Option<f64> {
        self.index.get(&key).map(|&slot| self.heap[slot].t)
    }

    pub fn add(&mut self, key: K, t: f64) {
        assert!(
            !self.index.contains_key(&key),
            "duplicate queue key {key:?}"
        );
        let seq = self.counter;
        self.counter += 1;
        let slot = self.heap.len();
        self.heap.push(Entry { t, seq, key });
        self.index.insert(key, slot);
        self.sift_up(slot);
    }

    pub fn update(&mut self, key: K, t: f64) {
        let slot = *self
            .index
            .get(&key)
            .unwrap_or_else(|| panic!("updating absent queue key {key:?}"));
        let seq = self.counter;
        self.counter += 1;
        self.heap[slot] = Entry { t, seq, key };
        self.sift_down(slot);
        self.sift_up(slot);
    }

    pub fn add_or_update(&mut self, key: K, t: f64) {
        if self.contains(key) {
            self.update(key, t);
        } else {
            self.add(key, t);
        }
    }

    pub fn remove(&mut self, key: K) {
        let slot = self
            .index
            .remove(&key)
            .unwrap_or_else(|| panic!("removing absent queue key {key:?}"));
        let last = self.heap.len() - 1;
        self.heap.swap_remove(slot);
        if slot < last {
            self.index.insert(self.heap[slot].key, slot);
            self.sift_down(slot);
            self.sift_up(slot);
        }
    }

    pub fn remove_if_present(&mut self, key: K) {
        if self.contains(key) {
            self.remove(key);
        }
    }

    pub fn peek(&self) -> Option<(K, f64)> {
        self.heap.first().map(|e| (e.key, e.t))
    }

    pub fn pop(&mut self) -> Option<(K, f64)> {
        let entry = *self.heap.first()?;
        self.remove(entry.key);
        Some((entry.key, entry.t))
    }

    fn swap_slots(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.index.insert(self.heap[a].key, a);
        self.index.insert(self.heap[b].key, b);
    }

    fn sift_up(&mut self, mut slot: usize) {
        while slot > 0 {
            let parent = (slot - 1) / 2;
            if self.heap[slot].precedes(&self.heap[parent]) {
                self.swap_slots(slot, parent);
                slot = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut slot: usize) {
        loop {
            let left = 2 * slot + 1;
            let right = 2 * slot + 2;
            let mut smallest = slot;
            if left < self.heap.len() && self.heap[left].precedes(&self.heap[smallest]) {
                smallest = left;
            }
            if right < self.heap.len() && self.heap[right].precedes(&self.heap[smallest]) {
                smallest = right;
            }
            if smallest == slot {
                break;
            }
            self.swap_slots(slot, smallest);
            slot = smallest;
        }
    }

    pub fn verify(&self) {
        for slot in 0..self.heap.len() {
            let left = 2 * slot + 1;
            let right = 2 * slot + 2;
            if left < self.heap.len() {
                assert!(
                    !self.heap[left].precedes(&self.heap[slot]),
                    "heap order violated at slot {slot}"
                );
            }
            if right < self.heap.len() {
                assert!(
                    !self.heap[right].precedes(&self.heap[slot]),
                    "heap order violated at slot {slot}"
                );
            }
            assert_eq!(
                self.index[&self.heap[slot].key], slot,
                "index out of sync at slot {slot}"
            );
        }
        assert_eq!(self.index.len(), self.heap.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha12Rng;

    fn queues() -> Vec<EventQueue<u32>> {
        vec![EventQueue::calendar(0.0, 1e-4), EventQueue::heap()]
    }

    #[test]
    fn equal_times_pop_in_insertion_order() {
        for mut q in queues() {
            q.add(1, 5.0);
            q.add(2, 5.0);
            q.add(3, 3.0);
            q.add(4, 5.0);
            let order: Vec<u32> = std::iter::from_fn(|| q.pop().map(|(k, _)| k)).collect();
            assert_eq!(order, vec![3, 1, 2, 4]);
        }
    }

    #[test]
    fn add_then_remove_is_a_noop() {
        for mut q in queues() {
            q.add(1, 2.0);
            q.add(2, 4.0);
            q.add(3, 1.0);
            q.remove(2);
            assert!(!q.contains(2));
            assert_eq!(q.len(), 2);
            assert_eq!(q.pop(), Some((3, 1.0)));
            assert_eq!(q.pop(), Some((1, 2.0)));
            assert_eq!(q.pop(), None);
        }
    }

    #[test]
    fn update_moves_a_key_and_refreshes_its_tiebreak() {
        for mut q in queues() {
            q.add(1, 5.0);
            q.add(2, 5.0);
            q.update(1, 5.0);
            // Re-inserting at the same time moves key 1 behind key 2.
            assert_eq!(q.pop(), Some((2, 5.0)));
            assert_eq!(q.pop(), Some((1, 5.0)));

            q.add(1, 9.0);
            q.add(2, 4.0);
            q.update(1, 2.0);
            assert_eq!(q.get_time(1), Some(2.0));
            assert_eq!(q.pop(), Some((1, 2.0)));
            assert_eq!(q.pop(), Some((2, 4.0)));
        }
    }

    #[test]
    fn peek_does_not_mutate() {
        for mut q in queues() {
            q.add(1, 3.0);
            q.add(2, 1.0);
            assert_eq!(q.peek(), Some((2, 1.0)));
            assert_eq!(q.peek(), Some((2, 1.0)));
            assert_eq!(q.len(), 2);
            assert_eq!(q.pop(), Some((2, 1.0)));
        }
    }

    #[test]
    fn pop_times_are_monotone_across_dense_waves() {
        // Two dense waves drive the pop cursor across every bucket, forcing
        // front-resizes; pops must stay monotone and each key must come back
        // exactly once.
        let mut q = CalendarQueue::new(0.0, 1.0, 1e-4);
        let mut rng = ChaCha12Rng::seed_from_u64(1234);
        let n = 100_000u32;

        for wave in 0..2u32 {
            let t_lo = wave as f64 * 40.0;
            for i in 0..n {
                q.add(wave * n + i, t_lo + rng.random::<f64>() * 40.0);
            }
            q.verify();
            let mut seen = std::collections::HashSet::new();
            let mut last = f64::NEG_INFINITY;
            while let Some((key, t)) = q.pop() {
                assert!(t >= last, "pop went backwards: {t} after {last}");
                assert!(seen.insert(key), "key {key} popped twice");
                last = t;
            }
            assert_eq!(seen.len(), n as usize);
            q.verify();
        }
    }

    #[test]
    fn calendar_and_heap_agree_under_random_operations() {
        // A small rescale interval forces several rebuilds mid-sequence; the
        // heap is the reference for the shared contract.
        let mut cal = CalendarQueue::new(0.0, 1.0, 1e-4).with_rescale_interval(1_000);
        let mut heap = HeapQueue::new();
        let mut rng = ChaCha12Rng::seed_from_u64(77);
        let mut t = 0.0f64;
        let mut live: Vec<u32> = Vec::new();
        let mut next_key = 0u32;

        for _ in 0..20_000 {
            let action: f64 = rng.random();
            if live.is_empty() || action < 0.45 {
                let at = t + rng.random::<f64>() * 30.0;
                cal.add(next_key, at);
                heap.add(next_key, at);
                live.push(next_key);
                next_key += 1;
            } else if action < 0.6 {
                let key = live[rng.random_range(0..live.len())];
                let at = t + rng.random::<f64>() * 30.0;
                cal.update(key, at);
                heap.update(key, at);
            } else if action < 0.7 {
                let pos = rng.random_range(0..live.len());
                let key = live.swap_remove(pos);
                cal.remove(key);
                heap.remove(key);
            } else {
                let a = cal.pop();
                let b = heap.pop();
                assert_eq!(a, b);
                if let Some((key, at)) = a {
                    live.retain(|&k| k != key);
                    t = at;
                }
            }
            assert_eq!(cal.len(), heap.len());
        }
        cal.verify();
        heap.verify();
        while let Some(a) = cal.pop() {
            assert_eq!(Some(a), heap.pop());
        }
        assert!(heap.pop().is_none());
    }
}
