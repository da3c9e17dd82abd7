use min_max_heap::MinMaxHeap;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::time::{Duration, Instant};

/// An item with its score. Ties go to the earlier insertion.
#[derive(Debug, Clone)]
pub struct Ranked<T> {
    pub item: T,
    pub score: i64,
    seq: u64,
}

impl<T> PartialEq for Ranked<T> {
    fn eq(&self, other: &Self) -> bool { self.score == other.score && self.seq == other.seq }
}

impl<T> Eq for Ranked<T> {}

impl<T> Ord for Ranked<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.cmp(&other.score).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Ranked<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

/// Bounded best-of-N queue: O(log N) insert with eviction, O(1) access to
/// both the best and the worst entry.
#[derive(Debug)]
pub struct RankedQueue<T> {
    heap: MinMaxHeap<Ranked<T>>,
    capacity: Option<usize>,
    seq: u64,
}

impl<T> RankedQueue<T> {
    /// `None` means unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        RankedQueue { heap: MinMaxHeap::new(), capacity, seq: 0 }
    }

    pub fn is_full(&self) -> bool { self.capacity.is_some_and(|c| self.heap.len() >= c) }

    /// Insert, evicting the worst entry when full. Returns whatever was
    /// dropped: the evicted entry, or the candidate itself if it was not
    /// better than the current worst.
    pub fn push(&mut self, item: T, score: i64) -> Option<Ranked<T>> {
        self.seq += 1;
        let candidate = Ranked { item, score, seq: self.seq };
        if self.capacity == Some(0) {
            return Some(candidate);
        }
        if !self.is_full() {
            self.heap.push(candidate);
            return None;
        }
        match self.heap.peek_min() {
            Some(worst) if worst.score < score => Some(self.heap.push_pop_min(candidate)),
            _ => Some(candidate),
        }
    }

    /// True if the queue is full and a candidate with `score` would be rejected.
    pub fn bottom_exceeds(&self, score: i64) -> bool {
        self.is_full() && self.heap.peek_min().is_some_and(|w| w.score >= score)
    }

    pub fn peek_best(&self) -> Option<&Ranked<T>> { self.heap.peek_max() }

    pub fn peek_worst(&self) -> Option<&Ranked<T>> { self.heap.peek_min() }

    pub fn pop_best(&mut self) -> Option<Ranked<T>> { self.heap.pop_max() }

    pub fn pop_worst(&mut self) -> Option<Ranked<T>> { self.heap.pop_min() }

    /// Remove the first entry matching `pred`.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> Option<Ranked<T>> {
        if !self.heap.iter().any(|r| pred(&r.item)) {
            return None;
        }
        let mut entries = std::mem::take(&mut self.heap).into_vec();
        let removed = entries.iter().position(|r| pred(&r.item)).map(|i| entries.swap_remove(i));
        self.heap = MinMaxHeap::from(entries);
        removed
    }

    pub fn len(&self) -> usize { self.heap.len() }

    pub fn is_empty(&self) -> bool { self.heap.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = &Ranked<T>> { self.heap.iter() }
}

#[derive(Debug)]
struct ListInner<T> {
    drained: Vec<Ranked<T>>,
    queue: RankedQueue<T>,
}

/// Concurrently growing result list readable by rank.
///
/// Reading position `i` fixes positions `0..=i`: entries are moved from the
/// queue into a drained prefix, so an index never changes its entry once it
/// has been handed out. Later, better entries land after the drained prefix.
#[derive(Debug)]
pub struct ResultList<T> {
    inner: Mutex<ListInner<T>>,
    capacity: Option<usize>,
    ready: Condvar,
}

impl<T: Clone> ResultList<T> {
    pub fn new(capacity: Option<usize>) -> Self {
        ResultList {
            inner: Mutex::new(ListInner { drained: Vec::new(), queue: RankedQueue::new(None) }),
            capacity,
            ready: Condvar::new(),
        }
    }

    /// Insert an entry; with a capacity the worst undrained entry is evicted on overflow.
    pub fn push(&self, item: T, score: i64) -> bool {
        let mut inner = self.inner.lock();
        if let Some(cap) = self.capacity {
            if inner.drained.len() + inner.queue.len() >= cap {
                match inner.queue.peek_worst() {
                    Some(w) if w.score < score => {
                        inner.queue.pop_worst();
                    }
                    _ => return false,
                }
            }
        }
        inner.queue.push(item, score);
        drop(inner);
        self.ready.notify_all();
        true
    }

    fn element_locked(inner: &mut ListInner<T>, index: usize) -> Option<Ranked<T>> {
        while inner.drained.len() <= index {
            let next = inner.queue.pop_best()?;
            inner.drained.push(next);
        }
        inner.drained.get(index).cloned()
    }

    /// Entry at rank `index`, if that many entries exist.
    pub fn element(&self, index: usize) -> Option<Ranked<T>> {
        Self::element_locked(&mut self.inner.lock(), index)
    }

    /// Like [`ResultList::element`], waiting up to `timeout` for the entry to arrive.
    pub fn element_timeout(&self, index: usize, timeout: Duration) -> Option<Ranked<T>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(e) = Self::element_locked(&mut inner, index) {
                return Some(e);
            }
            if self.ready.wait_until(&mut inner, deadline).timed_out() {
                return Self::element_locked(&mut inner, index);
            }
        }
    }

    /// The first `n` entries by rank.
    pub fn list(&self, n: usize) -> Vec<Ranked<T>> {
        let mut inner = self.inner.lock();
        if n > 0 {
            let _ = Self::element_locked(&mut inner, n - 1);
        }
        inner.drained.iter().take(n).cloned().collect()
    }

    /// Entries present, drained or not.
    pub fn size_available(&self) -> usize {
        let inner = self.inner.lock();
        inner.drained.len() + inner.queue.len()
    }

    pub fn is_empty(&self) -> bool { self.size_available() == 0 }

    /// Wake every waiter, e.g. after the producers stopped.
    pub fn notify(&self) { self.ready.notify_all(); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn bounded_push_evicts_worst() {
        let mut q = RankedQueue::new(Some(2));
        assert!(q.push("a", 5).is_none());
        assert!(q.push("b", 10).is_none());
        assert_eq!(q.push("c", 3).map(|r| r.score), Some(3));
        assert_eq!(q.push("d", 20).map(|r| r.score), Some(5));
        let mut scores: Vec<i64> = q.iter().map(|r| r.score).collect();
        scores.sort();
        assert_eq!(scores, vec![10, 20]);
        assert!(q.bottom_exceeds(10));
        assert!(!q.bottom_exceeds(11));
    }

    #[test]
    fn ties_keep_insertion_order() {
        let mut q = RankedQueue::new(None);
        q.push("first", 7);
        q.push("second", 7);
        assert_eq!(q.pop_best().unwrap().item, "first");
        assert_eq!(q.pop_best().unwrap().item, "second");
        assert!(q.pop_best().is_none());
    }

    #[test]
    fn remove_where_finds_entry() {
        let mut q = RankedQueue::new(None);
        for (i, s) in [4, 9, 1].into_iter().enumerate() {
            q.push(i, s);
        }
        assert_eq!(q.remove_where(|i| *i == 1).map(|r| r.score), Some(9));
        assert!(q.remove_where(|i| *i == 1).is_none());
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop_best().unwrap().score, 4);
    }

    #[test]
    fn result_list_positions_are_stable() {
        let list = ResultList::new(None);
        list.push("low", 1);
        list.push("mid", 5);
        assert_eq!(list.element(0).unwrap().item, "mid");
        list.push("high", 9);
        assert_eq!(list.element(0).unwrap().item, "mid");
        assert_eq!(list.element(1).unwrap().item, "high");
        assert_eq!(list.element(2).unwrap().item, "low");
        assert!(list.element(3).is_none());
        assert_eq!(list.size_available(), 3);
    }

    #[test]
    fn result_list_capacity_drops_worst() {
        let list = ResultList::new(Some(2));
        assert!(list.push(1, 1));
        assert!(list.push(2, 2));
        assert!(!list.push(0, 0));
        assert!(list.push(3, 3));
        let items: Vec<i32> = list.list(5).into_iter().map(|r| r.item).collect();
        assert_eq!(items, vec![3, 2]);
    }

    #[test]
    fn element_timeout_waits_for_producer() {
        let list = Arc::new(ResultList::new(None));
        let producer = {
            let list = Arc::clone(&list);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                list.push("late", 1);
            })
        };
        assert_eq!(list.element_timeout(0, Duration::from_secs(5)).unwrap().item, "late");
        producer.join().unwrap();
        assert!(list.element_timeout(1, Duration::from_millis(10)).is_none());
    }
}
