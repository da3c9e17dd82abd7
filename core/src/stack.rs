use crate::docid::{DocumentId, SiteId};
use crate::posting::Posting;
use crate::queue::{Ranked, RankedQueue};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Longest single wait in [`RankingStack::pop_best_wait`].
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Anything the ranking stack can hold.
pub trait Candidate {
    fn id(&self) -> DocumentId;
    fn site(&self) -> SiteId { self.id().site() }
}

impl Candidate for Posting {
    fn id(&self) -> DocumentId { self.doc_id }
}

#[derive(Debug)]
struct StackInner<T> {
    primary: RankedQueue<T>,
    /// Deferred candidates of sites that already surfaced one entry.
    buckets: HashMap<SiteId, RankedQueue<T>>,
}

/// Bounded top-K selector with per-site deferral.
#[derive(Debug)]
pub struct RankingStack<T> {
    inner: Mutex<StackInner<T>>,
    available: Condvar,
    bucket_capacity: usize,
}

impl<T: Candidate> RankingStack<T> {
    pub fn new(capacity: Option<usize>, bucket_capacity: usize) -> Self {
        RankingStack {
            inner: Mutex::new(StackInner { primary: RankedQueue::new(capacity), buckets: HashMap::new() }),
            available: Condvar::new(),
            bucket_capacity,
        }
    }

    /// Returns the entry dropped to make room, if any.
    pub fn push(&self, item: T, score: i64) -> Option<Ranked<T>> {
        let dropped = self.inner.lock().primary.push(item, score);
        self.available.notify_all();
        dropped
    }

    pub fn bottom_exceeds(&self, score: i64) -> bool { self.inner.lock().primary.bottom_exceeds(score) }

    /// Best remaining candidate. With `skip_double_domain` every site
    /// surfaces its first candidate before any site surfaces a second one.
    pub fn pop_best(&self, skip_double_domain: bool) -> Option<Ranked<T>> {
        self.pop_locked(&mut self.inner.lock(), skip_double_domain)
    }

    fn pop_locked(&self, inner: &mut StackInner<T>, skip_double_domain: bool) -> Option<Ranked<T>> {
        if !skip_double_domain {
            if let Some(best) = inner.primary.pop_best() {
                return Some(best);
            }
            return Self::pop_from_buckets(inner);
        }
        while let Some(best) = inner.primary.pop_best() {
            let site = best.item.site();
            match inner.buckets.get_mut(&site) {
                Some(bucket) => {
                    bucket.push(best.item, best.score);
                }
                None => {
                    inner.buckets.insert(site, RankedQueue::new(Some(self.bucket_capacity)));
                    return Some(best);
                }
            }
        }
        Self::pop_from_buckets(inner)
    }

    fn pop_from_buckets(inner: &mut StackInner<T>) -> Option<Ranked<T>> {
        let site = inner
            .buckets
            .iter()
            .filter_map(|(site, b)| b.peek_best().map(|r| (*site, r.score)))
            .max_by_key(|(_, score)| *score)?
            .0;
        inner.buckets.get_mut(&site)?.pop_best()
    }

    /// Pop the best candidate, waiting until `deadline` while the stack is
    /// empty and `feeding_finished` reports more input may come.
    pub fn pop_best_wait(&self, skip_double_domain: bool, deadline: Instant, feeding_finished: impl Fn() -> bool) -> Option<Ranked<T>> {
        let mut inner = self.inner.lock();
        loop {
            // read before popping: feeders push before they report completion
            let finished = feeding_finished();
            if let Some(best) = self.pop_locked(&mut inner, skip_double_domain) {
                return Some(best);
            }
            let now = Instant::now();
            if finished || now >= deadline {
                return None;
            }
            self.available.wait_until(&mut inner, deadline.min(now + WAIT_SLICE));
        }
    }

    /// Wake waiting consumers.
    pub fn notify(&self) { self.available.notify_all(); }

    /// Remove a candidate wherever it resides.
    pub fn remove(&self, id: &DocumentId) -> Option<Ranked<T>> {
        let mut inner = self.inner.lock();
        if let Some(r) = inner.primary.remove_where(|c| c.id() == *id) {
            return Some(r);
        }
        let bucket = inner.buckets.get_mut(&id.site())?;
        bucket.remove_where(|c| c.id() == *id)
    }

    pub fn size(&self) -> usize {
        let inner = self.inner.lock();
        inner.primary.len() + inner.buckets.values().map(RankedQueue::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool { self.size() == 0 }
}
