use serde::Serialize;
use std::collections::HashMap;

/// One facet value and how many candidates carried it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavigatorItem {
    pub name: String,
    pub count: u32,
}

/// Counts facet values seen while ranking.
#[derive(Debug, Default, Clone)]
pub struct Navigator {
    counts: HashMap<String, u32>,
}

impl Navigator {
    pub fn new() -> Self { Self::default() }

    pub fn inc(&mut self, key: &str) { self.inc_by(key, 1); }

    pub fn inc_by(&mut self, key: &str, n: u32) {
        *self.counts.entry(key.to_string()).or_insert(0) += n;
    }

    pub fn get(&self, key: &str) -> u32 { self.counts.get(key).copied().unwrap_or(0) }

    pub fn len(&self) -> usize { self.counts.len() }

    pub fn is_empty(&self) -> bool { self.counts.is_empty() }

    /// Top `max` entries by count. A navigator with fewer than two distinct
    /// values cannot narrow a search and is reported empty.
    pub fn entries(&self, max: usize) -> Vec<NavigatorItem> {
        if self.counts.len() < 2 {
            return Vec::new();
        }
        self.top(max)
    }

    /// Top `max` entries by count, ties by name.
    pub fn top(&self, max: usize) -> Vec<NavigatorItem> {
        let mut items: Vec<NavigatorItem> =
            self.counts.iter().map(|(name, &count)| NavigatorItem { name: name.clone(), count }).collect();
        items.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        items.truncate(max);
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_sorted_and_truncated() {
        let mut n = Navigator::new();
        for k in ["b", "a", "b", "c", "b", "a"] {
            n.inc(k);
        }
        let e = n.entries(2);
        assert_eq!(e, vec![NavigatorItem { name: "b".into(), count: 3 }, NavigatorItem { name: "a".into(), count: 2 }]);
    }

    #[test]
    fn single_value_is_empty() {
        let mut n = Navigator::new();
        n.inc("only");
        n.inc("only");
        assert!(n.entries(10).is_empty());
        assert_eq!(n.get("only"), 2);
        assert_eq!(n.top(10), vec![NavigatorItem { name: "only".into(), count: 2 }]);
    }
}
