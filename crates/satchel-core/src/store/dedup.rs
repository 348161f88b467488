use std::collections::{HashSet, VecDeque};

/// Set of transport ids already folded into the message list.
///
/// Two instances exist: one per open conversation (unbounded, rebuilt each
/// time the conversation opens) and one global for inbox scanning (process
/// lifetime, bounded). Dropping old global entries is safe because older
/// duplicates are still caught by the reconciler's content-based matching.
pub struct DedupIndex {
    seen: HashSet<String>,
    order: VecDeque<String>,
    cap: Option<usize>,
}

impl DedupIndex {
    /// Unbounded index for a conversation scope.
    pub fn unbounded() -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            cap: None,
        }
    }

    /// Bounded index for the process-lifetime global scope.
    pub fn bounded(cap: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            cap: Some(cap),
        }
    }

    pub fn seen(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Idempotent.
    pub fn record(&mut self, id: &str) {
        if !self.seen.insert(id.to_string()) {
            return;
        }
        self.order.push_back(id.to_string());
        if let Some(cap) = self.cap {
            while self.order.len() > cap {
                if let Some(evicted) = self.order.pop_front() {
                    self.seen.remove(&evicted);
                }
            }
        }
    }

    pub fn seed<I: IntoIterator<Item = String>>(&mut self, ids: I) {
        for id in ids {
            self.record(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_idempotent() {
        let mut idx = DedupIndex::unbounded();
        assert!(!idx.seen("a"));
        idx.record("a");
        idx.record("a");
        idx.record("a");
        assert!(idx.seen("a"));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn bounded_index_evicts_oldest_first() {
        let mut idx = DedupIndex::bounded(3);
        for id in ["a", "b", "c", "d"] {
            idx.record(id);
        }
        assert!(!idx.seen("a"));
        assert!(idx.seen("b"));
        assert!(idx.seen("d"));
        assert_eq!(idx.len(), 3);
    }

    #[test]
    fn seed_fills_from_persisted_history() {
        let mut idx = DedupIndex::unbounded();
        idx.seed(vec!["x".to_string(), "y".to_string()]);
        assert!(idx.seen("x"));
        assert!(idx.seen("y"));
    }
}
