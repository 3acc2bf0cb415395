//! Qid path allocation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out unique qid paths, starting at zero.
///
/// One allocator can back several trees (wrap it in an `Arc`) when their
/// qids must not collide. Paths are never reused, even after a node is
/// removed.
#[derive(Debug, Default)]
pub struct QidAllocator {
    next: AtomicU64,
}

impl QidAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next path.
    pub fn next_path(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of paths handed out so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_starts_at_zero() {
        let qids = QidAllocator::new();
        assert_eq!(qids.next_path(), 0);
        assert_eq!(qids.next_path(), 1);
        assert_eq!(qids.issued(), 2);
    }

    #[test]
    fn test_unique_across_threads() {
        let qids = Arc::new(QidAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let qids = qids.clone();
                std::thread::spawn(move || (0..1000).map(|_| qids.next_path()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for path in h.join().unwrap() {
                assert!(seen.insert(path), "duplicate qid path {path}");
            }
        }
        assert_eq!(seen.len(), 8000);
    }
}
