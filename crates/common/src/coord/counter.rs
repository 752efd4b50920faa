use std::sync::atomic::{AtomicI64, Ordering};

/// Thread-safe integer backed by a native atomic
///
/// All operations use sequentially consistent ordering; the write-admission
/// handshake relies on a writer's increment and the engine's `syncing` flag
/// being observed in a single total order.
#[derive(Debug, Default)]
pub struct AtomicCounter {
    value: AtomicI64,
}

impl AtomicCounter {
    pub fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
        }
    }

    /// Add `n`, returning the new value
    pub fn add(&self, n: i64) -> i64 {
        self.value.fetch_add(n, Ordering::SeqCst) + n
    }

    /// Subtract `n`, returning the new value
    pub fn sub(&self, n: i64) -> i64 {
        self.value.fetch_sub(n, Ordering::SeqCst) - n
    }

    pub fn load(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Replace `old` with `new` if the counter still holds `old`
    pub fn compare_and_swap(&self, old: i64, new: i64) -> bool {
        self.value
            .compare_exchange(old, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_add_sub_load() {
        let counter = AtomicCounter::default();
        assert_eq!(counter.add(3), 3);
        assert_eq!(counter.sub(1), 2);
        assert_eq!(counter.load(), 2);
    }

    #[test]
    fn test_compare_and_swap() {
        let counter = AtomicCounter::new(5);
        assert!(!counter.compare_and_swap(4, 10));
        assert_eq!(counter.load(), 5);
        assert!(counter.compare_and_swap(5, 10));
        assert_eq!(counter.load(), 10);
    }

    #[test]
    fn test_concurrent_add_sub_balances() {
        let counter = Arc::new(AtomicCounter::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        counter.add(1);
                        counter.sub(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(), 0);
    }
}
