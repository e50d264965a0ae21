use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard};

/// Exclusive locks keyed by string
///
/// A key's lock exists only while it is held: it is created on first use and
/// removed again when its guard is dropped, so the set never grows with the
/// number of distinct keys ever seen.
#[derive(Default)]
pub struct KeyedMutex {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

/// Holds one key of a [`KeyedMutex`] until dropped
pub struct KeyedGuard<'a> {
    owner: &'a KeyedMutex,
    key: String,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `key` is free, then takes it
    pub fn lock(&self, key: &str) -> KeyedGuard<'_> {
        let mut held = self.held_set();

        while held.contains(key) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|e| e.into_inner());
        }

        held.insert(key.to_string());

        KeyedGuard {
            owner: self,
            key: key.to_string(),
        }
    }

    /// Number of keys currently held
    pub fn held(&self) -> usize {
        self.held_set().len()
    }

    fn held_set(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        self.owner.held_set().remove(&self.key);
        self.owner.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_lock_is_removed_on_release() {
        let locks = KeyedMutex::new();
        {
            let _a = locks.lock("a");
            let _b = locks.lock("b");
            assert_eq!(locks.held(), 2);
        }
        assert_eq!(locks.held(), 0);
    }

    #[test]
    fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedMutex::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        let _guard = locks.lock("shard");
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_micros(200));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_different_keys_do_not_block() {
        let locks = KeyedMutex::new();
        let _a = locks.lock("a");
        let _b = locks.lock("b");
        assert_eq!(locks.held(), 2);
    }
}
