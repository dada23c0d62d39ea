//! In-process key locks serializing check-then-act identity spans.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Hands out one mutex per contended key (normalized email, `channel:uid`,
/// member id) so two concurrent resolutions of the same identity serialize
/// their read-decide-write span instead of both observing "no member".
#[derive(Debug, Default)]
pub(crate) struct KeyLockRegistry {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLockRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns lock handles for the given keys, sorted and de-duplicated so
    /// every caller acquires them in the same order.
    pub(crate) fn handles(&self, keys: &[String]) -> Vec<Arc<Mutex<()>>> {
        let mut sorted = keys.to_vec();
        sorted.sort();
        sorted.dedup();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        sorted
            .into_iter()
            .map(|key| Arc::clone(locks.entry(key).or_default()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_handles_are_shared_per_key_and_deduplicated() {
        let registry = KeyLockRegistry::new();
        let first = registry.handles(&["email:a@x".to_string(), "uid:line:U1".to_string()]);
        let second = registry.handles(&[
            "uid:line:U1".to_string(),
            "uid:line:U1".to_string(),
            "email:a@x".to_string(),
        ]);
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert!(Arc::ptr_eq(&first[0], &second[0]));
        assert!(Arc::ptr_eq(&first[1], &second[1]));
    }

    #[test]
    fn functional_lock_serializes_concurrent_check_then_act() {
        let registry = Arc::new(KeyLockRegistry::new());
        let counter = Arc::new(Mutex::new(0_u32));
        let mut join_handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let counter = Arc::clone(&counter);
            join_handles.push(std::thread::spawn(move || {
                let handles = registry.handles(&["email:a@x".to_string()]);
                let _guards = handles
                    .iter()
                    .map(|handle| handle.lock().unwrap_or_else(PoisonError::into_inner))
                    .collect::<Vec<_>>();
                let observed = *counter.lock().unwrap_or_else(PoisonError::into_inner);
                std::thread::yield_now();
                *counter.lock().unwrap_or_else(PoisonError::into_inner) = observed + 1;
            }));
        }
        for handle in join_handles {
            handle.join().expect("thread join");
        }
        assert_eq!(*counter.lock().unwrap_or_else(PoisonError::into_inner), 8);
    }
}
