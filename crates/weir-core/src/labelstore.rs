//! The process-wide label store: canonical label sets in, stable 64-bit
//! identities out.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::labels::LabelSet;

/// Allocates a process-unique 64-bit id per canonicalized label set.
///
/// Ids increase monotonically and are never reused within the process, so
/// an id uniquely identifies one label set for the process lifetime.
/// `get_or_add_global_ref_id` is the sole mutator and is internally
/// synchronized; the store is shared behind an `Arc` by every component
/// that needs identity.
#[derive(Default)]
pub struct LabelStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    ids: HashMap<LabelSet, u64>,
    next_id: u64,
}

impl LabelStore {
    /// An empty store; the first allocated id is 1 so 0 can stand for
    /// "no series" in appender contracts.
    pub fn new() -> Self {
        LabelStore {
            inner: Mutex::new(Inner {
                ids: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// The identity of a label set, allocating one on first sight.
    pub fn get_or_add_global_ref_id(&self, labels: &LabelSet) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        if let Some(&id) = inner.ids.get(labels) {
            return id;
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.ids.insert(labels.clone(), id);
        id
    }

    /// Number of distinct label sets seen
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .ids
            .len()
    }

    /// True when no label set has been interned yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_same_set_same_id() {
        let store = LabelStore::new();
        let a = LabelSet::from_pairs(&[("job", "api")]);
        let b = LabelSet::from_pairs(&[("job", "api")]);

        assert_eq!(
            store.get_or_add_global_ref_id(&a),
            store.get_or_add_global_ref_id(&b)
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_distinct_sets_distinct_ids() {
        let store = LabelStore::new();
        let a = store.get_or_add_global_ref_id(&LabelSet::from_pairs(&[("job", "api")]));
        let b = store.get_or_add_global_ref_id(&LabelSet::from_pairs(&[("job", "db")]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_ids_are_monotonic_and_start_at_one() {
        let store = LabelStore::new();
        let first = store.get_or_add_global_ref_id(&LabelSet::from_pairs(&[("a", "1")]));
        let second = store.get_or_add_global_ref_id(&LabelSet::from_pairs(&[("a", "2")]));
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[test]
    fn test_concurrent_interning() {
        let store = Arc::new(LabelStore::new());
        let mut handles = Vec::new();
        for thread in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    // Half the sets are shared across threads, half unique.
                    let value = if i % 2 == 0 {
                        format!("shared-{}", i)
                    } else {
                        format!("t{}-{}", thread, i)
                    };
                    let labels = LabelSet::from_pairs(&[("series", value.as_str())]);
                    store.get_or_add_global_ref_id(&labels);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        // 50 shared + 8 * 50 unique
        assert_eq!(store.len(), 50 + 400);
    }
}
