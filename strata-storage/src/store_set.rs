use std::sync::Arc;

use strata_types::contract::StorageClass;

use crate::cache::CacheStore;
use crate::error::StorageError;
use crate::memory::MemoryStore;
use crate::traits::SharedStore;

/// One backing store per [`StorageClass`].
///
/// Cloning is cheap; clones share the same underlying stores.
#[derive(Clone)]
pub struct StoreSet {
    stores: [SharedStore; 5],
}

impl StoreSet {
    /// Build a set by asking `make` for the store of each class.
    pub fn from_fn(mut make: impl FnMut(StorageClass) -> SharedStore) -> Self {
        Self {
            stores: StorageClass::ALL.map(&mut make),
        }
    }

    /// A set where every class is backed by a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::from_fn(|_| Arc::new(MemoryStore::new()) as SharedStore)
    }

    pub fn store(&self, class: StorageClass) -> &SharedStore {
        &self.stores[class.tag() as usize]
    }

    /// Open a buffered branch over every class.
    pub fn branch(&self) -> Branch {
        let caches = StorageClass::ALL
            .map(|class| Arc::new(CacheStore::new(self.store(class).clone())));
        let view = StoreSet {
            stores: std::array::from_fn(|i| caches[i].clone() as SharedStore),
        };
        Branch { caches, view }
    }
}

/// A set of write buffers opened over a parent [`StoreSet`].
///
/// Writes through [`view`](Self::view) reach the parent only on
/// [`commit`](Self::commit). Dropping the branch discards them.
pub struct Branch {
    caches: [Arc<CacheStore>; 5],
    view: StoreSet,
}

impl Branch {
    pub fn view(&self) -> &StoreSet {
        &self.view
    }

    pub fn is_dirty(&self) -> bool {
        self.caches.iter().any(|c| c.is_dirty())
    }

    /// Flush every class into the parent set.
    pub fn commit(self) -> Result<usize, StorageError> {
        let mut flushed = 0;
        for cache in &self.caches {
            flushed += cache.commit()?;
        }
        Ok(flushed)
    }

    pub fn discard(self) {
        for cache in &self.caches {
            cache.discard();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::KvStore;

    #[test]
    fn test_classes_are_separate() {
        let set = StoreSet::in_memory();
        set.store(StorageClass::CoreConsensus).put(b"k", b"core").unwrap();
        assert_eq!(set.store(StorageClass::Memory).get(b"k").unwrap(), None);
    }

    #[test]
    fn test_branch_commit_and_discard() {
        let set = StoreSet::in_memory();
        let branch = set.branch();
        branch
            .view()
            .store(StorageClass::Transient)
            .put(b"t", b"1")
            .unwrap();
        assert!(branch.is_dirty());
        branch.discard();
        assert_eq!(set.store(StorageClass::Transient).get(b"t").unwrap(), None);

        let branch = set.branch();
        branch
            .view()
            .store(StorageClass::MetaConsensus)
            .put(b"m", b"1")
            .unwrap();
        assert_eq!(branch.commit().unwrap(), 1);
        assert_eq!(
            set.store(StorageClass::MetaConsensus).get(b"m").unwrap(),
            Some(b"1".to_vec())
        );
    }

    #[test]
    fn test_nested_branch_is_isolated_from_root() {
        let root = StoreSet::in_memory();
        let outer = root.branch();
        let inner = outer.view().branch();
        inner
            .view()
            .store(StorageClass::CoreConsensus)
            .put(b"x", b"1")
            .unwrap();
        inner.commit().unwrap();
        let core = StorageClass::CoreConsensus;
        assert_eq!(outer.view().store(core).get(b"x").unwrap(), Some(b"1".to_vec()));
        assert_eq!(root.store(core).get(b"x").unwrap(), None);
        drop(outer);
        assert_eq!(root.store(core).get(b"x").unwrap(), None);
    }
}
