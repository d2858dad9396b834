use crate::cache::CacheEntry;

/// A declaration of which files are needed to build an object from the cache.
///
/// `CacheClaim` is returned by [`TryFromCache::claim_files`](super::TryFromCache::claim_files).
/// It tells the cache system **which files to fetch** (`entries`).
#[derive(Clone, Debug)]
pub struct CacheClaim {
    pub entries: Vec<CacheEntry>,
}

impl CacheClaim {
    pub fn new(entries: impl IntoIterator<Item = impl Into<CacheEntry>>) -> Self {
        Self {
            entries: entries.into_iter().map(|v| v.into()).collect(),
        }
    }
}
