use std::{collections::BTreeMap, path::PathBuf};

use anyhow::Context;

use crate::cache::CacheEntry;

/// Where the bytes of a fetched file are.
///
/// Small files (tokenizer configs, `config.json`) are held in memory. Weight
/// files stay on disk so they can be memory-mapped.
#[derive(Debug)]
pub enum ByteSource {
    Eager(Vec<u8>),
    Lazy(PathBuf),
}

impl ByteSource {
    pub async fn into_bytes(self) -> anyhow::Result<Vec<u8>> {
        match self {
            ByteSource::Eager(bytes) => Ok(bytes),
            ByteSource::Lazy(path) => tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display())),
        }
    }
}

/// Files fetched for a cache-backed build step, keyed by [`CacheEntry`].
///
/// Constructors consume entries as they go; `root` remembers the local cache
/// directory the files were resolved under.
#[derive(Debug)]
pub struct CacheContents {
    pub root: PathBuf,
    pub entries: BTreeMap<CacheEntry, ByteSource>,
}

impl CacheContents {
    /// Remove and return the source associated with the exact key.
    pub fn remove(&mut self, entry: &CacheEntry) -> Option<ByteSource> {
        self.entries.remove(entry)
    }

    /// Remove and return one entry whose `filename` matches the given value.
    ///
    /// If multiple entries share the same `filename` across different repositories,
    /// which one is returned is unspecified.
    pub fn remove_with_filename(
        &mut self,
        filename: impl AsRef<str>,
    ) -> Option<(CacheEntry, ByteSource)> {
        let entry = self
            .entries
            .keys()
            .find(|k| k.filename() == filename.as_ref())?
            .clone();
        self.entries.remove_entry(&entry)
    }

    /// Local path of an entry, whether or not its bytes were loaded eagerly.
    pub fn path_of(&self, entry: &CacheEntry) -> PathBuf {
        self.root.join(entry.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_with_filename_takes_entry_out() {
        let entry = CacheEntry::new("lmz/mt5-tokenizers", "mt5-small.tokenizer.json");
        let mut contents = CacheContents {
            root: PathBuf::from("/tmp/cache"),
            entries: BTreeMap::from([(entry.clone(), ByteSource::Eager(b"{}".to_vec()))]),
        };

        let (found, _) = contents
            .remove_with_filename("mt5-small.tokenizer.json")
            .unwrap();
        assert_eq!(found, entry);
        assert!(contents.remove_with_filename("mt5-small.tokenizer.json").is_none());
        assert_eq!(
            contents.path_of(&entry),
            PathBuf::from("/tmp/cache/lmz--mt5-tokenizers/main/mt5-small.tokenizer.json")
        );
    }
}
