use std::path::PathBuf;

/// A logical file in the cache: a file of a remote repository at a revision.
///
/// On disk the entry lives at `<root>/<dirname>/<revision>/<filename>`, where
/// `dirname` and `revision` have `/` replaced by `--`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheEntry {
    repo: String,
    revision: String,
    filename: String,
}

impl CacheEntry {
    pub fn new(repo: impl AsRef<str>, filename: impl AsRef<str>) -> Self {
        Self {
            repo: repo.as_ref().to_owned(),
            revision: "main".to_owned(),
            filename: filename.as_ref().to_owned(),
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn dirname(&self) -> String {
        self.repo.replace('/', "--")
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Relative on-disk location, `<dirname>/<revision>/<filename>`.
    pub fn path(&self) -> PathBuf {
        PathBuf::from(self.dirname())
            .join(self.revision.replace('/', "--"))
            .join(&self.filename)
    }
}

impl AsRef<CacheEntry> for CacheEntry {
    fn as_ref(&self) -> &CacheEntry {
        self
    }
}
