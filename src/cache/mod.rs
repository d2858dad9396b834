pub(crate) mod cache;
pub(crate) mod claim;
pub(crate) mod contents;
pub(crate) mod entry;
pub(crate) mod filesystem;
pub(crate) mod from_cache;

pub use cache::*;
pub use claim::*;
pub use contents::*;
pub use entry::*;
pub use from_cache::*;
