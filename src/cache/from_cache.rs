use crate::{
    cache::{Cache, CacheClaim, CacheContents},
    utils::BoxFuture,
};

/// Build a value by fetching the files it needs from the [`Cache`].
///
/// # How it works
/// 1. **`claim_files(cache, key, ctx)`** declares which [`CacheEntry`](super::CacheEntry)s
///    are required to build `Self`.
/// 2. The caller (typically [`Cache::try_create`]) resolves those files locally,
///    downloading the missing ones, and aggregates them into a [`CacheContents`].
/// 3. **`try_from_contents(contents, ctx)`** assembles `Self` from the fetched files.
///
/// # Contracts
/// - `claim_files` should be lightweight. It declares files; it does not read them.
/// - `try_from_contents` consumes the entries it uses. Weight files can be large,
///   so prefer mapping them from their path over copying bytes around.
/// - `ctx` carries whatever both steps need to agree on (repository names,
///   the target device, ...).
pub trait TryFromCache: Sized + Send {
    type Context: Send + Sync;

    fn claim_files<'a>(
        cache: Cache,
        key: &'a str,
        ctx: &'a Self::Context,
    ) -> BoxFuture<'a, anyhow::Result<CacheClaim>>;

    fn try_from_contents<'a>(
        contents: &'a mut CacheContents,
        ctx: &'a Self::Context,
    ) -> BoxFuture<'a, anyhow::Result<Self>>;
}
