use std::{
    collections::BTreeMap,
    env::var,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, bail};
use async_stream::try_stream;
use futures::StreamExt;
use tokio::io::AsyncWriteExt as _;
use url::Url;

use super::filesystem;
use crate::{
    boxed,
    cache::{ByteSource, CacheContents, CacheEntry, TryFromCache},
    constants::{CACHE_DIR_NAME, CACHE_REMOTE_URL_ENV, CACHE_ROOT_ENV, DEFAULT_REMOTE_URL},
    utils::BoxStream,
};

/// Files smaller than this (tokenizer files, `config.json`) are kept in memory.
/// Larger files (model weights) are handed over by path to avoid copying them.
const EAGER_LOAD_THRESHOLD: u64 = 10 * 1024 * 1024;

const MAX_DOWNLOAD_ATTEMPTS: u64 = 3;

async fn download_attempt(url: &Url, dest: &Path) -> anyhow::Result<()> {
    let client = reqwest::Client::builder().build()?;

    let resp = client.get(url.clone()).send().await?;

    if !resp.status().is_success() {
        bail!("HTTP error: {}", resp.status());
    }

    // Stream into a sibling file and rename at the end, so an interrupted
    // download never looks like a cached file.
    filesystem::create_parent(dest).await?;
    let partial = dest.with_file_name(format!(
        "{}.part",
        dest.file_name()
            .map(|v| v.to_string_lossy().to_string())
            .unwrap_or_default()
    ));
    stream_into(resp.bytes_stream(), &partial).await?;
    filesystem::rename(&partial, dest).await
}

/// Write a body stream to `path`. A stream that fails midway leaves no file
/// behind.
async fn stream_into<S, B, E>(strm: S, path: &Path) -> anyhow::Result<()>
where
    S: futures::Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::error::Error + Send + Sync + 'static,
{
    let result = write_chunks(strm, path).await;
    if result.is_err() && filesystem::exists(path).await {
        if let Err(e) = filesystem::remove(path).await {
            crate::warn!("Failed to remove partial download {}: {:#}", path.display(), e);
        }
    }
    result
}

async fn write_chunks<S, B, E>(strm: S, path: &Path) -> anyhow::Result<()>
where
    S: futures::Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut file = tokio::fs::File::create(path)
        .await
        .context("tokio::fs::File::create failed")?;
    let mut strm = std::pin::pin!(strm);
    while let Some(chunk) = strm.next().await {
        let chunk = chunk.context("response body stream failed")?;
        file.write_all(chunk.as_ref())
            .await
            .context("write_all failed")?;
    }
    file.flush().await.context("flush failed")
}

async fn download(url: &Url, dest: &Path) -> anyhow::Result<()> {
    let mut last_error = None;

    for attempt in 0..MAX_DOWNLOAD_ATTEMPTS {
        match download_attempt(url, dest).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                crate::warn!(
                    "Download attempt {}/{} of {} failed: {:#}",
                    attempt + 1,
                    MAX_DOWNLOAD_ATTEMPTS,
                    url,
                    e
                );
                last_error = Some(e);
                if attempt < MAX_DOWNLOAD_ATTEMPTS - 1 {
                    crate::utils::sleep(1000 * (attempt + 1)).await;
                }
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| anyhow::anyhow!("download never attempted"))
        .context(format!("failed to download {}", url)))
}

/// [`TryFromCache`] results with its progress.
///
/// # Fields
/// - `comment`: Human-readable description of the current step (a file that
///   became ready, or `"Initialized"` at the end).
/// - `current_task`: Number of completed steps so far.
/// - `total_task`: Total number of steps (all files + final initialization).
/// - `result`: `Some(T)` **only** on the final event; `None` otherwise.
#[derive(Debug)]
pub struct CacheProgress<T> {
    pub comment: String,
    pub current_task: usize,
    pub total_task: usize,
    pub result: Option<T>,
}

/// A local file cache backed by a HuggingFace-compatible remote.
///
/// # Cache Root
///
/// Local directory where fetched files are stored. By default:
/// - **Linux / macOS**: `${HOME}/.cache/mt5-service`
/// - **Windows**: `%LOCALAPPDATA%\mt5-service`
///
/// Override it with the `MT5_CACHE_ROOT` environment variable.
///
/// # Remote URL
///
/// Missing files are downloaded from `<remote>/<repo>/resolve/<revision>/<filename>`.
/// The default remote is `https://huggingface.co`; override it with
/// `MT5_CACHE_REMOTE_URL`.
///
/// # Workflow
///
/// 1. Check for the local file at `<root>/<dirname>/<revision>/<filename>`.
/// 2. If present, use it as is.
/// 3. Otherwise download it (retrying up to three times), write it to that
///    path and use it.
#[derive(Debug, Clone)]
pub struct Cache {
    root: PathBuf,
    remote_url: Url,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    /// Create a new cache instance using environment defaults.
    /// Falls back to the built-in defaults if unset or invalid.
    pub fn new() -> Self {
        let root = match var(CACHE_ROOT_ENV) {
            Ok(env_path) => PathBuf::from(env_path),
            Err(_) => {
                #[cfg(target_family = "windows")]
                {
                    var("LOCALAPPDATA")
                        .map(PathBuf::from)
                        .unwrap_or_else(|_| PathBuf::from("."))
                        .join(CACHE_DIR_NAME)
                }
                #[cfg(not(target_family = "windows"))]
                {
                    var("HOME")
                        .map(PathBuf::from)
                        .unwrap_or_else(|_| PathBuf::from("."))
                        .join(".cache")
                        .join(CACHE_DIR_NAME)
                }
            }
        };
        let remote_url = match var(CACHE_REMOTE_URL_ENV) {
            Ok(env_value) => match parse_remote_url(&env_value) {
                Ok(value) => value,
                Err(e) => {
                    crate::warn!("Invalid {} value {:?}: {}", CACHE_REMOTE_URL_ENV, env_value, e);
                    default_remote_url()
                }
            },
            Err(_) => default_remote_url(),
        };
        Self { root, remote_url }
    }

    /// Create a cache with an explicit root and remote.
    pub fn with_root(root: impl Into<PathBuf>, remote_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            root: root.into(),
            remote_url: parse_remote_url(remote_url)?,
        })
    }

    /// Same remote, different local root.
    pub fn rooted_at(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Return the local cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the configured remote base URL.
    pub fn remote_url(&self) -> &Url {
        &self.remote_url
    }

    /// Compute the local on-disk path for a logical entry.
    pub fn path(&self, entry: impl AsRef<CacheEntry>) -> PathBuf {
        self.root.join(entry.as_ref().path())
    }

    /// Compute the remote URL for a logical entry.
    pub fn get_url(&self, entry: impl AsRef<CacheEntry>) -> anyhow::Result<Url> {
        let entry = entry.as_ref();
        self.remote_url
            .join(&format!(
                "{}/resolve/{}/{}",
                entry.repo(),
                entry.revision().replace('/', "%2F"),
                entry.filename()
            ))
            .context("Url::join failed")
    }

    /// Resolve an entry to a local file, downloading it on a miss.
    pub async fn get(&self, entry: impl AsRef<CacheEntry>) -> anyhow::Result<PathBuf> {
        let entry = entry.as_ref();
        let path = self.path(entry);
        if filesystem::exists(&path).await {
            crate::debug!("Cache hit: {}", path.display());
            return Ok(path);
        }

        let url = self.get_url(entry)?;
        crate::info!("Downloading {}", url);
        download(&url, &path).await?;
        Ok(path)
    }

    /// Resolve every file `T` claims, yielding `(entry, current, total, path)`
    /// as each one becomes available locally.
    pub fn prepare_files<T>(
        &self,
        key: impl Into<String>,
        ctx: Arc<T::Context>,
    ) -> BoxStream<'static, anyhow::Result<(CacheEntry, usize, usize, PathBuf)>>
    where
        T: TryFromCache + 'static,
        T::Context: 'static,
    {
        let key = key.into();
        let this = self.clone();

        boxed!(try_stream! {
            let claim = T::claim_files(this.clone(), &key, ctx.as_ref()).await?;
            let total_task = claim.entries.len();
            let mut current_task = 0usize;

            let tasks = claim.entries.into_iter().map(|entry| {
                let this = this.clone();
                async move {
                    let res = this.get(&entry).await;
                    (entry, res)
                }
            }).collect::<Vec<_>>();
            let mut futures_strm = futures::stream::iter(tasks).buffer_unordered(4);
            while let Some((entry, res)) = futures_strm.next().await {
                let path = res?;
                current_task += 1;
                yield (entry, current_task, total_task, path);
            }
        })
    }

    /// Builds a typed value from the cache, streaming progress updates.
    ///
    /// Initialization can be slow because it may download files and
    /// initialize hardware, so instead of returning the value directly this
    /// yields [`CacheProgress`] events.
    ///
    /// - The final event satisfies `current_task == total_task` and `result.is_some()`.
    /// - All preceding events have `result == None`.
    pub fn try_create<T>(
        &self,
        key: impl Into<String>,
        ctx: T::Context,
    ) -> BoxStream<'static, anyhow::Result<CacheProgress<T>>>
    where
        T: TryFromCache + 'static,
        T::Context: 'static,
    {
        let root = self.root.clone();
        let ctx = Arc::new(ctx);
        let mut strm = self.prepare_files::<T>(key, ctx.clone());
        boxed!(try_stream! {
            let mut entries = BTreeMap::new();
            let mut total_task: usize = 1;

            while let Some(res) = strm.next().await {
                let (entry, current_task, prepared_total, path) = res?;
                // preparing all files + initialization
                total_task = prepared_total + 1;

                let source = if filesystem::size(&path).await? < EAGER_LOAD_THRESHOLD {
                    ByteSource::Eager(filesystem::read(&path).await?)
                } else {
                    ByteSource::Lazy(path)
                };
                let comment = format!("{} ready", entry.filename());
                entries.insert(entry, source);

                yield CacheProgress::<T> {
                    comment,
                    current_task,
                    total_task,
                    result: None,
                };
            }

            let mut contents = CacheContents { root, entries };
            let value = T::try_from_contents(&mut contents, ctx.as_ref()).await?;
            yield CacheProgress::<T> {
                comment: "Initialized".to_owned(),
                current_task: total_task,
                total_task,
                result: Some(value),
            };
        })
    }

    pub async fn remove(&self, entry: &CacheEntry) -> anyhow::Result<()> {
        filesystem::remove(self.path(entry)).await
    }
}

fn parse_remote_url(value: &str) -> anyhow::Result<Url> {
    // `Url::join` replaces the last path segment unless the base ends with '/'.
    let value = if value.ends_with('/') {
        value.to_owned()
    } else {
        format!("{}/", value)
    };
    Url::parse(&value).with_context(|| format!("invalid remote url {:?}", value))
}

fn default_remote_url() -> Url {
    Url::parse(DEFAULT_REMOTE_URL).expect("default remote url is valid")
}

#[cfg(test)]
mod tests {
    use futures::StreamExt as _;
    use mt5_macros::logged_test;

    use super::*;
    use crate::{cache::CacheClaim, utils::BoxFuture};

    #[derive(Debug)]
    struct Greeting(String);

    impl TryFromCache for Greeting {
        type Context = String;

        fn claim_files<'a>(
            _: Cache,
            key: &'a str,
            ctx: &'a Self::Context,
        ) -> BoxFuture<'a, anyhow::Result<CacheClaim>> {
            Box::pin(async move { Ok(CacheClaim::new([CacheEntry::new(key, ctx)])) })
        }

        fn try_from_contents<'a>(
            contents: &'a mut CacheContents,
            ctx: &'a Self::Context,
        ) -> BoxFuture<'a, anyhow::Result<Self>> {
            Box::pin(async move {
                let (_, source) = contents
                    .remove_with_filename(ctx)
                    .context("greeting file missing")?;
                let bytes = source.into_bytes().await?;
                Ok(Greeting(String::from_utf8(bytes)?))
            })
        }
    }

    fn local_cache(root: &Path) -> Cache {
        // Port 9 (discard) makes any accidental download fail fast.
        Cache::with_root(root, "http://127.0.0.1:9").unwrap()
    }

    #[test]
    fn url_layout_follows_resolve_scheme() {
        let cache = Cache::with_root("/tmp/unused", "https://huggingface.co").unwrap();
        let entry = CacheEntry::new("google/mt5-small", "config.json");
        assert_eq!(
            cache.get_url(&entry).unwrap().as_str(),
            "https://huggingface.co/google/mt5-small/resolve/main/config.json"
        );

        let entry = entry.with_revision("refs/pr/6");
        assert_eq!(
            cache.get_url(&entry).unwrap().as_str(),
            "https://huggingface.co/google/mt5-small/resolve/refs%2Fpr%2F6/config.json"
        );
    }

    #[test]
    fn remote_with_path_keeps_its_prefix() {
        let cache = Cache::with_root("/tmp/unused", "https://mirror.example.com/hf").unwrap();
        let entry = CacheEntry::new("google/mt5-small", "config.json");
        assert_eq!(
            cache.get_url(&entry).unwrap().as_str(),
            "https://mirror.example.com/hf/google/mt5-small/resolve/main/config.json"
        );
    }

    #[logged_test]
    async fn get_returns_local_file_without_download() {
        let dir = tempfile::tempdir().unwrap();
        let cache = local_cache(dir.path());
        let entry = CacheEntry::new("google/mt5-small", "config.json");
        filesystem::write(cache.path(&entry), b"{}", true)
            .await
            .unwrap();

        let path = cache.get(&entry).await.unwrap();
        assert_eq!(
            path,
            dir.path()
                .join("google--mt5-small")
                .join("main")
                .join("config.json")
        );
    }

    #[logged_test]
    async fn interrupted_body_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors.part");
        let body = futures::stream::iter(vec![
            Ok(b"first chunk".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ]);

        let err = stream_into(body, &path).await.unwrap_err();
        assert!(format!("{err:#}").contains("reset"));
        assert!(!path.exists());

        let body = futures::stream::iter(vec![Ok::<_, std::io::Error>(b"whole".to_vec())]);
        stream_into(body, &path).await.unwrap();
        assert_eq!(filesystem::read(&path).await.unwrap(), b"whole");
    }

    #[logged_test]
    async fn revisions_are_cached_separately() {
        let dir = tempfile::tempdir().unwrap();
        let cache = local_cache(dir.path());
        let main = CacheEntry::new("google/mt5-small", "model.safetensors");
        let pr = main.clone().with_revision("refs/pr/6");
        filesystem::write(cache.path(&main), b"main weights", true)
            .await
            .unwrap();
        filesystem::write(cache.path(&pr), b"pr weights", true)
            .await
            .unwrap();

        let main_path = cache.get(&main).await.unwrap();
        let pr_path = cache.get(&pr).await.unwrap();
        assert_ne!(main_path, pr_path);
        assert_eq!(filesystem::read(&pr_path).await.unwrap(), b"pr weights");

        // Only `main` is cached here, so the other revision must not resolve to it.
        cache.remove(&pr).await.unwrap();
        assert!(cache.get(&pr).await.is_err());
    }

    #[logged_test]
    async fn get_fails_when_missing_and_remote_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let cache = local_cache(dir.path());
        let entry = CacheEntry::new("google/mt5-small", "missing.json");
        assert!(cache.get(&entry).await.is_err());
        assert!(!cache.path(&entry).exists());
    }

    #[logged_test]
    async fn try_create_reports_progress_then_value() {
        let dir = tempfile::tempdir().unwrap();
        let cache = local_cache(dir.path());
        let entry = CacheEntry::new("acme/greeter", "hello.txt");
        filesystem::write(cache.path(&entry), b"hello", true)
            .await
            .unwrap();

        let mut strm = cache.try_create::<Greeting>("acme/greeter", "hello.txt".to_owned());
        let mut events = Vec::new();
        while let Some(evt) = strm.next().await {
            events.push(evt.unwrap());
        }

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].comment, "hello.txt ready");
        assert_eq!((events[0].current_task, events[0].total_task), (1, 2));
        assert!(events[0].result.is_none());
        assert_eq!((events[1].current_task, events[1].total_task), (2, 2));
        assert_eq!(events[1].result.as_ref().unwrap().0, "hello");
    }

    #[logged_test]
    async fn remove_deletes_cached_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = local_cache(dir.path());
        let entry = CacheEntry::new("acme/greeter", "hello.txt");
        filesystem::write(cache.path(&entry), b"hello", true)
            .await
            .unwrap();

        cache.remove(&entry).await.unwrap();
        assert!(!cache.path(&entry).exists());
    }
}
