use std::sync::Arc;

use anyhow::anyhow;
use async_stream::{stream, try_stream};
use futures::StreamExt as _;
use parking_lot::{Mutex, RwLock};

use crate::{
    boxed,
    cache::{Cache, CacheClaim, CacheContents, CacheProgress, TryFromCache},
    config::HostConfig,
    error::HostError,
    model::{
        DeviceKind, GenerationConfig, LoadContext, Seq2SeqModel, T5Backend, Tokenizer, generate,
        select_device,
    },
    utils::{BoxFuture, BoxStream},
};

/// Produces a ready model for a [`ModelHost`].
///
/// The stream follows the [`Cache::try_create`] contract: progress events
/// with `result == None`, then one final event carrying the model.
pub trait ModelLoader: Send + Sync {
    fn load(&self, config: HostConfig)
    -> BoxStream<'static, anyhow::Result<CacheProgress<LoadedModel>>>;
}

/// Loads the tokenizer and T5 weights through the artifact cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheModelLoader;

impl ModelLoader for CacheModelLoader {
    fn load(
        &self,
        config: HostConfig,
    ) -> BoxStream<'static, anyhow::Result<CacheProgress<LoadedModel>>> {
        boxed!(try_stream! {
            let device = select_device(config.device)?;
            crate::info!("Using device: {:?}", device);

            let cache = config.cache();
            let key = config.model_id.clone();
            let mut strm = cache.try_create::<LoadedModel>(key, LoadContext { config, device });
            while let Some(progress) = strm.next().await {
                yield progress?;
            }
        })
    }
}

/// A tokenizer and a seq2seq model that were loaded together.
pub struct LoadedModel {
    model: Box<dyn Seq2SeqModel>,
    tokenizer: Tokenizer,
    device: DeviceKind,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("special", &self.model.special_tokens())
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl LoadedModel {
    pub fn new(model: Box<dyn Seq2SeqModel>, tokenizer: Tokenizer, device: DeviceKind) -> Self {
        Self {
            model,
            tokenizer,
            device,
        }
    }

    pub fn device(&self) -> DeviceKind {
        self.device
    }

    /// Encode `prompt` (truncated to `input_cap` tokens), decode with
    /// `config` and detokenize without special tokens.
    pub(crate) fn generate(
        &mut self,
        prompt: &str,
        input_cap: usize,
        config: &GenerationConfig,
    ) -> anyhow::Result<String> {
        let input_ids = self.tokenizer.encode(prompt, input_cap)?;
        crate::debug!("encoded prompt into {} tokens", input_ids.len());

        let special = self.model.special_tokens();
        let model = &mut self.model;
        let encoded = model.encode(&input_ids)?;
        let output = generate(config, special, |prefixes| model.decode(&encoded, prefixes))?;

        self.tokenizer.decode(&output, true)
    }
}

impl TryFromCache for LoadedModel {
    type Context = LoadContext;

    fn claim_files<'a>(
        cache: Cache,
        key: &'a str,
        ctx: &'a Self::Context,
    ) -> BoxFuture<'a, anyhow::Result<CacheClaim>> {
        Box::pin(async move {
            let mut entries = Tokenizer::claim_files(cache.clone(), key, ctx).await?.entries;
            entries.extend(T5Backend::claim_files(cache, key, ctx).await?.entries);
            Ok(CacheClaim::new(entries))
        })
    }

    fn try_from_contents<'a>(
        contents: &'a mut CacheContents,
        ctx: &'a Self::Context,
    ) -> BoxFuture<'a, anyhow::Result<Self>> {
        Box::pin(async move {
            let tokenizer = Tokenizer::try_from_contents(contents, ctx).await?;
            let model = T5Backend::try_from_contents(contents, ctx).await?;
            Ok(LoadedModel::new(
                Box::new(model),
                tokenizer,
                ctx.device_kind(),
            ))
        })
    }
}

enum HostState {
    Unloaded,
    Ready {
        model: Arc<Mutex<LoadedModel>>,
        device: DeviceKind,
    },
}

/// Owns the loaded model for the lifetime of the process.
///
/// A host starts unloaded. [`initialize`](Self::initialize) loads the model
/// and swaps it in only once loading has fully succeeded, so a failed
/// reload leaves a previously loaded model in service.
pub struct ModelHost {
    config: HostConfig,
    loader: Arc<dyn ModelLoader>,
    state: RwLock<HostState>,
}

impl ModelHost {
    pub fn new(config: HostConfig) -> Self {
        Self::with_loader(config, Arc::new(CacheModelLoader))
    }

    pub fn with_loader(config: HostConfig, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            config,
            loader,
            state: RwLock::new(HostState::Unloaded),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Load the model, yielding one event per fetched file and a final
    /// event once the model is in service.
    pub fn initialize_stream(&self) -> BoxStream<'_, Result<CacheProgress<()>, HostError>> {
        boxed!(stream! {
            crate::info!("Loading {} model...", self.config.model_id);
            let mut strm = self.loader.load(self.config.clone());
            while let Some(progress) = strm.next().await {
                let CacheProgress { comment, current_task, total_task, result } = match progress {
                    Ok(progress) => progress,
                    Err(e) => {
                        yield Err(load_failed(e));
                        return;
                    }
                };
                crate::debug!("{} ({}/{})", comment, current_task, total_task);

                let loaded = match result {
                    Some(loaded) => loaded,
                    None => {
                        yield Ok(CacheProgress { comment, current_task, total_task, result: None });
                        continue;
                    }
                };
                let device = loaded.device();
                *self.state.write() = HostState::Ready {
                    model: Arc::new(Mutex::new(loaded)),
                    device,
                };
                crate::info!("Model loaded successfully!");
                yield Ok(CacheProgress { comment, current_task, total_task, result: Some(()) });
                return;
            }
            yield Err(load_failed(anyhow!("loader finished without producing a model")));
        })
    }

    pub async fn initialize(&self) -> Result<(), HostError> {
        let mut strm = self.initialize_stream();
        while let Some(progress) = strm.next().await {
            if progress?.result.is_some() {
                return Ok(());
            }
        }
        Err(HostError::LoadFailure(anyhow!("initialization ended early")))
    }

    /// [`initialize`](Self::initialize) reduced to a success flag.
    pub async fn initialize_ok(&self) -> bool {
        self.initialize().await.is_ok()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.read(), HostState::Ready { .. })
    }

    pub fn device(&self) -> Option<DeviceKind> {
        match &*self.state.read() {
            HostState::Ready { device, .. } => Some(*device),
            HostState::Unloaded => None,
        }
    }

    pub(crate) fn acquire(&self) -> Result<Arc<Mutex<LoadedModel>>, HostError> {
        match &*self.state.read() {
            HostState::Ready { model, .. } => Ok(model.clone()),
            HostState::Unloaded => Err(HostError::NotReady),
        }
    }
}

fn load_failed(e: anyhow::Error) -> HostError {
    crate::error!("Error loading model: {:#}", e);
    HostError::LoadFailure(e)
}
