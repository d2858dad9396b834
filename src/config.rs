use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{
    cache::Cache,
    constants::{
        MODEL_CONFIG_FILE, MODEL_NAME, MODEL_REVISION, MODEL_WEIGHTS_FILE, TOKENIZER_FILE,
        TOKENIZER_REPO,
    },
    model::DevicePreference,
};

/// Where the host gets its model from and where it runs it.
///
/// The default describes `google/mt5-small` with the `tokenizers` JSON from
/// `lmz/mt5-tokenizers`, placed on the best available device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostConfig {
    pub model_id: String,
    pub revision: String,
    pub config_file: String,
    pub weights_file: String,
    pub tokenizer_repo: String,
    pub tokenizer_file: String,
    pub device: DevicePreference,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_root: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            model_id: MODEL_NAME.to_owned(),
            revision: MODEL_REVISION.to_owned(),
            config_file: MODEL_CONFIG_FILE.to_owned(),
            weights_file: MODEL_WEIGHTS_FILE.to_owned(),
            tokenizer_repo: TOKENIZER_REPO.to_owned(),
            tokenizer_file: TOKENIZER_FILE.to_owned(),
            device: DevicePreference::default(),
            cache_root: None,
        }
    }
}

impl HostConfig {
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    pub fn with_weights_file(mut self, weights_file: impl Into<String>) -> Self {
        self.weights_file = weights_file.into();
        self
    }

    pub fn with_tokenizer(
        mut self,
        repo: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        self.tokenizer_repo = repo.into();
        self.tokenizer_file = filename.into();
        self
    }

    pub fn with_device(mut self, device: DevicePreference) -> Self {
        self.device = device;
        self
    }

    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(root.into());
        self
    }

    /// The cache artifacts are resolved through.
    pub fn cache(&self) -> Cache {
        match &self.cache_root {
            Some(root) => Cache::new().rooted_at(root),
            None => Cache::new(),
        }
    }
}
