/// Pretrained checkpoint served by the host.
pub const MODEL_NAME: &str = "google/mt5-small";

/// `google/mt5-small` only ships a sentencepiece model; this repository
/// carries the equivalent `tokenizers` JSON.
pub const TOKENIZER_REPO: &str = "lmz/mt5-tokenizers";
pub const TOKENIZER_FILE: &str = "mt5-small.tokenizer.json";

pub const MODEL_CONFIG_FILE: &str = "config.json";
pub const MODEL_WEIGHTS_FILE: &str = "model.safetensors";
pub const MODEL_REVISION: &str = "main";

pub const SUMMARIZE_PREFIX: &str = "summarize: ";
pub const SUMMARIZE_INPUT_CAP: usize = 512;
pub const CHAT_INPUT_CAP: usize = 1024;

pub const NO_REPEAT_NGRAM_SIZE: usize = 3;
pub const CHAT_NUM_BEAMS: usize = 4;

pub const CACHE_DIR_NAME: &str = "mt5-service";
pub const CACHE_ROOT_ENV: &str = "MT5_CACHE_ROOT";
pub const CACHE_REMOTE_URL_ENV: &str = "MT5_CACHE_REMOTE_URL";
pub const DEFAULT_REMOTE_URL: &str = "https://huggingface.co/";

pub const SUMMARIZE_MAX_LENGTH: usize = 128;
pub const SUMMARIZE_NUM_BEAMS: usize = 4;
pub const CHAT_MAX_LENGTH: usize = 256;
