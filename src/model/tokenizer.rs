use std::str::FromStr;

use anyhow::{Context, anyhow};
use tokenizers::{PaddingParams, TruncationParams, tokenizer::Tokenizer as HFTokenizer};

use crate::{
    cache::{Cache, CacheClaim, CacheContents, CacheEntry, TryFromCache},
    model::LoadContext,
    utils::BoxFuture,
};

const PAD_TOKEN: &str = "<pad>";

#[derive(Debug, Clone)]
pub struct Tokenizer {
    inner: HFTokenizer,
    pad_id: u32,
}

impl Tokenizer {
    pub fn new(config: &str) -> anyhow::Result<Self> {
        let inner = HFTokenizer::from_str(config)
            .map_err(|e| anyhow!("Tokenizer::from_str failed: {}", e))?;
        let pad_id = inner.token_to_id(PAD_TOKEN).unwrap_or(0);
        Ok(Tokenizer { inner, pad_id })
    }

    /// Encode `text` with the tokenizer's special tokens, truncated so the
    /// result (special tokens included) holds at most `max_length` ids.
    pub fn encode(&mut self, text: &str, max_length: usize) -> anyhow::Result<Vec<u32>> {
        self.inner
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow!("Tokenizer::with_truncation failed: {}", e))?;
        self.inner.with_padding(Some(PaddingParams {
            pad_id: self.pad_id,
            pad_token: PAD_TOKEN.to_owned(),
            ..Default::default()
        }));
        let encoded = self
            .inner
            .encode(text, true)
            .map_err(|e| anyhow!("Tokenizer::encode failed: {}", e))?;
        Ok(encoded.get_ids().to_vec())
    }

    pub fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> anyhow::Result<String> {
        self.inner
            .decode(ids, skip_special_tokens)
            .map_err(|e| anyhow!("Tokenizer::decode failed: {}", e))
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

impl TryFromCache for Tokenizer {
    type Context = LoadContext;

    fn claim_files<'a>(
        _: Cache,
        _: &'a str,
        ctx: &'a Self::Context,
    ) -> BoxFuture<'a, anyhow::Result<CacheClaim>> {
        let entry = CacheEntry::new(&ctx.config.tokenizer_repo, &ctx.config.tokenizer_file);
        Box::pin(async move { Ok(CacheClaim::new([entry])) })
    }

    fn try_from_contents<'a>(
        contents: &'a mut CacheContents,
        ctx: &'a Self::Context,
    ) -> BoxFuture<'a, anyhow::Result<Self>> {
        Box::pin(async move {
            let entry = CacheEntry::new(&ctx.config.tokenizer_repo, &ctx.config.tokenizer_file);
            let source = contents
                .remove(&entry)
                .with_context(|| format!("{} not fetched", entry.filename()))?;
            let bytes = source.into_bytes().await?;
            let text = std::str::from_utf8(&bytes)
                .with_context(|| format!("{} is not valid utf-8", entry.filename()))?;
            Tokenizer::new(text)
        })
    }
}
