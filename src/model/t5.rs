use anyhow::{Context, anyhow};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::t5;

use crate::{
    cache::{ByteSource, Cache, CacheClaim, CacheContents, CacheEntry, TryFromCache},
    model::{LoadContext, Seq2SeqModel, SpecialTokens},
    utils::BoxFuture,
};

/// mT5 (or any T5-family) checkpoint running on candle.
pub struct T5Backend {
    model: t5::T5ForConditionalGeneration,
    device: Device,
    special: SpecialTokens,
}

impl std::fmt::Debug for T5Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("T5Backend")
            .field("device", &self.device)
            .field("special", &self.special)
            .finish_non_exhaustive()
    }
}

impl T5Backend {
    pub fn new(config: &str, weights: ByteSource, device: &Device) -> anyhow::Result<Self> {
        let mut config: t5::Config =
            serde_json::from_str(config).context("invalid model config.json")?;
        // Every decoding step re-runs the full prefix; beams change order
        // between steps so a per-row KV cache would be wrong.
        config.use_cache = false;

        let tensors = match weights {
            ByteSource::Lazy(path) => candle_core::safetensors::load(&path, device)
                .with_context(|| format!("failed to load {}", path.display()))?,
            ByteSource::Eager(bytes) => candle_core::safetensors::load_buffer(&bytes, device)
                .context("failed to load weights")?,
        };
        let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
        let model = t5::T5ForConditionalGeneration::load(vb, &config)
            .map_err(|e| anyhow!("failed to build T5 model: {e}"))?;

        let pad = config.pad_token_id as u32;
        let special = SpecialTokens {
            decoder_start: config.decoder_start_token_id.map_or(pad, |id| id as u32),
            eos: config.eos_token_id as u32,
            pad,
        };

        Ok(Self {
            model,
            device: device.clone(),
            special,
        })
    }
}

impl Seq2SeqModel for T5Backend {
    fn special_tokens(&self) -> SpecialTokens {
        self.special
    }

    fn encode(&mut self, input_ids: &[u32]) -> anyhow::Result<Tensor> {
        self.model.clear_kv_cache();
        let input = Tensor::new(input_ids, &self.device)?.unsqueeze(0)?;
        Ok(self.model.encode(&input)?)
    }

    fn decode(
        &mut self,
        encoded: &Tensor,
        decoder_input_ids: &[Vec<u32>],
    ) -> anyhow::Result<Vec<Vec<f32>>> {
        let batch = decoder_input_ids.len();
        let len = decoder_input_ids.first().map_or(0, Vec::len);
        if decoder_input_ids.iter().any(|ids| ids.len() != len) {
            return Err(anyhow!("decoder prefixes must share one length"));
        }

        let flat: Vec<u32> = decoder_input_ids.iter().flatten().copied().collect();
        let decoder_input = Tensor::from_vec(flat, (batch, len), &self.device)?;
        let (_, seq_len, hidden) = encoded.dims3()?;
        let encoder_output = encoded
            .broadcast_as((batch, seq_len, hidden))?
            .contiguous()?;

        let logits = self.model.decode(&decoder_input, &encoder_output)?;
        Ok(logits.to_dtype(DType::F32)?.to_vec2::<f32>()?)
    }
}

impl TryFromCache for T5Backend {
    type Context = LoadContext;

    fn claim_files<'a>(
        _: Cache,
        key: &'a str,
        ctx: &'a Self::Context,
    ) -> BoxFuture<'a, anyhow::Result<CacheClaim>> {
        Box::pin(async move {
            let revision = &ctx.config.revision;
            Ok(CacheClaim::new([
                CacheEntry::new(key, &ctx.config.config_file).with_revision(revision),
                CacheEntry::new(key, &ctx.config.weights_file).with_revision(revision),
            ]))
        })
    }

    fn try_from_contents<'a>(
        contents: &'a mut CacheContents,
        ctx: &'a Self::Context,
    ) -> BoxFuture<'a, anyhow::Result<Self>> {
        Box::pin(async move {
            let (_, config) = contents
                .remove_with_filename(&ctx.config.config_file)
                .with_context(|| format!("{} not fetched", ctx.config.config_file))?;
            let config = config.into_bytes().await?;
            let config =
                std::str::from_utf8(&config).context("model config.json is not valid utf-8")?;

            let (_, weights) = contents
                .remove_with_filename(&ctx.config.weights_file)
                .with_context(|| format!("{} not fetched", ctx.config.weights_file))?;

            crate::debug!("building T5 model on {:?}", ctx.device);
            T5Backend::new(config, weights, &ctx.device)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;

    #[tokio::test]
    async fn claims_config_and_weights_at_revision() {
        let ctx = LoadContext {
            config: HostConfig::default().with_revision("refs/pr/1"),
            device: Device::Cpu,
        };
        let claim = T5Backend::claim_files(Cache::default(), "google/mt5-small", &ctx)
            .await
            .unwrap();
        let files: Vec<_> = claim.entries.iter().map(|e| e.filename()).collect();
        assert_eq!(files, vec!["config.json", "model.safetensors"]);
        assert!(claim.entries.iter().all(|e| e.revision() == "refs/pr/1"));
        assert!(claim.entries.iter().all(|e| e.repo() == "google/mt5-small"));
    }

    #[test]
    fn broken_config_is_rejected() {
        let err = T5Backend::new("{}", ByteSource::Eager(Vec::new()), &Device::Cpu).unwrap_err();
        assert!(format!("{err:#}").contains("config.json"));
    }
}
