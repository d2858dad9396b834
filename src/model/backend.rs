use candle_core::{Device, Tensor};

use crate::{config::HostConfig, model::DeviceKind};

/// Token ids the decoding loop needs to know about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpecialTokens {
    /// First token fed to the decoder.
    pub decoder_start: u32,
    pub eos: u32,
    pub pad: u32,
}

/// An encoder-decoder network driven one decoding step at a time.
///
/// `encode` runs once per request. `decode` is called once per step with
/// every live hypothesis; all of them have the same length and start with
/// the decoder start token. It returns one row of next-token logits per
/// hypothesis, in the same order.
pub trait Seq2SeqModel: Send {
    fn special_tokens(&self) -> SpecialTokens;

    fn encode(&mut self, input_ids: &[u32]) -> anyhow::Result<Tensor>;

    fn decode(
        &mut self,
        encoded: &Tensor,
        decoder_input_ids: &[Vec<u32>],
    ) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Shared context for the cache-backed loaders of a host.
#[derive(Debug, Clone)]
pub struct LoadContext {
    pub config: HostConfig,
    pub device: Device,
}

impl LoadContext {
    pub fn device_kind(&self) -> DeviceKind {
        DeviceKind::from(&self.device)
    }
}
