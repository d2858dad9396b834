//! Fixtures shared by the unit tests: a tiny word-level tokenizer laid out
//! like the mT5 one (`<pad>` = 0, `</s>` = 1, `<unk>` = 2) and a scripted
//! seq2seq model that records what it was asked to encode.

use std::sync::Arc;

use anyhow::anyhow;
use candle_core::{Device, Tensor};
use parking_lot::Mutex;

use crate::{
    cache::CacheProgress,
    config::HostConfig,
    host::{LoadedModel, ModelLoader},
    model::{DeviceKind, Seq2SeqModel, SpecialTokens, Tokenizer},
    utils::BoxStream,
};

pub const VOCAB: [&str; 16] = [
    "<pad>",
    "</s>",
    "<unk>",
    "summarize",
    ":",
    "hello",
    "world",
    "the",
    "cat",
    "sat",
    "on",
    "mat",
    "a",
    "b",
    "c",
    "word",
];

pub fn token(s: &str) -> u32 {
    VOCAB
        .iter()
        .position(|v| *v == s)
        .unwrap_or_else(|| panic!("{s} is not in the fixture vocabulary")) as u32
}

pub const FIXTURE_TOKENIZER: &str = r#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [
    {"id": 0, "content": "<pad>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
    {"id": 1, "content": "</s>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
    {"id": 2, "content": "<unk>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
  ],
  "normalizer": null,
  "pre_tokenizer": {"type": "Whitespace"},
  "post_processor": {
    "type": "TemplateProcessing",
    "single": [
      {"Sequence": {"id": "A", "type_id": 0}},
      {"SpecialToken": {"id": "</s>", "type_id": 0}}
    ],
    "pair": [
      {"Sequence": {"id": "A", "type_id": 0}},
      {"SpecialToken": {"id": "</s>", "type_id": 0}},
      {"Sequence": {"id": "B", "type_id": 0}},
      {"SpecialToken": {"id": "</s>", "type_id": 0}}
    ],
    "special_tokens": {
      "</s>": {"id": "</s>", "ids": [1], "tokens": ["</s>"]}
    }
  },
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": {
      "<pad>": 0, "</s>": 1, "<unk>": 2, "summarize": 3, ":": 4, "hello": 5,
      "world": 6, "the": 7, "cat": 8, "sat": 9, "on": 10, "mat": 11,
      "a": 12, "b": 13, "c": 14, "word": 15
    },
    "unk_token": "<unk>"
  }
}"#;

pub const SPECIAL: SpecialTokens = SpecialTokens {
    decoder_start: 0,
    eos: 1,
    pad: 0,
};

/// Logits strongly favouring `token`.
pub fn peaked(token: u32) -> Vec<f32> {
    let mut logits = vec![0.0; VOCAB.len()];
    logits[token as usize] = 10.0;
    logits
}

/// Maps a decoder prefix to next-token logits.
pub type Script = Arc<dyn Fn(&[u32]) -> Vec<f32> + Send + Sync>;

/// Emits `words` one after another, then `</s>`. Prefixes that stray from
/// that path get flat logits.
pub fn script_words(words: &[&str]) -> Script {
    let path: Vec<u32> = words.iter().map(|w| token(w)).collect();
    Arc::new(move |prefix: &[u32]| {
        let generated = &prefix[1..];
        if generated == path.as_slice() {
            peaked(token("</s>"))
        } else if generated.len() < path.len() && path.starts_with(generated) {
            peaked(path[generated.len()])
        } else {
            vec![0.0; VOCAB.len()]
        }
    })
}

#[derive(Debug, Default)]
pub struct Recorded {
    pub encoded: Vec<Vec<u32>>,
    pub decode_calls: usize,
}

pub struct StubModel {
    script: Script,
    recorded: Arc<Mutex<Recorded>>,
}

impl StubModel {
    pub fn new(script: Script) -> (Self, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        (
            Self {
                script,
                recorded: recorded.clone(),
            },
            recorded,
        )
    }
}

impl Seq2SeqModel for StubModel {
    fn special_tokens(&self) -> SpecialTokens {
        SPECIAL
    }

    fn encode(&mut self, input_ids: &[u32]) -> anyhow::Result<Tensor> {
        self.recorded.lock().encoded.push(input_ids.to_vec());
        Ok(Tensor::new(input_ids, &Device::Cpu)?.unsqueeze(0)?)
    }

    fn decode(
        &mut self,
        _encoded: &Tensor,
        decoder_input_ids: &[Vec<u32>],
    ) -> anyhow::Result<Vec<Vec<f32>>> {
        self.recorded.lock().decode_calls += 1;
        Ok(decoder_input_ids
            .iter()
            .map(|prefix| (self.script)(prefix))
            .collect())
    }
}

/// A loader that hands out stub models, or fails on demand.
pub struct StubLoader {
    script: Script,
    fail: Mutex<bool>,
    pub recorded: Mutex<Vec<Arc<Mutex<Recorded>>>>,
}

impl StubLoader {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            fail: Mutex::new(false),
            recorded: Mutex::new(Vec::new()),
        })
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    /// Recordings of the most recently loaded model.
    pub fn last_recorded(&self) -> Arc<Mutex<Recorded>> {
        self.recorded
            .lock()
            .last()
            .cloned()
            .expect("no model loaded yet")
    }
}

impl ModelLoader for StubLoader {
    fn load(
        &self,
        _config: HostConfig,
    ) -> BoxStream<'static, anyhow::Result<CacheProgress<LoadedModel>>> {
        let fail = *self.fail.lock();
        let built = if fail {
            None
        } else {
            let (model, recorded) = StubModel::new(self.script.clone());
            self.recorded.lock().push(recorded);
            Some(model)
        };
        Box::pin(async_stream::try_stream! {
            yield CacheProgress {
                comment: "fixture.tokenizer.json ready".to_owned(),
                current_task: 1,
                total_task: 2,
                result: None,
            };
            let model = built.ok_or_else(|| anyhow!("weights unavailable"))?;
            let tokenizer = Tokenizer::new(FIXTURE_TOKENIZER)?;
            yield CacheProgress {
                comment: "Initialized".to_owned(),
                current_task: 2,
                total_task: 2,
                result: Some(LoadedModel::new(Box::new(model), tokenizer, DeviceKind::Cpu)),
            };
        })
    }
}
