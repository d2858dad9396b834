pub(crate) mod backend;
pub(crate) mod device;
pub(crate) mod generation;
pub(crate) mod t5;
pub(crate) mod tokenizer;

pub use backend::{LoadContext, Seq2SeqModel, SpecialTokens};
pub use device::{DeviceKind, DevicePreference, select_device};
pub(crate) use generation::generate;
pub use generation::GenerationConfig;
pub use t5::T5Backend;
pub use tokenizer::Tokenizer;
