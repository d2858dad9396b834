pub mod cache;
pub mod config;
pub(crate) mod constants;
pub mod error;
pub mod host;
pub mod model;
pub mod service;
pub mod utils;

#[cfg(test)]
mod testing;

pub use config::HostConfig;
pub use error::HostError;
pub use host::{CacheModelLoader, LoadedModel, ModelHost, ModelLoader};
pub use model::{DeviceKind, DevicePreference, GenerationConfig};
pub use service::GenerationService;
