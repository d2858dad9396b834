use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostError {
    /// A generation call reached a host that has not completed `initialize()`.
    #[error("model not loaded")]
    NotReady,

    #[error("model load failed: {0:#}")]
    LoadFailure(#[source] anyhow::Error),

    #[error("generation failed: {0:#}")]
    Generation(#[source] anyhow::Error),
}

impl HostError {
    pub fn is_not_ready(&self) -> bool {
        matches!(self, HostError::NotReady)
    }
}
