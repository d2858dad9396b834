pub(crate) mod boxed;
pub(crate) mod log;
pub(crate) mod sleep;

pub use boxed::*;
pub(crate) use sleep::*;
