use core::{future::Future, pin::Pin};

use futures::stream::Stream;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Pins a stream or future on the heap.
#[macro_export]
macro_rules! boxed {
    ($e:expr) => {
        Box::pin($e)
    };
}
