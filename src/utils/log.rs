//! Crate-local logging macros on top of the `log` facade.

#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => { ::log::debug!(target: "mt5_service", $($arg)+) };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => { ::log::info!(target: "mt5_service", $($arg)+) };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => { ::log::warn!(target: "mt5_service", $($arg)+) };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => { ::log::error!(target: "mt5_service", $($arg)+) };
}
