use std::process::ExitCode;

use futures::StreamExt as _;
use mt5_service::{HostConfig, ModelHost};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Loading local mT5 model (no API endpoints configured)...");
    let host = ModelHost::new(HostConfig::default());
    let mut strm = host.initialize_stream();
    while let Some(progress) = strm.next().await {
        match progress {
            Ok(progress) if progress.result.is_some() => {
                log::info!("Ready on {:?}", host.device());
                return ExitCode::SUCCESS;
            }
            Ok(progress) => log::info!(
                "[{}/{}] {}",
                progress.current_task,
                progress.total_task,
                progress.comment
            ),
            Err(e) => {
                log::error!("{e}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::FAILURE
}
