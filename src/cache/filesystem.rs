use std::path::Path;

use anyhow::{Context, bail};
use tokio::fs::{
    create_dir_all as tokio_create_dir_all, metadata as tokio_metadata, read as tokio_read,
    remove_dir_all as tokio_remove_dir, remove_file as tokio_remove_file,
    rename as tokio_rename, write as tokio_write,
};

pub async fn exists(path: impl AsRef<Path>) -> bool {
    tokio_metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

pub async fn size(path: impl AsRef<Path>) -> anyhow::Result<u64> {
    Ok(tokio_metadata(path)
        .await
        .context("tokio::fs::metadata failed")?
        .len())
}

pub async fn read(path: impl AsRef<Path>) -> anyhow::Result<Vec<u8>> {
    tokio_read(path).await.context("tokio::fs::read failed")
}

pub async fn create_parent(path: impl AsRef<Path>) -> anyhow::Result<()> {
    let Some(parent_dir) = path.as_ref().parent() else {
        bail!("No parent directory: {}", path.as_ref().display());
    };
    if !parent_dir.exists() {
        tokio_create_dir_all(parent_dir)
            .await
            .context("tokio::fs::create_dir_all failed")?;
    }
    Ok(())
}

pub async fn write(
    path: impl AsRef<Path>,
    data: impl AsRef<[u8]>,
    create_parent_dir: bool,
) -> anyhow::Result<()> {
    if create_parent_dir {
        create_parent(&path).await?;
    }
    tokio_write(path, data)
        .await
        .context("tokio::fs::write failed")
}

pub async fn rename(from: impl AsRef<Path>, to: impl AsRef<Path>) -> anyhow::Result<()> {
    tokio_rename(from, to)
        .await
        .context("tokio::fs::rename failed")
}

pub async fn remove(path: impl AsRef<Path>) -> anyhow::Result<()> {
    if path.as_ref().is_dir() {
        tokio_remove_dir(path)
            .await
            .context("tokio::fs::remove_dir_all failed")
    } else if path.as_ref().is_file() {
        tokio_remove_file(path)
            .await
            .context("tokio::fs::remove_file failed")
    } else {
        bail!(
            "Neither directory nor file: {}",
            path.as_ref().as_os_str().to_string_lossy()
        )
    }
}
