use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::ImageFetcher;
use crate::error::WalkError;

/// Plain streaming GET into a file.
///
/// No transfer timeout is applied, so a stalled server stalls the whole run.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        HttpFetcher { client }
    }

    async fn stream_to(&self, url: &str, part: &Path) -> Result<u64, WalkError> {
        let download = |source| WalkError::Download {
            url: url.to_string(),
            source,
        };
        let write = |source| WalkError::Write {
            path: part.to_path_buf(),
            source,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(download)?;

        let mut file = tokio::fs::File::create(part).await.map_err(write)?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(download)?;
            file.write_all(&chunk).await.map_err(write)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(write)?;
        Ok(written)
    }
}

impl ImageFetcher for HttpFetcher {
    /// Bytes land in `<dest>.part` first and are renamed over `dest` once complete.
    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64, WalkError> {
        let part = part_path(dest);
        match self.stream_to(url, &part).await {
            Ok(written) => {
                tokio::fs::rename(&part, dest)
                    .await
                    .map_err(|source| WalkError::Write {
                        path: dest.to_path_buf(),
                        source,
                    })?;
                debug!("Fetched {} -> {}", url, dest.display());
                Ok(written)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}
