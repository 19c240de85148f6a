use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures that end a product's gallery session early.
///
/// A missing gallery element is not in here: that is the normal
/// end-of-gallery signal and is reported as a termination, not an error.
#[derive(Debug, Error)]
pub enum WalkError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("failed to create image directory {}: {source}", path.display())]
    Setup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("navigation to {url} timed out after {}s", timeout.as_secs())]
    NavigationTimeout { url: String, timeout: Duration },

    #[error("page query failed: {0}")]
    Page(String),

    #[error("download of {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WalkError {
    /// True for errors raised while saving an accepted image.
    pub fn is_download_failure(&self) -> bool {
        matches!(self, WalkError::Download { .. } | WalkError::Write { .. })
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("column {column:?} not found in header of {}", path.display())]
    MissingColumn { column: String, path: PathBuf },
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
