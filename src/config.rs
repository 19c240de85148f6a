use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::SettingsError;

const DEFAULT_CONFIG_NAME: &str = "gallery";
const ENV_PREFIX: &str = "GALLERY";

/// Everything the walker and the catalog tools need, loaded once and passed down.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub catalog_path: PathBuf,
    pub image_root: PathBuf,
    pub product_base_url: String,
    pub gallery_anchor: String,
    pub image_selector: String,
    /// Filename substring that marks the full-resolution variant. This is a
    /// naming heuristic of the image host, not a guarantee.
    pub full_res_marker: String,
    pub image_extensions: Vec<String>,
    pub published_base_url: String,
    pub identifier_column: String,
    pub url_column: String,
    pub delimiter: String,
    pub escape: Option<String>,
    pub navigation_timeout_secs: u64,
    pub element_timeout_secs: u64,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            catalog_path: PathBuf::from("product.csv"),
            image_root: PathBuf::from("imagens"),
            product_base_url: "https://loja.elamor.com.br/produtos".into(),
            gallery_anchor: "product-gallery".into(),
            image_selector: "img.fancybox__image".into(),
            full_res_marker: "-1024-1024.webp".into(),
            image_extensions: [".webp", ".jpg", ".jpeg", ".png", ".gif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            published_base_url:
                "https://raw.githubusercontent.com/caiogasparino/get-image-products/refs/heads/main/imagens/"
                    .into(),
            identifier_column: "Identificador URL".into(),
            url_column: "URL image".into(),
            delimiter: ";".into(),
            escape: None,
            navigation_timeout_secs: 60,
            element_timeout_secs: 10,
            headless: true,
            chrome_path: None,
        }
    }
}

/// Command-line values that take precedence over file and environment.
#[derive(Debug, Default)]
pub struct Overrides {
    pub catalog_path: Option<PathBuf>,
    pub image_root: Option<PathBuf>,
}

impl Settings {
    /// Layers: built-in defaults, then `gallery.toml` (or `explicit`), then
    /// `GALLERY_*` environment variables, then CLI overrides.
    pub fn load(explicit: Option<&Path>, overrides: Overrides) -> Result<Self, SettingsError> {
        let file = match explicit {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("image_extensions"),
            )
            .set_override_option(
                "catalog_path",
                overrides.catalog_path.map(|p| p.to_string_lossy().into_owned()),
            )?
            .set_override_option(
                "image_root",
                overrides.image_root.map(|p| p.to_string_lossy().into_owned()),
            )?
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.full_res_marker.is_empty() {
            return Err(invalid("full_res_marker", "must not be empty"));
        }
        single_byte("delimiter", &self.delimiter)?;
        if let Some(escape) = &self.escape {
            single_byte("escape", escape)?;
        }
        if self.navigation_timeout_secs == 0 {
            return Err(invalid("navigation_timeout_secs", "must be positive"));
        }
        if self.element_timeout_secs == 0 {
            return Err(invalid("element_timeout_secs", "must be positive"));
        }
        Ok(())
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_secs)
    }

    pub fn delimiter_byte(&self) -> u8 {
        self.delimiter.as_bytes().first().copied().unwrap_or(b';')
    }

    pub fn escape_byte(&self) -> Option<u8> {
        self.escape.as_deref().and_then(|e| e.as_bytes().first().copied())
    }
}

fn single_byte(key: &'static str, value: &str) -> Result<(), SettingsError> {
    if value.len() == 1 {
        Ok(())
    } else {
        Err(invalid(key, format!("expected a single ASCII character, got {value:?}")))
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> SettingsError {
    SettingsError::Invalid {
        key,
        reason: reason.into(),
    }
}
