pub mod browser;
pub mod fetcher;
pub mod walker;

use std::fmt;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::error::WalkError;

pub use browser::ChromeBrowser;
pub use fetcher::HttpFetcher;
pub use walker::{GalleryWalker, Termination};

/// 1-based index into a product's gallery.
pub type Position = u32;

/// A product identifier that is safe to use as a URL segment and a directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProductId(String);

impl ProductId {
    pub fn parse(raw: &str) -> Option<ProductId> {
        let id = raw.trim();
        if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
            return None;
        }
        Some(ProductId(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `<base>/<id>#<anchor>-<position>`
pub fn gallery_url(base: &str, anchor: &str, id: &ProductId, position: Position) -> String {
    format!("{}/{}#{}-{}", base.trim_end_matches('/'), id, anchor, position)
}

/// The image found at one gallery position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateImage {
    pub url: String,
    pub basename: String,
    /// `(width, height)` from a `-<w>-<h>.` filename suffix, when present.
    pub resolution: Option<(u32, u32)>,
}

impl CandidateImage {
    pub fn from_src(src: &str) -> CandidateImage {
        let url = normalize_src(src);
        let basename = basename(&url);
        let resolution = resolution_tag(&basename);
        CandidateImage {
            url,
            basename,
            resolution,
        }
    }

    pub fn is_full_resolution(&self, marker: &str) -> bool {
        self.url.contains(marker)
    }
}

/// Values without an explicit scheme (protocol-relative `//cdn/...`) get `https:`.
fn normalize_src(src: &str) -> String {
    let src = src.trim();
    if has_scheme(src) {
        src.to_string()
    } else {
        format!("https:{}", src)
    }
}

fn has_scheme(s: &str) -> bool {
    match s.split_once(':') {
        Some((scheme, _)) => {
            let mut chars = scheme.chars();
            chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

fn basename(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or(path);
    if name.is_empty() {
        "image".to_string()
    } else {
        name.to_string()
    }
}

fn resolution_tag(basename: &str) -> Option<(u32, u32)> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"-(\d{2,5})-(\d{2,5})\.[A-Za-z0-9]+$").unwrap());
    let caps = re.captures(basename)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// Opens one browser session per product.
#[allow(async_fn_in_trait)]
pub trait GalleryBrowser {
    type Session: GallerySession;

    async fn open_session(&self) -> Result<Self::Session, WalkError>;
}

/// A live browser page owned by exactly one product walk.
#[allow(async_fn_in_trait)]
pub trait GallerySession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), WalkError>;

    /// `Ok(None)` when no element matching `selector` with a `src` shows up in time.
    async fn wait_for_image_src(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Option<String>, WalkError>;

    async fn close(self) -> Result<(), WalkError>;
}

/// Streams an image to disk, returning the number of bytes written.
#[allow(async_fn_in_trait)]
pub trait ImageFetcher {
    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64, WalkError>;
}
