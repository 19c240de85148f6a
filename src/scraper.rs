use std::collections::HashSet;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use crate::catalog::updater::list_images;
use crate::config::Settings;
use crate::gallery::{GalleryBrowser, GalleryWalker, ImageFetcher, ProductId, Termination};

/// Which products a fetch run should visit.
#[derive(Debug, Default)]
pub struct FetchOptions {
    pub limit: Option<usize>,
    pub only: Vec<String>,
    pub skip_existing: bool,
}

/// Fetch stats returned after all products are walked.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub products: usize,
    pub skipped: usize,
    pub images: usize,
    pub exhausted: usize,
    pub duplicates: usize,
    pub navigation_errors: usize,
    pub download_errors: usize,
    pub setup_errors: usize,
}

impl FetchSummary {
    pub fn errors(&self) -> usize {
        self.navigation_errors + self.download_errors + self.setup_errors
    }
}

/// Narrow the catalog's identifiers down to the ones this run should walk.
pub fn select_products(
    settings: &Settings,
    ids: Vec<ProductId>,
    options: &FetchOptions,
) -> (Vec<ProductId>, usize) {
    let only: HashSet<&str> = options.only.iter().map(|s| s.trim()).collect();
    let mut skipped = 0;
    let mut selected: Vec<ProductId> = ids
        .into_iter()
        .filter(|id| only.is_empty() || only.contains(id.as_str()))
        .filter(|id| {
            if options.skip_existing && has_saved_images(settings, id) {
                info!("Skipping {}: images already on disk", id);
                skipped += 1;
                false
            } else {
                true
            }
        })
        .collect();
    if let Some(limit) = options.limit {
        selected.truncate(limit);
    }
    (selected, skipped)
}

fn has_saved_images(settings: &Settings, id: &ProductId) -> bool {
    let dir = settings.image_root.join(id.as_str());
    dir.is_dir()
        && list_images(&dir, &settings.image_extensions)
            .map(|files| !files.is_empty())
            .unwrap_or(false)
}

/// Walk each product's gallery in catalog order, one at a time.
///
/// A failed product is logged and counted; the batch always continues.
pub async fn fetch_catalog<B: GalleryBrowser, F: ImageFetcher>(
    walker: &GalleryWalker<'_, B, F>,
    products: &[ProductId],
) -> FetchSummary {
    let mut summary = FetchSummary {
        products: products.len(),
        ..FetchSummary::default()
    };

    let pb = ProgressBar::new(products.len() as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("=> "));
    }

    for id in products {
        pb.set_message(id.to_string());
        info!("Starting {}", id);
        let report = walker.walk(id).await;
        summary.images += report.saved.len();

        match &report.termination {
            Termination::NoImageFound { position } => {
                summary.exhausted += 1;
                info!(
                    "{}: {} positions, {} saved, {} skipped, gallery ended at position {}",
                    id,
                    report.visited.len(),
                    report.saved.len(),
                    report.skipped.len(),
                    position
                );
            }
            Termination::DuplicateDetected { position } => {
                summary.duplicates += 1;
                info!(
                    "{}: {} saved, {} skipped, gallery repeated at position {}",
                    id,
                    report.saved.len(),
                    report.skipped.len(),
                    position
                );
            }
            Termination::Error { position, error } => {
                if error.is_download_failure() {
                    summary.download_errors += 1;
                } else {
                    summary.navigation_errors += 1;
                }
                error!("{} aborted at position {}: {}", id, position, error);
                if !report.saved.is_empty() {
                    warn!("{}: kept {} images saved before the failure", id, report.saved.len());
                }
            }
            Termination::NotStarted { error } => {
                summary.setup_errors += 1;
                error!("{} not started: {}", id, error);
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(
        "Fetched {} products: {} images, {} errors",
        summary.products,
        summary.images,
        summary.errors()
    );
    summary
}
