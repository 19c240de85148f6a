use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{
    gallery_url, CandidateImage, GalleryBrowser, GallerySession, ImageFetcher, Position, ProductId,
};
use crate::config::Settings;
use crate::error::WalkError;

/// Why a product's walk stopped.
#[derive(Debug)]
pub enum Termination {
    /// No gallery element at `position`: the gallery is exhausted.
    NoImageFound { position: Position },
    /// The image at `position` was already saved earlier in this walk.
    DuplicateDetected { position: Position },
    Error { position: Position, error: WalkError },
    /// The product directory or the browser could not be set up; no position was opened.
    NotStarted { error: WalkError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedImage {
    pub position: Position,
    pub url: String,
    pub path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug)]
pub struct WalkReport {
    pub product: ProductId,
    /// Positions evaluated, in order. Always `1..=k`.
    pub visited: Vec<Position>,
    pub saved: Vec<SavedImage>,
    pub skipped: Vec<Position>,
    pub termination: Termination,
}

/// Result of evaluating a single position.
enum Step {
    Accepted(SavedImage),
    Skipped,
    Terminated(Termination),
}

/// Per-walk state. Dropped when the walk ends, so nothing crosses products.
struct Walk<'a> {
    product: &'a ProductId,
    dir: PathBuf,
    downloaded: HashSet<String>,
    visited: Vec<Position>,
    saved: Vec<SavedImage>,
    skipped: Vec<Position>,
}

/// Walks product galleries one position at a time.
pub struct GalleryWalker<'s, B, F> {
    settings: &'s Settings,
    browser: B,
    fetcher: F,
}

impl<'s, B: GalleryBrowser, F: ImageFetcher> GalleryWalker<'s, B, F> {
    pub fn new(settings: &'s Settings, browser: B, fetcher: F) -> Self {
        GalleryWalker {
            settings,
            browser,
            fetcher,
        }
    }

    pub fn product_dir(&self, product: &ProductId) -> PathBuf {
        self.settings.image_root.join(product.as_str())
    }

    /// Run one session for `product`. Never fails: every failure is folded into
    /// the report's termination so the caller can move on to the next product.
    pub async fn walk(&self, product: &ProductId) -> WalkReport {
        let mut walk = Walk {
            product,
            dir: self.product_dir(product),
            downloaded: HashSet::new(),
            visited: Vec::new(),
            saved: Vec::new(),
            skipped: Vec::new(),
        };

        let termination = match self.start(&walk.dir).await {
            Ok(mut session) => {
                let termination = self.run(&mut session, &mut walk).await;
                // Released here on every outcome of `run`.
                if let Err(e) = session.close().await {
                    warn!("Failed to close browser for {}: {}", product, e);
                }
                termination
            }
            Err(error) => Termination::NotStarted { error },
        };

        WalkReport {
            product: product.clone(),
            visited: walk.visited,
            saved: walk.saved,
            skipped: walk.skipped,
            termination,
        }
    }

    async fn start(&self, dir: &Path) -> Result<B::Session, WalkError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| WalkError::Setup {
                path: dir.to_path_buf(),
                source,
            })?;
        self.browser.open_session().await
    }

    async fn run(&self, session: &mut B::Session, walk: &mut Walk<'_>) -> Termination {
        let mut position: Position = 1;
        loop {
            walk.visited.push(position);
            match self.evaluate(session, walk, position).await {
                Step::Accepted(image) => {
                    info!(
                        "Saved {} from {} ({} bytes)",
                        image.path.display(),
                        image.url,
                        image.bytes
                    );
                    walk.saved.push(image);
                }
                Step::Skipped => {
                    walk.skipped.push(position);
                }
                Step::Terminated(termination) => return termination,
            }
            position += 1;
        }
    }

    async fn evaluate(
        &self,
        session: &mut B::Session,
        walk: &mut Walk<'_>,
        position: Position,
    ) -> Step {
        let settings = self.settings;
        let url = gallery_url(
            &settings.product_base_url,
            &settings.gallery_anchor,
            walk.product,
            position,
        );
        debug!("Opening {}", url);

        if let Err(error) = session.navigate(&url, settings.navigation_timeout()).await {
            return Step::Terminated(Termination::Error { position, error });
        }

        let src = match session
            .wait_for_image_src(&settings.image_selector, settings.element_timeout())
            .await
        {
            Ok(Some(src)) => src,
            Ok(None) => {
                info!("No image at {} position {}, gallery done", walk.product, position);
                return Step::Terminated(Termination::NoImageFound { position });
            }
            Err(error) => return Step::Terminated(Termination::Error { position, error }),
        };

        let candidate = CandidateImage::from_src(&src);
        if !candidate.is_full_resolution(&settings.full_res_marker) {
            info!(
                "Skipping {} position {}: not full resolution ({:?})",
                walk.product, position, candidate.resolution
            );
            return Step::Skipped;
        }

        if walk.downloaded.contains(&candidate.url) {
            info!(
                "Image at {} position {} repeats an earlier one, gallery wrapped",
                walk.product, position
            );
            return Step::Terminated(Termination::DuplicateDetected { position });
        }
        walk.downloaded.insert(candidate.url.clone());

        let path = walk.dir.join(format!("{}-{}", position, candidate.basename));
        match self.fetcher.fetch_to(&candidate.url, &path).await {
            Ok(bytes) => Step::Accepted(SavedImage {
                position,
                url: candidate.url,
                path,
                bytes,
            }),
            Err(error) => Step::Terminated(Termination::Error { position, error }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;

    #[derive(Clone)]
    enum Slot {
        Image(&'static str),
        NavFail,
    }

    #[derive(Default)]
    struct Log {
        opened: usize,
        closed: usize,
        navigated: Vec<Position>,
        current: Option<Position>,
    }

    /// In-memory gallery: positions not in `slots` have no image element.
    #[derive(Clone)]
    struct FixtureBrowser {
        slots: Arc<HashMap<Position, Slot>>,
        log: Arc<Mutex<Log>>,
        fail_launch: bool,
    }

    impl FixtureBrowser {
        fn new(slots: Vec<(Position, Slot)>) -> Self {
            FixtureBrowser {
                slots: Arc::new(slots.into_iter().collect()),
                log: Arc::default(),
                fail_launch: false,
            }
        }

        fn log(&self) -> std::sync::MutexGuard<'_, Log> {
            self.log.lock().unwrap()
        }

        fn open_close_counts(&self) -> (usize, usize) {
            let log = self.log();
            (log.opened, log.closed)
        }
    }

    struct FixtureSession {
        slots: Arc<HashMap<Position, Slot>>,
        log: Arc<Mutex<Log>>,
    }

    impl GalleryBrowser for FixtureBrowser {
        type Session = FixtureSession;

        async fn open_session(&self) -> Result<FixtureSession, WalkError> {
            if self.fail_launch {
                return Err(WalkError::Launch("no chrome".into()));
            }
            self.log().opened += 1;
            Ok(FixtureSession {
                slots: Arc::clone(&self.slots),
                log: Arc::clone(&self.log),
            })
        }
    }

    impl GallerySession for FixtureSession {
        async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), WalkError> {
            let position: Position = url.rsplit('-').next().unwrap().parse().unwrap();
            let mut log = self.log.lock().unwrap();
            log.navigated.push(position);
            log.current = Some(position);
            if let Some(Slot::NavFail) = self.slots.get(&position) {
                return Err(WalkError::NavigationTimeout {
                    url: url.to_string(),
                    timeout: Duration::from_secs(60),
                });
            }
            Ok(())
        }

        async fn wait_for_image_src(
            &mut self,
            _selector: &str,
            _timeout: Duration,
        ) -> Result<Option<String>, WalkError> {
            let position = self.log.lock().unwrap().current.unwrap();
            Ok(match self.slots.get(&position) {
                Some(Slot::Image(src)) => Some(src.to_string()),
                _ => None,
            })
        }

        async fn close(self) -> Result<(), WalkError> {
            self.log.lock().unwrap().closed += 1;
            Ok(())
        }
    }

    /// Writes the URL itself as the file body. URLs containing "broken" fail.
    struct FixtureFetcher;

    impl ImageFetcher for FixtureFetcher {
        async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64, WalkError> {
            if url.contains("broken") {
                return Err(WalkError::Write {
                    path: dest.to_path_buf(),
                    source: std::io::Error::other("disk full"),
                });
            }
            std::fs::write(dest, url.as_bytes()).unwrap();
            Ok(url.len() as u64)
        }
    }

    fn settings(root: &Path) -> Settings {
        Settings {
            image_root: root.to_path_buf(),
            product_base_url: "https://shop.test/produtos".into(),
            ..Settings::default()
        }
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn product() -> ProductId {
        ProductId::parse("vestido").unwrap()
    }

    #[tokio::test]
    async fn stops_at_first_missing_position() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());
        let browser = FixtureBrowser::new(vec![
            (1, Slot::Image("//cdn.test/a-1024-1024.webp")),
            (2, Slot::Image("//cdn.test/b-1024-1024.webp?v=2")),
            (3, Slot::Image("https://cdn.test/c-1024-1024.webp")),
        ]);
        let walker = GalleryWalker::new(&settings, browser.clone(), FixtureFetcher);

        let report = walker.walk(&product()).await;

        assert!(matches!(report.termination, Termination::NoImageFound { position: 4 }));
        assert_eq!(report.visited, vec![1, 2, 3, 4]);
        assert_eq!(report.saved.len(), 3);
        assert_eq!(
            files_in(&tmp.path().join("vestido")),
            vec!["1-a-1024-1024.webp", "2-b-1024-1024.webp", "3-c-1024-1024.webp"]
        );
        let body = std::fs::read_to_string(tmp.path().join("vestido/1-a-1024-1024.webp")).unwrap();
        assert_eq!(body, "https://cdn.test/a-1024-1024.webp");
        assert_eq!(browser.log().navigated, vec![1, 2, 3, 4]);
        assert_eq!(browser.open_close_counts(), (1, 1));
    }

    #[tokio::test]
    async fn empty_gallery_saves_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());
        let browser = FixtureBrowser::new(vec![]);
        let walker = GalleryWalker::new(&settings, browser.clone(), FixtureFetcher);

        let report = walker.walk(&product()).await;

        assert!(matches!(report.termination, Termination::NoImageFound { position: 1 }));
        assert!(report.saved.is_empty());
        // Directory exists even when nothing was saved.
        assert!(tmp.path().join("vestido").is_dir());
        assert_eq!(browser.log().closed, 1);
    }

    #[tokio::test]
    async fn duplicate_ends_walk_without_saving() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());
        let browser = FixtureBrowser::new(vec![
            (1, Slot::Image("//cdn.test/a-1024-1024.webp")),
            (2, Slot::Image("//cdn.test/b-1024-1024.webp")),
            (3, Slot::Image("//cdn.test/c-1024-1024.webp")),
            (4, Slot::Image("//cdn.test/b-1024-1024.webp")),
            (5, Slot::Image("//cdn.test/e-1024-1024.webp")),
        ]);
        let walker = GalleryWalker::new(&settings, browser.clone(), FixtureFetcher);

        let report = walker.walk(&product()).await;

        assert!(matches!(
            report.termination,
            Termination::DuplicateDetected { position: 4 }
        ));
        assert_eq!(report.visited, vec![1, 2, 3, 4]);
        assert_eq!(
            files_in(&tmp.path().join("vestido")),
            vec!["1-a-1024-1024.webp", "2-b-1024-1024.webp", "3-c-1024-1024.webp"]
        );
        assert_eq!(browser.log().closed, 1);
    }

    #[tokio::test]
    async fn low_resolution_position_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());
        let browser = FixtureBrowser::new(vec![
            (1, Slot::Image("//cdn.test/a-1024-1024.webp")),
            (2, Slot::Image("//cdn.test/a-480-480.webp")),
            (3, Slot::Image("//cdn.test/c-1024-1024.webp")),
            (4, Slot::Image("//cdn.test/a-480-480.webp")),
        ]);
        let walker = GalleryWalker::new(&settings, browser.clone(), FixtureFetcher);

        let report = walker.walk(&product()).await;

        // The repeated thumbnail at 4 is not a duplicate: skipped images are never recorded.
        assert_eq!(report.skipped, vec![2, 4]);
        assert!(matches!(report.termination, Termination::NoImageFound { position: 5 }));
        assert_eq!(
            files_in(&tmp.path().join("vestido")),
            vec!["1-a-1024-1024.webp", "3-c-1024-1024.webp"]
        );
    }

    #[tokio::test]
    async fn custom_marker_is_honoured() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings {
            full_res_marker: "_full.jpg".into(),
            ..settings(tmp.path())
        };
        let browser = FixtureBrowser::new(vec![
            (1, Slot::Image("https://cdn.test/a-1024-1024.webp")),
            (2, Slot::Image("https://cdn.test/a_full.jpg")),
        ]);
        let walker = GalleryWalker::new(&settings, browser, FixtureFetcher);

        let report = walker.walk(&product()).await;

        assert_eq!(report.skipped, vec![1]);
        assert_eq!(report.saved[0].position, 2);
        assert_eq!(report.saved[0].path, tmp.path().join("vestido/2-a_full.jpg"));
    }

    #[tokio::test]
    async fn navigation_failure_aborts_product() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());
        let browser = FixtureBrowser::new(vec![
            (1, Slot::Image("//cdn.test/a-1024-1024.webp")),
            (2, Slot::NavFail),
            (3, Slot::Image("//cdn.test/c-1024-1024.webp")),
        ]);
        let walker = GalleryWalker::new(&settings, browser.clone(), FixtureFetcher);

        let report = walker.walk(&product()).await;

        assert!(matches!(
            report.termination,
            Termination::Error { position: 2, error: WalkError::NavigationTimeout { .. } }
        ));
        assert_eq!(report.saved.len(), 1);
        assert_eq!(browser.log().navigated, vec![1, 2]);
        assert_eq!(browser.log().closed, 1);
    }

    #[tokio::test]
    async fn download_failure_aborts_product() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());
        let browser = FixtureBrowser::new(vec![
            (1, Slot::Image("//cdn.test/broken-1024-1024.webp")),
            (2, Slot::Image("//cdn.test/b-1024-1024.webp")),
        ]);
        let walker = GalleryWalker::new(&settings, browser.clone(), FixtureFetcher);

        let report = walker.walk(&product()).await;

        match &report.termination {
            Termination::Error { position, error } => {
                assert_eq!(*position, 1);
                assert!(error.is_download_failure());
            }
            other => panic!("unexpected termination {:?}", other),
        }
        assert!(files_in(&tmp.path().join("vestido")).is_empty());
        assert_eq!(browser.log().navigated, vec![1]);
        assert_eq!(browser.log().closed, 1);
    }

    #[tokio::test]
    async fn launch_failure_reports_error() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());
        let mut browser = FixtureBrowser::new(vec![(1, Slot::Image("//cdn.test/a-1024-1024.webp"))]);
        browser.fail_launch = true;
        let walker = GalleryWalker::new(&settings, browser.clone(), FixtureFetcher);

        let report = walker.walk(&product()).await;

        assert!(matches!(
            report.termination,
            Termination::NotStarted { error: WalkError::Launch(_) }
        ));
        assert!(report.visited.is_empty());
        assert_eq!(browser.log().opened, 0);
    }

    #[tokio::test]
    async fn unusable_image_root_fails_before_launch() {
        let tmp = tempfile::tempdir().unwrap();
        // A regular file where the image root should be.
        let root = tmp.path().join("imagens");
        std::fs::write(&root, b"not a directory").unwrap();
        let settings = settings(&root);
        let browser = FixtureBrowser::new(vec![(1, Slot::Image("//cdn.test/a-1024-1024.webp"))]);
        let walker = GalleryWalker::new(&settings, browser.clone(), FixtureFetcher);

        let report = walker.walk(&product()).await;

        match &report.termination {
            Termination::NotStarted { error } => {
                assert!(matches!(error, WalkError::Setup { .. }));
                assert!(!error.is_download_failure());
            }
            other => panic!("unexpected termination {:?}", other),
        }
        assert!(report.visited.is_empty());
        assert_eq!(browser.open_close_counts(), (0, 0));
    }

    #[tokio::test]
    async fn sessions_do_not_share_state() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());
        let browser = FixtureBrowser::new(vec![
            (1, Slot::Image("//cdn.test/a-1024-1024.webp")),
            (2, Slot::Image("//cdn.test/b-1024-1024.webp")),
        ]);
        let walker = GalleryWalker::new(&settings, browser.clone(), FixtureFetcher);

        let first = walker.walk(&ProductId::parse("saia").unwrap()).await;
        let second = walker.walk(&ProductId::parse("blusa").unwrap()).await;

        // Same URLs in a second product are not duplicates; positions restart at 1.
        assert_eq!(first.saved.len(), 2);
        assert_eq!(second.saved.len(), 2);
        assert_eq!(second.visited, vec![1, 2, 3]);
        assert_eq!(browser.open_close_counts(), (2, 2));
    }

    #[tokio::test]
    async fn rerun_overwrites_same_files() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());
        let browser = FixtureBrowser::new(vec![(1, Slot::Image("//cdn.test/a-1024-1024.webp"))]);
        let walker = GalleryWalker::new(&settings, browser, FixtureFetcher);

        walker.walk(&product()).await;
        let again = walker.walk(&product()).await;

        assert_eq!(again.saved.len(), 1);
        assert_eq!(files_in(&tmp.path().join("vestido")), vec!["1-a-1024-1024.webp"]);
    }
}
