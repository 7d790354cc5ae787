use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_DISPOSITION, HeaderMap};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{LinkStatus, ShareClient, check_status};
use crate::error::ShareError;

/// Time the "preparing" screen stays up before the link is followed.
pub const REDIRECT_DELAY: Duration = Duration::from_secs(1);

const FALLBACK_FILE_NAME: &str = "download";
const MAX_NAME_ATTEMPTS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Loading,
    Success,
    NotFound,
    Expired,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DownloadState::Loading)
    }

    pub fn title(&self) -> &'static str {
        match self {
            DownloadState::Loading => "Preparing Your Download",
            DownloadState::Success => "Your download has started",
            DownloadState::NotFound => "File Not Found",
            DownloadState::Expired => "File Expired",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DownloadState::Loading => "Your download will begin automatically in a moment...",
            DownloadState::Success => {
                "If your download doesn't begin automatically, use the link below."
            }
            DownloadState::NotFound => {
                "The file you're looking for doesn't exist or has been removed."
            }
            DownloadState::Expired => {
                "This file has expired and is no longer available for download."
            }
        }
    }
}

impl From<LinkStatus> for DownloadState {
    fn from(status: LinkStatus) -> Self {
        match status {
            LinkStatus::Available => DownloadState::Success,
            LinkStatus::NotFound => DownloadState::NotFound,
            LinkStatus::Expired => DownloadState::Expired,
        }
    }
}

/// Pulls the short code out of a `/download/{code}` path or a full link.
/// A bare code without any `/` is returned unchanged.
pub fn short_code_from_path(input: &str) -> Option<&str> {
    let input = input.trim();
    if !input.contains('/') {
        return (!input.is_empty()).then_some(input);
    }

    let path = match input.split_once("://") {
        Some((_, rest)) => &rest[rest.find('/')?..],
        None => input,
    };
    let path = path.split(['?', '#']).next()?;

    let mut segments = path.split('/').filter(|segment| !segment.is_empty()).rev();
    let code = segments.next()?;
    (segments.next()? == "download").then_some(code)
}

#[async_trait]
pub trait DownloadEndpoint: Send + Sync {
    fn download_url(&self, short_code: &str) -> String;
    async fn probe(&self, short_code: &str) -> Result<LinkStatus, ShareError>;
}

#[async_trait]
impl DownloadEndpoint for ShareClient {
    fn download_url(&self, short_code: &str) -> String {
        ShareClient::download_url(self, short_code)
    }

    async fn probe(&self, short_code: &str) -> Result<LinkStatus, ShareError> {
        ShareClient::probe(self, short_code).await
    }
}

/// Follows a download link once it is known to be live.
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), ShareError>;
}

pub struct DownloadFlow<E, N> {
    endpoint: Arc<E>,
    navigator: Arc<N>,
    delay: Duration,
}

impl<E, N> DownloadFlow<E, N>
where
    E: DownloadEndpoint + 'static,
    N: Navigator + 'static,
{
    pub fn new(endpoint: Arc<E>, navigator: Arc<N>) -> Self {
        Self {
            endpoint,
            navigator,
            delay: REDIRECT_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Starts the countdown on the current runtime. Dropping the returned
    /// handle before the delay elapses stops everything.
    ///
    /// The watched state reflects the probe only: it turns `Success` before
    /// the navigator runs and stays there if navigation then fails. That
    /// failure is reported through [`DownloadHandle::wait`].
    pub fn start(&self, short_code: impl Into<String>) -> DownloadHandle {
        let short_code = short_code.into();
        let (state_tx, state_rx) = watch::channel(DownloadState::Loading);
        let cancel = CancellationToken::new();

        let endpoint = self.endpoint.clone();
        let navigator = self.navigator.clone();
        let delay = self.delay;
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(%short_code, "download abandoned before redirect");
                    return Ok(DownloadState::Loading);
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let state = match endpoint.probe(&short_code).await {
                Ok(status) => DownloadState::from(status),
                Err(e) => {
                    warn!(%short_code, status = e.status(), details = ?e.details(), "download probe failed");
                    DownloadState::NotFound
                }
            };
            state_tx.send_replace(state);

            if state != DownloadState::Success {
                info!(%short_code, ?state, "download unavailable");
                return Ok(state);
            }

            let url = endpoint.download_url(&short_code);
            if let Err(e) = navigator.navigate(&url).await {
                warn!(%short_code, error = %e, details = ?e.details(), "navigation failed");
                return Err(e);
            }
            Ok(state)
        });

        DownloadHandle {
            state: state_rx,
            cancel,
            task: Some(task),
        }
    }
}

pub struct DownloadHandle {
    state: watch::Receiver<DownloadState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<DownloadState, ShareError>>>,
}

impl DownloadHandle {
    pub fn state(&self) -> DownloadState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<DownloadState> {
        self.state.clone()
    }

    /// Waits for the terminal state, including the navigation itself. A
    /// failed navigation is an `Err` even though the state shows `Success`.
    pub async fn wait(mut self) -> Result<DownloadState, ShareError> {
        let Some(task) = self.task.take() else {
            return Err(ShareError::Cancelled);
        };

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(ShareError::Cancelled),
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}

impl Drop for DownloadHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn attachment_filename(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;
    let name = value
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("filename="))?
        .trim_matches('"');

    // Only the final component, never a path.
    Path::new(name)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

/// `report.pdf`, `report (1).pdf`, `report (2).pdf`, ...
fn numbered_name(name: &str, n: usize) -> String {
    if n == 0 {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy())
        .unwrap_or_default();
    match path.extension() {
        Some(ext) if !stem.is_empty() => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        _ => format!("{} ({})", name, n),
    }
}

/// Moves a finished download into place without replacing an existing file.
fn persist_unique(mut temp: NamedTempFile, dir: &Path, name: &str) -> Result<PathBuf, ShareError> {
    for n in 0..MAX_NAME_ATTEMPTS {
        let path = dir.join(numbered_name(name, n));
        match temp.persist_noclobber(&path) {
            Ok(_) => return Ok(path),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => temp = e.file,
            Err(e) => return Err(e.error.into()),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free file name for {} in {}", name, dir.display()),
    )
    .into())
}

/// Saves whatever the download link serves into a directory. The terminal
/// stand-in for letting a browser follow the link.
pub struct FileSaver {
    client: Client,
    dest_dir: PathBuf,
    saved: OnceLock<PathBuf>,
}

impl FileSaver {
    /// `connect_timeout` bounds connection setup only; the body may take as
    /// long as it needs.
    pub fn new(dest_dir: impl Into<PathBuf>, connect_timeout: Duration) -> Result<Self, ShareError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(ShareError::from_transport)?;

        Ok(Self {
            client,
            dest_dir: dest_dir.into(),
            saved: OnceLock::new(),
        })
    }

    pub fn saved_path(&self) -> Option<&Path> {
        self.saved.get().map(PathBuf::as_path)
    }
}

#[async_trait]
impl Navigator for FileSaver {
    async fn navigate(&self, url: &str) -> Result<(), ShareError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(ShareError::from_transport)?;
        let response = check_status(response).await?;

        let name = attachment_filename(response.headers())
            .or_else(|| {
                url.rsplit('/')
                    .next()
                    .filter(|segment| !segment.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());

        tokio::fs::create_dir_all(&self.dest_dir).await?;

        // Partial bodies stay in the temp file, which is removed on drop.
        let temp = tempfile::Builder::new()
            .prefix(".cloudfrog-")
            .suffix(".part")
            .tempfile_in(&self.dest_dir)?;
        let mut file = tokio::fs::File::from_std(temp.reopen()?);

        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(ShareError::from_transport)?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let path = persist_unique(temp, &self.dest_dir, &name)?;
        info!(path = %path.display(), bytes = written, "download saved");
        let _ = self.saved.set(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const BASE: &str = "http://localhost:8080";

    struct FakeEndpoint {
        status: Result<LinkStatus, u16>,
        probes: AtomicUsize,
    }

    impl FakeEndpoint {
        fn new(status: Result<LinkStatus, u16>) -> Arc<Self> {
            Arc::new(Self {
                status,
                probes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DownloadEndpoint for FakeEndpoint {
        fn download_url(&self, short_code: &str) -> String {
            format!("{}/download/{}", BASE, short_code)
        }

        async fn probe(&self, _short_code: &str) -> Result<LinkStatus, ShareError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.status
                .map_err(|status| ShareError::from_status(status, ""))
        }
    }

    #[derive(Default)]
    struct RecordingNavigator {
        visits: Mutex<Vec<String>>,
    }

    impl RecordingNavigator {
        fn visits(&self) -> Vec<String> {
            self.visits.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Navigator for RecordingNavigator {
        async fn navigate(&self, url: &str) -> Result<(), ShareError> {
            self.visits.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn short_code_extraction() {
        assert_eq!(short_code_from_path("/download/xyz"), Some("xyz"));
        assert_eq!(short_code_from_path("/download/xyz/"), Some("xyz"));
        assert_eq!(
            short_code_from_path("http://localhost:8080/download/Ab3xY9"),
            Some("Ab3xY9")
        );
        assert_eq!(
            short_code_from_path("https://share.example.com/api/download/Ab3xY9?ref=mail"),
            Some("Ab3xY9")
        );
        assert_eq!(short_code_from_path("Ab3xY9"), Some("Ab3xY9"));
        assert_eq!(short_code_from_path("/upload"), None);
        assert_eq!(short_code_from_path("/download/"), None);
        assert_eq!(short_code_from_path("   "), None);
    }

    #[test]
    fn only_loading_is_transient() {
        assert!(!DownloadState::Loading.is_terminal());
        assert!(DownloadState::Success.is_terminal());
        assert!(DownloadState::NotFound.is_terminal());
        assert!(DownloadState::Expired.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn navigates_once_after_one_second() {
        let endpoint = FakeEndpoint::new(Ok(LinkStatus::Available));
        let navigator = Arc::new(RecordingNavigator::default());
        let flow = DownloadFlow::new(endpoint.clone(), navigator.clone());

        let handle = flow.start("xyz");
        settle().await;

        tokio::time::advance(Duration::from_millis(999)).await;
        settle().await;
        assert!(navigator.visits().is_empty());
        assert_eq!(handle.state(), DownloadState::Loading);

        tokio::time::advance(Duration::from_millis(1)).await;
        let state = handle.wait().await.unwrap();

        assert_eq!(state, DownloadState::Success);
        assert_eq!(navigator.visits(), vec!["http://localhost:8080/download/xyz"]);
        assert_eq!(endpoint.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_before_delay_prevents_navigation() {
        let endpoint = FakeEndpoint::new(Ok(LinkStatus::Available));
        let navigator = Arc::new(RecordingNavigator::default());
        let flow = DownloadFlow::new(endpoint.clone(), navigator.clone());

        let handle = flow.start("xyz");
        settle().await;
        tokio::time::advance(Duration::from_millis(500)).await;
        drop(handle);

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;

        assert!(navigator.visits().is_empty());
        assert_eq!(endpoint.probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn gone_link_ends_expired_without_navigation() {
        let endpoint = FakeEndpoint::new(Ok(LinkStatus::Expired));
        let navigator = Arc::new(RecordingNavigator::default());
        let flow = DownloadFlow::new(endpoint, navigator.clone());

        let handle = flow.start("old");
        let mut states = handle.subscribe();
        let state = handle.wait().await.unwrap();

        assert_eq!(state, DownloadState::Expired);
        assert_eq!(*states.borrow_and_update(), DownloadState::Expired);
        assert!(navigator.visits().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_link_ends_not_found() {
        let endpoint = FakeEndpoint::new(Ok(LinkStatus::NotFound));
        let navigator = Arc::new(RecordingNavigator::default());
        let flow = DownloadFlow::new(endpoint, navigator.clone());

        let state = flow.start("nope").wait().await.unwrap();

        assert_eq!(state, DownloadState::NotFound);
        assert!(navigator.visits().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_is_shown_as_not_found() {
        let endpoint = FakeEndpoint::new(Err(503));
        let navigator = Arc::new(RecordingNavigator::default());
        let flow = DownloadFlow::new(endpoint, navigator.clone());

        let state = flow.start("xyz").wait().await.unwrap();

        assert_eq!(state, DownloadState::NotFound);
        assert!(navigator.visits().is_empty());
    }

    #[tokio::test]
    async fn file_saver_uses_attachment_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download/abc123"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Disposition", "attachment; filename=report.pdf")
                    .set_body_bytes(b"%PDF-1.7 fake".to_vec()),
            )
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let saver = FileSaver::new(dir.path(), Duration::from_secs(5)).unwrap();
        saver
            .navigate(&format!("{}/download/abc123", server.uri()))
            .await
            .unwrap();

        let saved = saver.saved_path().unwrap();
        assert_eq!(saved, dir.path().join("report.pdf"));
        assert_eq!(std::fs::read(saved).unwrap(), b"%PDF-1.7 fake");
    }

    #[tokio::test]
    async fn file_saver_falls_back_to_short_code_and_strips_paths() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download/plain"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"one".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/download/sneaky"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(
                        "Content-Disposition",
                        "attachment; filename=\"../../etc/passwd\"",
                    )
                    .set_body_bytes(b"two".to_vec()),
            )
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();

        let saver = FileSaver::new(dir.path(), Duration::from_secs(5)).unwrap();
        saver
            .navigate(&format!("{}/download/plain", server.uri()))
            .await
            .unwrap();
        assert_eq!(saver.saved_path().unwrap(), dir.path().join("plain"));

        let saver = FileSaver::new(dir.path(), Duration::from_secs(5)).unwrap();
        saver
            .navigate(&format!("{}/download/sneaky", server.uri()))
            .await
            .unwrap();
        assert_eq!(saver.saved_path().unwrap(), dir.path().join("passwd"));
    }

    #[tokio::test]
    async fn file_saver_reports_expired_links() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download/old"))
            .respond_with(ResponseTemplate::new(410).set_body_json(
                serde_json::json!({"error": "File has expired and is no longer available"}),
            ))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let saver = FileSaver::new(dir.path(), Duration::from_secs(5)).unwrap();
        let err = saver
            .navigate(&format!("{}/download/old", server.uri()))
            .await
            .unwrap_err();

        assert_eq!(err.status(), 410);
        assert!(saver.saved_path().is_none());
    }

    #[tokio::test]
    async fn file_saver_never_replaces_existing_files() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download/abc123"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Disposition", "attachment; filename=report.pdf")
                    .set_body_bytes(b"new".to_vec()),
            )
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("report.pdf"), b"keep me").unwrap();
        let url = format!("{}/download/abc123", server.uri());

        let first = FileSaver::new(dir.path(), Duration::from_secs(5)).unwrap();
        first.navigate(&url).await.unwrap();
        let second = FileSaver::new(dir.path(), Duration::from_secs(5)).unwrap();
        second.navigate(&url).await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("report.pdf")).unwrap(), b"keep me");
        assert_eq!(first.saved_path().unwrap(), dir.path().join("report (1).pdf"));
        assert_eq!(second.saved_path().unwrap(), dir.path().join("report (2).pdf"));
        assert_eq!(std::fs::read(dir.path().join("report (2).pdf")).unwrap(), b"new");
    }

    #[test]
    fn numbered_names_keep_the_extension() {
        assert_eq!(numbered_name("report.pdf", 0), "report.pdf");
        assert_eq!(numbered_name("report.pdf", 3), "report (3).pdf");
        assert_eq!(numbered_name("archive.tar.gz", 1), "archive.tar (1).gz");
        assert_eq!(numbered_name("Ab3xY9", 1), "Ab3xY9 (1)");
        assert_eq!(numbered_name(".env", 1), ".env (1)");
    }

    #[tokio::test]
    async fn truncated_body_leaves_nothing_behind() {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await.unwrap();
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\n\
                      Content-Length: 100\r\n\
                      Content-Disposition: attachment; filename=big.bin\r\n\
                      Connection: close\r\n\r\n\
                      short",
                )
                .await
                .unwrap();
            socket.flush().await.unwrap();
        });

        let dir = tempdir().unwrap();
        let saver = FileSaver::new(dir.path(), Duration::from_secs(5)).unwrap();
        let result = saver
            .navigate(&format!("http://{}/download/big", addr))
            .await;
        server.await.unwrap();

        assert!(result.is_err());
        assert!(saver.saved_path().is_none());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "left files behind: {:?}", leftovers);
    }

    struct FailingNavigator;

    #[async_trait]
    impl Navigator for FailingNavigator {
        async fn navigate(&self, _url: &str) -> Result<(), ShareError> {
            Err(ShareError::from_status(410, ""))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_navigation_is_an_error_after_success_state() {
        let endpoint = FakeEndpoint::new(Ok(LinkStatus::Available));
        let flow = DownloadFlow::new(endpoint, Arc::new(FailingNavigator));

        let handle = flow.start("raced");
        let states = handle.subscribe();
        let err = handle.wait().await.unwrap_err();

        assert_eq!(err.status(), 410);
        assert_eq!(*states.borrow(), DownloadState::Success);
    }
}
