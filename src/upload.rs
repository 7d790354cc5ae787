use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{StreamExt, stream::BoxStream};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::client::{ShareClient, UploadEvent};
use crate::clipboard::Clipboard;
use crate::error::{ShareError, ValidationError};
use crate::notify::Notifier;
use crate::rest_types::UploadResponse;

const MEGABYTE: u64 = 1024 * 1024;
pub const MAX_FILE_SIZE: u64 = 100 * MEGABYTE;

const UPLOADING_MESSAGE: &str = "Uploading file...";
const UPLOADED_MESSAGE: &str = "File uploaded successfully!";
const COPIED_MESSAGE: &str = "Link copied to clipboard!";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
}

impl SelectedFile {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ShareError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(ValidationError::NotAFile(path.to_path_buf()).into());
        }

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| ValidationError::NotAFile(path.to_path_buf()))?;

        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: metadata.len(),
        })
    }
}

pub fn validate_file(file: Option<&SelectedFile>) -> Result<&SelectedFile, ValidationError> {
    let file = file.ok_or(ValidationError::NoFileSelected)?;
    if file.size > MAX_FILE_SIZE {
        return Err(ValidationError::TooLarge { size: file.size });
    }
    Ok(file)
}

/// `round(loaded * 100 / total)`, capped at 100. An empty body counts as done.
pub fn percent_complete(loaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let (loaded, total) = (loaded as u128, total as u128);
    ((loaded * 200 + total) / (total * 2)).min(100) as u8
}

/// Percent for one attempt. Never goes backwards until reset.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProgressTracker {
    percent: u8,
}

impl ProgressTracker {
    pub fn reset(&mut self) {
        self.percent = 0;
    }

    pub fn observe(&mut self, loaded: u64, total: u64) -> u8 {
        self.percent = self.percent.max(percent_complete(loaded, total));
        self.percent
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }
}

/// Anything that can turn a selected file into a stream of upload events.
pub trait Uploader: Send + Sync {
    fn upload<'a>(&'a self, file: &'a SelectedFile)
    -> BoxStream<'a, Result<UploadEvent, ShareError>>;
}

impl<T: Uploader + ?Sized> Uploader for &T {
    fn upload<'a>(
        &'a self,
        file: &'a SelectedFile,
    ) -> BoxStream<'a, Result<UploadEvent, ShareError>> {
        (**self).upload(file)
    }
}

impl<T: Uploader + ?Sized> Uploader for Arc<T> {
    fn upload<'a>(
        &'a self,
        file: &'a SelectedFile,
    ) -> BoxStream<'a, Result<UploadEvent, ShareError>> {
        (**self).upload(file)
    }
}

impl Uploader for ShareClient {
    fn upload<'a>(
        &'a self,
        file: &'a SelectedFile,
    ) -> BoxStream<'a, Result<UploadEvent, ShareError>> {
        self.upload_file(file)
    }
}

/// What an upload screen renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadState {
    pub uploading: bool,
    pub progress: u8,
    pub download_url: Option<String>,
    pub expires_at: Option<String>,
    pub error: Option<String>,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct UploadFlow<U, N> {
    uploader: U,
    notifier: N,
    in_flight: AtomicBool,
    state: watch::Sender<UploadState>,
}

impl<U: Uploader, N: Notifier> UploadFlow<U, N> {
    pub fn new(uploader: U, notifier: N) -> Self {
        let (state, _) = watch::channel(UploadState::default());
        Self {
            uploader,
            notifier,
            in_flight: AtomicBool::new(false),
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> UploadState {
        self.state.borrow().clone()
    }

    /// False while a request is outstanding.
    pub fn is_ready(&self) -> bool {
        !self.in_flight.load(Ordering::Acquire)
    }

    pub async fn submit(&self, file: Option<&SelectedFile>) -> Result<UploadResponse, ShareError> {
        // An outstanding attempt owns the state; reject before anything else.
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ShareError::Busy);
        }
        let _in_flight = InFlight(&self.in_flight);

        let file = match validate_file(file) {
            Ok(file) => file,
            Err(e) => {
                self.fail(&e.to_string());
                return Err(e.into());
            }
        };

        let loading = self.notifier.loading(UPLOADING_MESSAGE);
        self.state.send_modify(|state| {
            state.uploading = true;
            state.progress = 0;
            state.download_url = None;
            state.expires_at = None;
            state.error = None;
        });

        let result = self.drive(file).await;
        self.notifier.dismiss(loading);

        match &result {
            Ok(response) => {
                self.state.send_modify(|state| {
                    state.uploading = false;
                    state.download_url = Some(response.download_url.clone());
                    state.expires_at = response.expires_at.clone();
                    state.error = None;
                });
                self.notifier.success(UPLOADED_MESSAGE);
            }
            Err(e) => {
                warn!(status = e.status(), details = ?e.details(), "upload failed");
                self.state.send_modify(|state| state.uploading = false);
                self.fail(&e.to_string());
            }
        }

        result
    }

    async fn drive(&self, file: &SelectedFile) -> Result<UploadResponse, ShareError> {
        let mut events = self.uploader.upload(file);
        let mut tracker = ProgressTracker::default();

        while let Some(event) = events.next().await {
            match event? {
                UploadEvent::Progress(p) => {
                    let percent = tracker.observe(p.bytes_uploaded, p.total_bytes);
                    self.state.send_if_modified(|state| {
                        if state.progress == percent {
                            return false;
                        }
                        state.progress = percent;
                        true
                    });
                }
                UploadEvent::Complete(response) => return Ok(response),
            }
        }

        Err(ShareError::invalid_response(
            crate::error::DEFAULT_STATUS,
            "Upload ended without a server response",
        ))
    }

    fn fail(&self, message: &str) {
        self.state
            .send_modify(|state| state.error = Some(message.to_string()));
        self.notifier.error(message);
    }

    /// Copies the current link verbatim. Returns `None` when no upload has
    /// succeeded yet.
    pub fn copy_link<C: Clipboard>(&self, clipboard: &mut C) -> Result<Option<String>, ShareError> {
        let Some(link) = self.state.borrow().download_url.clone() else {
            return Ok(None);
        };

        clipboard.write_text(&link)?;
        debug!(%link, "copied link");
        self.notifier.success(COPIED_MESSAGE);
        Ok(Some(link))
    }
}
