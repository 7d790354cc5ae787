use std::path::Path;
use std::time::Duration;

use futures::{StreamExt, stream::BoxStream};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use tokio::sync::watch;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use url::Url;

use crate::error::ShareError;
use crate::rest_types::{CleanupResponse, UploadResponse};
use crate::upload::SelectedFile;

const UPLOAD_ROUTE: &str = "upload";
const DOWNLOAD_ROUTE: &str = "download";
const CLEANUP_ROUTE: &str = "cleanup";

/// Multipart field the server reads the file from.
pub const UPLOAD_FIELD: &str = "file";
const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
}

#[derive(Debug)]
pub enum UploadEvent {
    Progress(UploadProgress),
    Complete(UploadResponse),
}

/// What the download endpoint says about a short code, read from the
/// status line alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Available,
    NotFound,
    Expired,
}

/// Passes 2xx responses through, turns anything else into a normalized
/// [`ShareError`].
pub(crate) async fn check_status(response: Response) -> Result<Response, ShareError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ShareError::from_status(status.as_u16(), &body))
}

async fn file_body(path: &Path, sent: watch::Sender<u64>) -> Result<reqwest::Body, ShareError> {
    let file = tokio::fs::File::open(path).await?;

    let mut uploaded = 0u64;
    let stream = ReaderStream::new(file).map(move |chunk| {
        if let Ok(bytes) = &chunk {
            uploaded += bytes.len() as u64;
            sent.send_replace(uploaded);
        }
        chunk
    });

    Ok(reqwest::Body::wrap_stream(stream))
}

pub struct ShareClient {
    client: Client,
    api_url: Url,
}

impl ShareClient {
    pub fn new(api_url: Url, timeout: Duration) -> Result<Self, ShareError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(ShareError::from_transport)?;

        Ok(Self { client, api_url })
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    // Plain concatenation keeps any path prefix on the base URL, which
    // `Url::join` would drop.
    fn endpoint(&self, route: &str) -> String {
        format!("{}/{}", self.api_url.as_str().trim_end_matches('/'), route)
    }

    /// The short code is used as-is, with no encoding.
    pub fn download_url(&self, short_code: &str) -> String {
        format!("{}/{}", self.endpoint(DOWNLOAD_ROUTE), short_code)
    }

    pub fn upload_file<'a>(
        &'a self,
        file: &'a SelectedFile,
    ) -> BoxStream<'a, Result<UploadEvent, ShareError>> {
        let stream = async_stream::try_stream! {
            let total_bytes = file.size;
            yield UploadEvent::Progress(UploadProgress {
                bytes_uploaded: 0,
                total_bytes,
            });

            let (sent_tx, mut sent_rx) = watch::channel(0u64);
            let body = file_body(&file.path, sent_tx).await?;

            let part = Part::stream_with_length(body, total_bytes)
                .file_name(file.name.clone())
                .mime_str(OCTET_STREAM)
                .map_err(ShareError::from_transport)?;
            let form = Form::new().part(UPLOAD_FIELD, part);

            debug!(name = %file.name, size = total_bytes, "starting upload");
            let request = self
                .client
                .post(self.endpoint(UPLOAD_ROUTE))
                .multipart(form)
                .send();
            tokio::pin!(request);

            let mut reported = 0u64;
            let result = loop {
                tokio::select! {
                    biased;
                    result = &mut request => {
                        break result;
                    }
                    Ok(()) = sent_rx.changed() => {
                        let bytes_uploaded = *sent_rx.borrow_and_update();
                        reported = bytes_uploaded;
                        yield UploadEvent::Progress(UploadProgress {
                            bytes_uploaded,
                            total_bytes,
                        });
                    }
                }
            };

            let response = result.map_err(ShareError::from_transport)?;

            let bytes_uploaded = *sent_rx.borrow();
            if bytes_uploaded != reported {
                yield UploadEvent::Progress(UploadProgress {
                    bytes_uploaded,
                    total_bytes,
                });
            }

            let response = check_status(response).await?;
            let status = response.status().as_u16();
            let text = response.text().await.map_err(ShareError::from_transport)?;
            let upload: UploadResponse = serde_json::from_str(&text).map_err(|e| {
                ShareError::invalid_response(
                    status,
                    format!("Upload response did not include a download link: {}", e),
                )
            })?;

            info!(url = %upload.download_url, "upload complete");
            yield UploadEvent::Complete(upload);
        };

        Box::pin(stream)
    }

    pub async fn probe(&self, short_code: &str) -> Result<LinkStatus, ShareError> {
        let response = self
            .client
            .get(self.download_url(short_code))
            .send()
            .await
            .map_err(ShareError::from_transport)?;

        let status = response.status();
        debug!(%short_code, %status, "probed download link");

        match status {
            status if status.is_success() => Ok(LinkStatus::Available),
            StatusCode::NOT_FOUND => Ok(LinkStatus::NotFound),
            StatusCode::GONE => Ok(LinkStatus::Expired),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ShareError::from_status(status.as_u16(), &body))
            }
        }
    }

    /// Asks the server to delete every expired file right away.
    pub async fn cleanup(&self, admin_token: &str) -> Result<CleanupResponse, ShareError> {
        let response = self
            .client
            .delete(self.endpoint(CLEANUP_ROUTE))
            .header(AUTHORIZATION, admin_token)
            .send()
            .await
            .map_err(ShareError::from_transport)?;

        let response = check_status(response).await?;
        response
            .json::<CleanupResponse>()
            .await
            .map_err(ShareError::from_transport)
    }
}
