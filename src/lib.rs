//! Client for the CloudFrog file-sharing API: upload a file, get back an
//! expiring link, fetch a file through such a link.

pub mod client;
pub mod clipboard;
pub mod config;
pub mod download;
pub mod error;
pub mod notify;
pub mod rest_types;
pub mod upload;

pub use client::{LinkStatus, ShareClient, UploadEvent, UploadProgress};
pub use download::{DownloadFlow, DownloadHandle, DownloadState, FileSaver, Navigator};
pub use error::{ShareError, ValidationError};
pub use notify::{NotificationId, Notifier};
pub use upload::{SelectedFile, UploadFlow, UploadState, Uploader};
