use std::path::PathBuf;

use thiserror::Error;

use crate::rest_types::ErrorBody;

pub const GENERIC_MESSAGE: &str = "Something went wrong. Please try again.";
pub const TIMEOUT_MESSAGE: &str = "Upload timeout. Please try again.";
/// Status reported when the failure never produced an HTTP response.
pub const DEFAULT_STATUS: u16 = 500;

/// Client-side checks that run before anything touches the network.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please select a file.")]
    NoFileSelected,
    #[error("File size exceeds 100MB limit.")]
    TooLarge { size: u64 },
    #[error("{} is not a regular file.", .0.display())]
    NotAFile(PathBuf),
}

#[derive(Debug, Error)]
pub enum ShareError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The request never produced a usable response: timeout, refused
    /// connection, broken body stream.
    #[error("{message}")]
    Transport {
        message: String,
        status: u16,
        details: String,
        timeout: bool,
    },

    /// The server answered with a non-2xx status or an unusable body.
    #[error("{message}")]
    Server {
        message: String,
        status: u16,
        details: String,
    },

    #[error("An upload is already in progress.")]
    Busy,

    #[error("File I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download was cancelled.")]
    Cancelled,
}

impl ShareError {
    pub fn transport(timeout: bool, status: Option<u16>, details: impl Into<String>) -> Self {
        let message = if timeout {
            TIMEOUT_MESSAGE
        } else {
            GENERIC_MESSAGE
        };

        ShareError::Transport {
            message: message.to_string(),
            status: status.unwrap_or(DEFAULT_STATUS),
            details: details.into(),
            timeout,
        }
    }

    pub fn from_transport(err: reqwest::Error) -> Self {
        Self::transport(
            err.is_timeout(),
            err.status().map(|status| status.as_u16()),
            err.to_string(),
        )
    }

    /// Normalizes a non-2xx response. `body` is the raw response text; the
    /// server's `error` field becomes the details when it can be decoded.
    pub fn from_status(status: u16, body: &str) -> Self {
        let details = serde_json::from_str::<ErrorBody>(body)
            .map(|body| body.error)
            .unwrap_or_else(|_| format!("Request failed with status code {}", status));

        ShareError::Server {
            message: GENERIC_MESSAGE.to_string(),
            status,
            details,
        }
    }

    pub fn invalid_response(status: u16, details: impl Into<String>) -> Self {
        ShareError::Server {
            message: GENERIC_MESSAGE.to_string(),
            status,
            details: details.into(),
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            ShareError::Transport { status, .. } | ShareError::Server { status, .. } => *status,
            _ => DEFAULT_STATUS,
        }
    }

    pub fn details(&self) -> Option<&str> {
        match self {
            ShareError::Transport { details, .. } | ShareError::Server { details, .. } => {
                Some(details)
            }
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ShareError::Transport { timeout: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_are_user_facing() {
        assert_eq!(
            ValidationError::NoFileSelected.to_string(),
            "Please select a file."
        );
        assert_eq!(
            ValidationError::TooLarge { size: 1 }.to_string(),
            "File size exceeds 100MB limit."
        );

        let err = ShareError::from(ValidationError::NoFileSelected);
        assert_eq!(err.to_string(), "Please select a file.");
    }

    #[test]
    fn timeout_gets_its_own_message() {
        let err = ShareError::transport(true, None, "operation timed out");
        assert_eq!(err.to_string(), TIMEOUT_MESSAGE);
        assert!(err.is_timeout());
        assert_eq!(err.status(), DEFAULT_STATUS);
        assert_eq!(err.details(), Some("operation timed out"));
    }

    #[test]
    fn transport_failure_uses_generic_message() {
        let err = ShareError::transport(false, Some(502), "connection reset");
        assert_eq!(err.to_string(), GENERIC_MESSAGE);
        assert!(!err.is_timeout());
        assert_eq!(err.status(), 502);
    }

    #[test]
    fn server_error_field_becomes_details() {
        let err = ShareError::from_status(400, r#"{"error": "No file provided"}"#);
        assert_eq!(err.status(), 400);
        assert_eq!(err.details(), Some("No file provided"));
        assert_eq!(err.to_string(), GENERIC_MESSAGE);
    }

    #[test]
    fn undecodable_body_falls_back_to_status_text() {
        let err = ShareError::from_status(502, "<html>Bad Gateway</html>");
        assert_eq!(err.details(), Some("Request failed with status code 502"));
    }
}
