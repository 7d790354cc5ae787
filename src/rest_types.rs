use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub short_code: Option<String>,
    pub download_url: String,
    #[serde(default)]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CleanupResponse {
    pub message: String,
    pub deleted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_response_reads_camel_case() {
        let json = r#"{
            "message": "File uploaded successfully",
            "shortCode": "abc123",
            "downloadUrl": "http://host/download/abc123",
            "expiresAt": "2025-01-08T00:00:00Z"
        }"#;
        let response: UploadResponse = serde_json::from_str(json).unwrap();

        assert_eq!(response.download_url, "http://host/download/abc123");
        assert_eq!(response.short_code.as_deref(), Some("abc123"));
        assert_eq!(response.expires_at.as_deref(), Some("2025-01-08T00:00:00Z"));
    }

    #[test]
    fn upload_response_requires_download_url() {
        let json = r#"{"message": "File uploaded successfully"}"#;
        assert!(serde_json::from_str::<UploadResponse>(json).is_err());
    }
}
