use poem::http::StatusCode;
use thiserror::Error;

use crate::core::{pipeline::ConversionFailure, sniff::RejectReason};

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("no image file provided")]
    MissingFile,
    #[error("uploaded file is not a valid HEIC image: {0}")]
    UnsupportedFormat(RejectReason),
    #[error("uploaded file exceeds {0} bytes")]
    UploadTooLarge(u64),
    #[error("malformed multipart body: {0}")]
    MalformedBody(String),
    #[error("failed to receive upload: {0}")]
    Upload(#[source] std::io::Error),
    #[error("conversion failed: {0}")]
    Conversion(ConversionFailure),
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl ConvertError {
    pub fn status(&self) -> StatusCode {
        match self {
            ConvertError::MissingFile
            | ConvertError::UnsupportedFormat(_)
            | ConvertError::MalformedBody(_)
            | ConvertError::Upload(_) => StatusCode::BAD_REQUEST,
            ConvertError::UploadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ConvertError::Conversion(_) | ConvertError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Text safe to send back: no host paths, no raw tool output.
    pub fn public_message(&self) -> String {
        match self {
            ConvertError::MissingFile => "No image file provided".to_string(),
            ConvertError::UnsupportedFormat(_) => {
                "Uploaded file is not a valid HEIC image".to_string()
            }
            ConvertError::UploadTooLarge(limit) => {
                format!("Uploaded file exceeds the {limit} byte limit")
            }
            ConvertError::MalformedBody(_) => "Malformed multipart body".to_string(),
            ConvertError::Upload(_) => "Failed to receive uploaded file".to_string(),
            ConvertError::Conversion(failure) => {
                format!("Conversion failed: {}", failure.summary())
            }
            ConvertError::Storage(_) => "Internal storage error".to_string(),
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}
