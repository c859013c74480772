use pdfharvest_scanner::ScanError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    /// Missing or malformed input, or a host outside the allow-list.
    #[error("{0}")]
    Validation(String),

    /// The target page had no matching links.
    #[error("{0}")]
    NotFound(String),

    /// The target page itself could not be fetched.
    #[error("failed to fetch target page: {0}")]
    Upstream(#[from] ScanError),

    /// Container write failure. Fatal for the whole download.
    #[error("archive error: {0}")]
    Archive(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

pub type Result<T> = std::result::Result<T, HarvestError>;

impl From<zip::result::ZipError> for HarvestError {
    fn from(e: zip::result::ZipError) -> Self {
        HarvestError::Archive(e.to_string())
    }
}

impl HarvestError {
    pub fn status_code(&self) -> u16 {
        match self {
            HarvestError::Validation(_) => 400,
            HarvestError::NotFound(_) => 404,
            HarvestError::Upstream(_) | HarvestError::Archive(_) | HarvestError::Unexpected(_) => {
                500
            }
        }
    }

    /// Body safe to hand to a remote caller. Internal detail stays in the logs.
    pub fn to_body(&self) -> ErrorBody {
        match self {
            HarvestError::Validation(message) | HarvestError::NotFound(message) => ErrorBody {
                message: message.clone(),
                detail: None,
            },
            HarvestError::Upstream(scan) => ErrorBody {
                message: "Failed to fetch the target page".to_string(),
                detail: match scan {
                    ScanError::UpstreamStatus { status, .. } => {
                        Some(format!("upstream responded with status {}", status))
                    }
                    ScanError::Timeout(_) => Some("upstream request timed out".to_string()),
                    _ => None,
                },
            },
            HarvestError::Archive(_) => ErrorBody {
                message: "Failed to build the archive".to_string(),
                detail: None,
            },
            HarvestError::Unexpected(_) => ErrorBody {
                message: "Internal server error".to_string(),
                detail: None,
            },
        }
    }
}

/// JSON error body: `{ "message": ..., "detail": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub detail: Option<String>,
}
