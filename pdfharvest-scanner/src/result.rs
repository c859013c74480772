use serde::Serialize;
use thiserror::Error;
use url::Url;

pub const DEFAULT_FILE_NAME: &str = "file.pdf";

/// A successfully fetched resource.
#[derive(Debug, Clone)]
pub struct FetchedItem {
    pub url: Url,
    pub file_name: String,
    pub payload: Vec<u8>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
pub enum FailureReason {
    #[error("upstream responded with status {0}")]
    Status(u16),

    #[error("timed out")]
    Timeout,

    #[error("request failed: {0}")]
    Network(String),
}

/// Result of fetching one candidate. Exactly one is produced per admitted URL.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Success(FetchedItem),
    Failure { url: Url, reason: FailureReason },
}

impl FetchOutcome {
    pub fn url(&self) -> &Url {
        match self {
            FetchOutcome::Success(item) => &item.url,
            FetchOutcome::Failure { url, .. } => url,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }
}

/// Last path segment, percent-decoded. Falls back to [`DEFAULT_FILE_NAME`].
pub fn file_name_from_url(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty());

    let Some(segment) = segment else {
        return DEFAULT_FILE_NAME.to_string();
    };

    let decoded = urlencoding::decode(segment)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| segment.to_string());

    // decoded separators would create nested archive entries
    let cleaned: String = decoded
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        DEFAULT_FILE_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}
