use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("{url} responded with status {status}")]
    UpstreamStatus { url: String, status: u16 },

    #[error("Request to {0} timed out")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, ScanError>;
