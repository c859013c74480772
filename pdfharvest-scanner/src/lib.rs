pub mod crawler;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod guard;
pub mod result;

pub use crawler::PageCrawler;
pub use error::ScanError;
pub use extract::{LinkMatch, extract_links};
pub use fetcher::BoundedFetcher;
pub use guard::DomainGuard;
pub use result::{FailureReason, FetchOutcome, FetchedItem, file_name_from_url};
