use crate::error::{Result, ScanError};
use crate::guard::DomainGuard;
use crate::result::{FailureReason, FetchOutcome, FetchedItem, file_name_from_url};
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const MAX_REDIRECTS: usize = 5;

/// Build an HTTP client that follows up to five redirects to any host.
pub fn build_client(timeout: Duration) -> Result<Client> {
    client_builder(timeout)
        .redirect(Policy::limited(MAX_REDIRECTS))
        .build()
        .map_err(ScanError::HttpError)
}

/// Build an HTTP client whose redirects must stay on hosts `guard` allows.
///
/// A redirect to any other host fails the request instead of being followed.
pub fn build_guarded_client(timeout: Duration, guard: DomainGuard) -> Result<Client> {
    client_builder(timeout)
        .redirect(guarded_redirects(guard))
        .build()
        .map_err(ScanError::HttpError)
}

fn client_builder(timeout: Duration) -> ClientBuilder {
    Client::builder()
        .user_agent(concat!("pdfharvest/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .connect_timeout(timeout / 2)
        .pool_max_idle_per_host(16)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
}

fn guarded_redirects(guard: DomainGuard) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        if guard.is_allowed_url(attempt.url()) {
            return attempt.follow();
        }
        let host = attempt.url().host_str().unwrap_or_default().to_string();
        warn!("Refusing redirect to {}: host not allowed", attempt.url());
        attempt.error(format!("redirect to disallowed host {}", host))
    })
}

/// Fetches many resources with at most `concurrency` requests in flight.
///
/// A failed item never aborts its siblings: every input URL yields exactly one
/// [`FetchOutcome`].
#[derive(Clone)]
pub struct BoundedFetcher {
    client: Client,
    concurrency: usize,
    per_item_timeout: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl BoundedFetcher {
    pub fn new(client: Client, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
            per_item_timeout: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_item_timeout = Some(timeout);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Highest number of simultaneous fetches observed so far.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Spawn one task per URL and return a receiver yielding outcomes in completion order.
    ///
    /// Tasks run to completion even if the receiver is dropped; their outcomes are discarded.
    pub fn spawn_all(&self, urls: Vec<Url>) -> mpsc::Receiver<FetchOutcome> {
        let (tx, rx) = mpsc::channel(self.concurrency);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        info!(
            "Fetching {} resources with {} concurrent requests",
            urls.len(),
            self.concurrency
        );

        for url in urls {
            let client = self.client.clone();
            let timeout = self.per_item_timeout;
            let semaphore = semaphore.clone();
            let tx = tx.clone();
            let in_flight = self.in_flight.clone();
            let peak = self.peak_in_flight.clone();

            tokio::spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        let _slot = InFlightSlot::enter(&in_flight, &peak);
                        Self::fetch_one(&client, url, timeout).await
                    }
                    Err(_) => FetchOutcome::Failure {
                        url,
                        reason: FailureReason::Network("fetch limiter closed".to_string()),
                    },
                };

                if tx.send(outcome).await.is_err() {
                    debug!("Outcome receiver dropped; discarding result");
                }
            });
        }

        rx
    }

    /// Fetch every URL and collect the outcomes, in completion order.
    pub async fn fetch_all(&self, urls: Vec<Url>) -> Vec<FetchOutcome> {
        let expected = urls.len();
        let mut rx = self.spawn_all(urls);
        let mut outcomes = Vec::with_capacity(expected);
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Fetch a single resource, mapping every failure mode onto [`FetchOutcome::Failure`].
    pub async fn fetch_one(client: &Client, url: Url, timeout: Option<Duration>) -> FetchOutcome {
        debug!("Fetching {}", url);
        let start = Instant::now();

        let mut request = client.get(url.clone());
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Self::failure(url, e),
        };

        let status = response.status();
        if !status.is_success() {
            warn!("{} responded with {}", url, status.as_u16());
            return FetchOutcome::Failure {
                url,
                reason: FailureReason::Status(status.as_u16()),
            };
        }

        match response.bytes().await {
            Ok(body) => {
                let payload = body.to_vec();
                debug!(
                    "Fetched {} ({} bytes in {:?})",
                    url,
                    payload.len(),
                    start.elapsed()
                );
                FetchOutcome::Success(FetchedItem {
                    file_name: file_name_from_url(&url),
                    size_bytes: payload.len() as u64,
                    payload,
                    url,
                })
            }
            Err(e) => Self::failure(url, e),
        }
    }

    fn failure(url: Url, error: reqwest::Error) -> FetchOutcome {
        let reason = if error.is_timeout() {
            FailureReason::Timeout
        } else {
            FailureReason::Network(error.to_string())
        };
        warn!("Fetch error for {}: {}", url, reason);
        FetchOutcome::Failure { url, reason }
    }
}

/// Tracks one in-flight fetch for the peak gauge.
struct InFlightSlot<'a> {
    in_flight: &'a AtomicUsize,
}

impl<'a> InFlightSlot<'a> {
    fn enter(in_flight: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
