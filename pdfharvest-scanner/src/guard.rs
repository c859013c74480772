use std::collections::HashSet;
use url::Url;

/// Host allow-list checked before anything is fetched.
#[derive(Debug, Clone, Default)]
pub struct DomainGuard {
    allowed: HashSet<String>,
}

impl DomainGuard {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = hosts
            .into_iter()
            .map(|h| h.as_ref().trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        Self { allowed }
    }

    /// Fails closed: unparseable URLs and URLs without a host are never allowed.
    pub fn is_allowed(&self, url: &str) -> bool {
        Url::parse(url)
            .map(|parsed| self.is_allowed_url(&parsed))
            .unwrap_or(false)
    }

    pub fn is_allowed_url(&self, url: &Url) -> bool {
        match url.host_str() {
            Some(host) => {
                let host = host.trim_end_matches('.').to_ascii_lowercase();
                self.allowed.contains(&host)
            }
            None => false,
        }
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}
