use crate::error::{Result, ScanError};
use crate::extract::{LinkMatch, extract_links};
use reqwest::Client;
use std::time::Instant;
use tracing::{debug, info};
use url::Url;

/// Fetches a single page and discovers the matching links on it.
#[derive(Clone)]
pub struct PageCrawler {
    client: Client,
    link_match: LinkMatch,
}

impl PageCrawler {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            link_match: LinkMatch::default(),
        }
    }

    pub fn with_link_match(mut self, link_match: LinkMatch) -> Self {
        self.link_match = link_match;
        self
    }

    pub fn link_match(&self) -> &LinkMatch {
        &self.link_match
    }

    /// Fetch `target`, then extract the links on it, resolving relative hrefs against `base`.
    pub async fn discover(&self, target: &Url, base: &Url) -> Result<Vec<Url>> {
        let html = self.fetch_page(target).await?;
        let links = extract_links(&html, &self.link_match, base);
        info!(
            "Discovered {} links matching {:?} on {}",
            links.len(),
            self.link_match.pattern(),
            target
        );
        Ok(links)
    }

    pub async fn fetch_page(&self, url: &Url) -> Result<String> {
        debug!("Fetching page {}", url);

        let start = Instant::now();
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                ScanError::Timeout(url.to_string())
            } else {
                ScanError::HttpError(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScanError::UpstreamStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        debug!("Fetched page {} ({} bytes in {:?})", url, body.len(), start.elapsed());
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::build_client;
    use std::time::Duration;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    fn crawler() -> PageCrawler {
        PageCrawler::new(build_client(Duration::from_secs(5)).unwrap())
    }

    /// Test basic link discovery
    #[tokio::test]
    async fn test_link_discovery() {
        let mock_server = MockServer::start().await;

        let page_html = format!(
            r#"<html><body>
                <a href="{}/files/one.pdf">One</a>
                <a href="{}/files/two.pdf">Two</a>
                <a href="files/three.pdf">Three</a>
                <a href="/about.html">About</a>
            </body></html>"#,
            mock_server.uri(),
            mock_server.uri()
        );

        Mock::given(method("GET"))
            .and(path("/notices/index.html"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_bytes(page_html.as_bytes()),
            )
            .mount(&mock_server)
            .await;

        let target = Url::parse(&format!("{}/notices/index.html", mock_server.uri())).unwrap();
        let base = Url::parse(&mock_server.uri()).unwrap();

        let links = crawler().discover(&target, &base).await.unwrap();

        assert_eq!(links.len(), 3);
        // relative hrefs resolve against the base, not the page
        assert_eq!(links[2].path(), "/files/three.pdf");
    }

    #[tokio::test]
    async fn test_upstream_status_is_an_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.html"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let target = Url::parse(&format!("{}/gone.html", mock_server.uri())).unwrap();
        let err = crawler().discover(&target, &target).await.unwrap_err();

        match err {
            ScanError::UpstreamStatus { status, .. } => assert_eq!(status, 503),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_contains_strategy() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(
                b"<a href='/get?name=a.pdf'>a</a><a href='/b.pdf'>b</a>".to_vec(),
            ))
            .mount(&mock_server)
            .await;

        let target = Url::parse(&mock_server.uri()).unwrap();
        let crawler = crawler().with_link_match(LinkMatch::Contains(".pdf".to_string()));
        let links = crawler.discover(&target, &target).await.unwrap();

        assert_eq!(links.len(), 2);
    }
}
