use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::cache::{Clock, ResponseCache, SystemClock};
use crate::document::Document;
use crate::error::{FetchError, ParseError};
use crate::extract::{self, SelectorSpec};
use crate::record::ExtractionResult;
use crate::retry::RetryPolicy;
use crate::transport::{HttpRequest, ReqwestTransport, Transport};
use crate::utils::{is_html_content_type, pick_user_agent};

const METHOD: &str = "GET";

/// The page to fetch and how to reach it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchTarget {
    pub url: String,
    #[serde(default)]
    pub proxies: Vec<String>,
    #[serde(default)]
    pub user_agents: Vec<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl FetchTarget {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            proxies: Vec::new(),
            user_agents: Vec::new(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-fetcher limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetcherSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_max_entries() -> usize {
    64
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
        }
    }
}

/// Fetches one page with retries, proxy/User-Agent rotation and a short-lived cache.
///
/// The proxy cursor moves once per network fetch; cache hits leave it alone.
/// Extraction always runs against the most recently fetched document.
pub struct Fetcher {
    target: FetchTarget,
    timeout: Duration,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    cache: ResponseCache,
    proxy_cursor: usize,
    current: Option<Rc<Document>>,
}

impl Fetcher {
    /// Acquire the HTTP clients for `target` up front
    pub fn new(target: FetchTarget, settings: FetcherSettings) -> Result<Self, FetchError> {
        let transport = ReqwestTransport::new(&target.proxies)
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Self::with_parts(target, settings, Arc::new(transport), Arc::new(SystemClock))
    }

    pub fn with_parts(
        target: FetchTarget,
        settings: FetcherSettings,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, FetchError> {
        let parsed = Url::parse(&target.url).map_err(|e| FetchError::InvalidUrl {
            url: target.url.clone(),
            reason: e.to_string(),
        })?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl {
                url: target.url.clone(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        Ok(Self {
            target,
            timeout: Duration::from_secs(settings.timeout_secs),
            transport,
            clock,
            cache: ResponseCache::new(
                Duration::from_secs(settings.cache_ttl_secs),
                settings.cache_max_entries,
            ),
            proxy_cursor: 0,
            current: None,
        })
    }

    pub fn target(&self) -> &FetchTarget {
        &self.target
    }

    /// Proxy slot the next network fetch will use
    pub fn next_proxy_slot(&self) -> Option<usize> {
        if self.target.proxies.is_empty() {
            None
        } else {
            Some(self.proxy_cursor % self.target.proxies.len())
        }
    }

    pub fn cache_key(&self) -> String {
        ResponseCache::key(&self.target.url, self.next_proxy_slot())
    }

    /// Fetch and parse the page, serving it from the cache while it is fresh
    pub async fn fetch(&mut self) -> Result<Rc<Document>, FetchError> {
        let slot = self.next_proxy_slot();
        let key = ResponseCache::key(&self.target.url, slot);

        if let Some(document) = self.cache.get(&key, self.clock.now()) {
            log::debug!("Cache hit for {}", key);
            self.current = Some(Rc::clone(&document));
            return Ok(document);
        }

        let proxy = slot.map(|index| self.target.proxies[index].clone());
        self.proxy_cursor = self.proxy_cursor.wrapping_add(1);

        let request = HttpRequest {
            url: self.target.url.clone(),
            proxy,
            user_agent: pick_user_agent(&self.target.user_agents),
            timeout: self.timeout,
        };

        let body = self.get_with_retry(&request).await?;

        let document = Rc::new(Document::parse(&self.target.url, &body));
        self.cache.insert(key, Rc::clone(&document), self.clock.now());
        self.current = Some(Rc::clone(&document));

        log::info!("Page fetched successfully from {}", self.target.url);
        Ok(document)
    }

    async fn get_with_retry(&self, request: &HttpRequest) -> Result<String, FetchError> {
        let policy = &self.target.retry;
        let attempts = policy.max_attempts();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.transport.get(request).await {
                Ok(response) if response.is_success() => {
                    let content_type = response.content_type.unwrap_or_default();
                    if !is_html_content_type(&content_type) {
                        return Err(FetchError::NotHtml {
                            url: request.url.clone(),
                            content_type,
                        });
                    }
                    return Ok(response.body);
                }
                Ok(response) if policy.should_retry_status(METHOD, response.status) => {
                    last_error = format!("HTTP status {}", response.status);
                }
                Ok(response) => {
                    return Err(FetchError::Status {
                        url: request.url.clone(),
                        status: response.status,
                    });
                }
                Err(e) if e.is_retryable() && policy.should_retry_failure(METHOD) => {
                    last_error = e.to_string();
                }
                Err(e) => {
                    return Err(FetchError::Transport {
                        url: request.url.clone(),
                        message: e.to_string(),
                    });
                }
            }

            if attempt < attempts {
                let delay = policy.backoff(attempt);
                log::warn!(
                    "Attempt {}/{} for {} failed ({}), retrying in {:?}",
                    attempt,
                    attempts,
                    request.url,
                    last_error,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }

        log::error!("Error fetching the page {}: {}", request.url, last_error);
        Err(FetchError::RetriesExhausted {
            url: request.url.clone(),
            attempts,
            last_error,
        })
    }

    /// The most recently fetched document
    pub fn document(&self) -> Result<Rc<Document>, ParseError> {
        self.current.clone().ok_or(ParseError::NoDocument)
    }

    pub fn extract_by_tag(&self, tag: &str, class: Option<&str>) -> Result<ExtractionResult, ParseError> {
        extract::extract_by_tag(self.current.as_deref(), tag, class)
    }

    pub fn extract_headlines(&self) -> Result<ExtractionResult, ParseError> {
        extract::extract_headlines(self.current.as_deref())
    }

    pub fn extract_css(&self, selector: &str) -> Result<ExtractionResult, ParseError> {
        extract::extract_css(self.current.as_deref(), selector)
    }

    pub fn extract_xpath(&self, expression: &str) -> Result<ExtractionResult, ParseError> {
        extract::extract_xpath(self.current.as_deref(), expression)
    }

    pub fn extract(&self, spec: &SelectorSpec) -> Result<ExtractionResult, ParseError> {
        extract::extract(self.current.as_deref(), spec)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn evict_expired(&mut self) -> usize {
        self.cache.purge_expired(self.clock.now())
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Release the HTTP clients and every cached document
    pub fn close(self) {
        log::debug!("Closing fetcher for {}", self.target.url);
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::transport::{HttpResponse, TransportError};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const URL: &str = "https://example.com/news";
    const PAGE: &str = r#"<html><head><title>News</title></head><body><h1>Test Headline</h1><div class="content">Test Content</div><p class="text">Test Paragraph</p></body></html>"#;

    /// Scripted transport that records every request it sees
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        fallback: HttpResponse,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn serving(body: &str) -> Arc<Self> {
            Self::scripted(Vec::new(), html(200, body))
        }

        fn scripted(
            responses: Vec<Result<HttpResponse, TransportError>>,
            fallback: HttpResponse,
        ) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                fallback,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    fn html(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            content_type: Some("text/html; charset=utf-8".to_string()),
            body: body.to_string(),
        }
    }

    fn fast_target() -> FetchTarget {
        FetchTarget {
            retry: RetryPolicy {
                backoff_base_ms: 1,
                max_backoff_ms: 5,
                ..RetryPolicy::default()
            },
            ..FetchTarget::new(URL)
        }
    }

    fn fetcher_with(
        target: FetchTarget,
        transport: Arc<ScriptedTransport>,
        clock: Arc<ManualClock>,
    ) -> Fetcher {
        Fetcher::with_parts(target, FetcherSettings::default(), transport, clock).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_parses_and_extracts() {
        let transport = ScriptedTransport::serving(PAGE);
        let mut fetcher = fetcher_with(fast_target(), transport.clone(), Arc::new(ManualClock::new()));

        let document = fetcher.fetch().await.unwrap();
        assert_eq!(document.title(), "News");

        let headlines = fetcher.extract_headlines().unwrap();
        assert_eq!(headlines.elements.len(), 1);
        assert_eq!(headlines.elements[0].content(), "Test Headline");
        assert_eq!(headlines.page_title, "News");

        let css = fetcher.extract_css(".text").unwrap();
        assert_eq!(css.elements[0].content(), "Test Paragraph");

        let xpath = fetcher.extract_xpath("//h1").unwrap();
        assert_eq!(xpath.elements[0].content(), "Test Headline");
    }

    #[tokio::test]
    async fn test_extraction_before_fetch_fails() {
        let transport = ScriptedTransport::serving(PAGE);
        let fetcher = fetcher_with(fast_target(), transport.clone(), Arc::new(ManualClock::new()));

        assert_eq!(fetcher.document().unwrap_err(), ParseError::NoDocument);
        assert_eq!(fetcher.extract_by_tag("h1", None).unwrap_err(), ParseError::NoDocument);
        assert_eq!(fetcher.extract_css("h1").unwrap_err(), ParseError::NoDocument);
        assert_eq!(fetcher.extract_xpath("//h1").unwrap_err(), ParseError::NoDocument);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_proxies_means_no_proxy() {
        let transport = ScriptedTransport::serving(PAGE);
        let clock = Arc::new(ManualClock::new());
        let mut fetcher = fetcher_with(fast_target(), transport.clone(), clock.clone());

        for _ in 0..3 {
            fetcher.fetch().await.unwrap();
            fetcher.clear_cache();
        }

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.proxy.is_none()));
    }

    #[tokio::test]
    async fn test_proxy_rotation_cycles_through_list() {
        let transport = ScriptedTransport::serving(PAGE);
        let target = FetchTarget {
            proxies: vec![
                "http://p0:8080".to_string(),
                "http://p1:8080".to_string(),
                "http://p2:8080".to_string(),
            ],
            ..fast_target()
        };
        let mut fetcher = fetcher_with(target, transport.clone(), Arc::new(ManualClock::new()));

        for _ in 0..5 {
            fetcher.fetch().await.unwrap();
            fetcher.clear_cache();
        }

        let used: Vec<String> = transport
            .requests()
            .into_iter()
            .map(|r| r.proxy.unwrap())
            .collect();
        assert_eq!(
            used,
            vec![
                "http://p0:8080",
                "http://p1:8080",
                "http://p2:8080",
                "http://p0:8080",
                "http://p1:8080",
            ]
        );
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network_and_cursor() {
        let transport = ScriptedTransport::serving(PAGE);
        let target = FetchTarget {
            proxies: vec!["http://only:8080".to_string()],
            ..fast_target()
        };
        let mut fetcher = fetcher_with(target, transport.clone(), Arc::new(ManualClock::new()));

        let first = fetcher.fetch().await.unwrap();
        let second = fetcher.fetch().await.unwrap();

        assert_eq!(transport.calls(), 1);
        assert_eq!(first.title(), second.title());
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(fetcher.cache_len(), 1);
    }

    #[tokio::test]
    async fn test_cache_expires_after_ttl() {
        let transport = ScriptedTransport::serving(PAGE);
        let clock = Arc::new(ManualClock::new());
        let settings = FetcherSettings {
            cache_ttl_secs: 30,
            ..FetcherSettings::default()
        };
        let mut fetcher =
            Fetcher::with_parts(fast_target(), settings, transport.clone(), clock.clone()).unwrap();

        fetcher.fetch().await.unwrap();
        clock.advance(Duration::from_secs(29));
        fetcher.fetch().await.unwrap();
        assert_eq!(transport.calls(), 1);

        clock.advance(Duration::from_secs(1));
        fetcher.fetch().await.unwrap();
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_user_agent_rotation() {
        let transport = ScriptedTransport::serving(PAGE);
        let agents = vec!["agent-a".to_string(), "agent-b".to_string()];
        let target = FetchTarget {
            user_agents: agents.clone(),
            ..fast_target()
        };
        let mut fetcher = fetcher_with(target, transport.clone(), Arc::new(ManualClock::new()));

        for _ in 0..4 {
            fetcher.fetch().await.unwrap();
            fetcher.clear_cache();
        }

        for request in transport.requests() {
            assert!(agents.contains(&request.user_agent.unwrap()));
        }
    }

    #[tokio::test]
    async fn test_empty_user_agent_list_sends_none() {
        let transport = ScriptedTransport::serving(PAGE);
        let mut fetcher = fetcher_with(fast_target(), transport.clone(), Arc::new(ManualClock::new()));

        fetcher.fetch().await.unwrap();
        assert_eq!(transport.requests()[0].user_agent, None);
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let transport = ScriptedTransport::scripted(
            vec![
                Ok(html(503, "busy")),
                Err(TransportError::Timeout("10s elapsed".to_string())),
            ],
            html(200, PAGE),
        );
        let mut fetcher = fetcher_with(fast_target(), transport.clone(), Arc::new(ManualClock::new()));

        let document = fetcher.fetch().await.unwrap();
        assert_eq!(document.title(), "News");
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let transport = ScriptedTransport::scripted(Vec::new(), html(502, "bad gateway"));
        let mut fetcher = fetcher_with(fast_target(), transport.clone(), Arc::new(ManualClock::new()));

        match fetcher.fetch().await {
            Err(FetchError::RetriesExhausted { attempts, last_error, .. }) => {
                assert_eq!(attempts, 4);
                assert_eq!(last_error, "HTTP status 502");
            }
            other => panic!("expected RetriesExhausted, got {:?}", other.map(|d| d.title())),
        }
        assert_eq!(transport.calls(), 4);
        assert_eq!(fetcher.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_non_retryable_status_stops_immediately() {
        let transport = ScriptedTransport::scripted(Vec::new(), html(404, "missing"));
        let mut fetcher = fetcher_with(fast_target(), transport.clone(), Arc::new(ManualClock::new()));

        match fetcher.fetch().await {
            Err(FetchError::Status { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected Status, got {:?}", other.map(|d| d.title())),
        }
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_method_not_in_retry_list_disables_retries() {
        let transport = ScriptedTransport::scripted(Vec::new(), html(503, "busy"));
        let mut target = fast_target();
        target.retry.retry_methods = vec!["POST".to_string()];
        let mut fetcher = fetcher_with(target, transport.clone(), Arc::new(ManualClock::new()));

        assert!(matches!(
            fetcher.fetch().await,
            Err(FetchError::Status { status: 503, .. })
        ));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_non_html_is_rejected_without_caching() {
        let json = HttpResponse {
            status: 200,
            content_type: Some("application/json".to_string()),
            body: r#"{"h1": "Test Headline"}"#.to_string(),
        };
        let transport = ScriptedTransport::scripted(Vec::new(), json);
        let mut fetcher = fetcher_with(fast_target(), transport.clone(), Arc::new(ManualClock::new()));

        assert!(matches!(fetcher.fetch().await, Err(FetchError::NotHtml { .. })));
        assert_eq!(transport.calls(), 1);
        assert_eq!(fetcher.cache_len(), 0);
        assert_eq!(fetcher.document().unwrap_err(), ParseError::NoDocument);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_document() {
        let transport = ScriptedTransport::scripted(vec![Ok(html(200, PAGE))], html(404, "gone"));
        let mut fetcher = fetcher_with(fast_target(), transport.clone(), Arc::new(ManualClock::new()));

        fetcher.fetch().await.unwrap();
        fetcher.clear_cache();
        assert!(fetcher.fetch().await.is_err());
        assert_eq!(fetcher.extract_headlines().unwrap().elements.len(), 1);
    }

    #[test]
    fn test_rejects_bad_urls() {
        let transport = ScriptedTransport::serving(PAGE);
        let clock = Arc::new(ManualClock::new());

        for url in ["not a url", "ftp://example.com/file"] {
            let result = Fetcher::with_parts(
                FetchTarget::new(url),
                FetcherSettings::default(),
                transport.clone(),
                clock.clone(),
            );
            assert!(matches!(result, Err(FetchError::InvalidUrl { .. })));
        }
    }

    #[test]
    fn test_settings_defaults() {
        let settings = FetcherSettings::default();
        assert_eq!(settings.timeout_secs, 10);
        assert_eq!(settings.cache_ttl_secs, 300);
        assert_eq!(settings.cache_max_entries, 64);
    }

    #[tokio::test]
    async fn test_reqwest_fetcher_against_mock_server() {
        use httpmock::prelude::*;

        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/page");
            then.status(200)
                .header("content-type", "text/html; charset=utf-8")
                .body(PAGE);
        });

        let mut fetcher = Fetcher::new(
            FetchTarget::new(&server.url("/page")),
            FetcherSettings::default(),
        )
        .unwrap();

        fetcher.fetch().await.unwrap();
        fetcher.fetch().await.unwrap();
        mock.assert_hits(1);

        let result = fetcher.extract_css("div.content").unwrap();
        assert_eq!(result.elements[0].content(), "Test Content");
        fetcher.close();
    }

    #[tokio::test]
    async fn test_reqwest_fetcher_retries_server_errors() {
        use httpmock::prelude::*;

        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/flaky");
            then.status(503);
        });

        let target = FetchTarget {
            retry: RetryPolicy {
                max_retries: 2,
                backoff_base_ms: 1,
                ..RetryPolicy::default()
            },
            ..FetchTarget::new(&server.url("/flaky"))
        };
        let mut fetcher = Fetcher::new(target, FetcherSettings::default()).unwrap();

        assert!(matches!(
            fetcher.fetch().await,
            Err(FetchError::RetriesExhausted { attempts: 3, .. })
        ));
        mock.assert_hits(3);
    }
}
