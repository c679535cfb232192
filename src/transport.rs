use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, USER_AGENT};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// One GET request as issued by the fetcher
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("no client configured for proxy '{0}'")]
    UnknownProxy(String),
}

impl TransportError {
    /// Timeouts and network failures count as failed attempts; setup mistakes do not
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::UnknownProxy(_))
    }
}

/// The HTTP seam of the fetcher
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// reqwest-backed transport.
///
/// Every connection pool is acquired up front: one direct client plus one
/// client per proxy. Dropping the transport closes them all.
pub struct ReqwestTransport {
    direct: reqwest::Client,
    proxied: HashMap<String, reqwest::Client>,
}

impl ReqwestTransport {
    pub fn new(proxies: &[String]) -> Result<Self, reqwest::Error> {
        // System proxy variables must not leak into "no proxy" requests
        let direct = reqwest::Client::builder()
            .cookie_store(true)
            .no_proxy()
            .build()?;

        let mut proxied = HashMap::new();
        for address in proxies {
            if proxied.contains_key(address) {
                continue;
            }

            let client = reqwest::Client::builder()
                .cookie_store(true)
                .proxy(reqwest::Proxy::all(address.as_str())?)
                .build()?;
            proxied.insert(address.clone(), client);
        }

        Ok(Self { direct, proxied })
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<&reqwest::Client, TransportError> {
        match proxy {
            None => Ok(&self.direct),
            Some(address) => self
                .proxied
                .get(address)
                .ok_or_else(|| TransportError::UnknownProxy(address.to_string())),
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let client = self.client_for(request.proxy.as_deref())?;

        let mut builder = client
            .get(&request.url)
            .timeout(request.timeout)
            .header(ACCEPT, "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.5");

        if let Some(user_agent) = &request.user_agent {
            builder = builder.header(USER_AGENT, user_agent.as_str());
        }

        let response = builder.send().await.map_err(classify)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let body = response.text().await.map_err(classify)?;

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}
