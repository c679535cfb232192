use thiserror::Error;

/// Anything that prevents a parsed document from being acquired.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The HTTP client or one of its proxies could not be set up.
    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("HTTP error {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Gave up on {url} after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Failed to fetch {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Refusing to parse {url}: content type '{content_type}' is not HTML")]
    NotHtml { url: String, content_type: String },
}

/// Anything that prevents records from being built out of a fetched document.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("No document loaded. Please fetch the page first.")]
    NoDocument,

    #[error("Invalid CSS selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Invalid XPath expression '{expression}': {reason}")]
    InvalidXPath { expression: String, reason: String },

    #[error("No node to build a record from")]
    MissingNode,

    #[error("Empty text content for <{element_type}> element")]
    EmptyContent { element_type: String },
}
