// Page Extract Library
//
// Fetches a single page with retries, proxy and User-Agent rotation and a
// short-lived cache, then extracts validated records by tag, CSS or XPath.

pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod record;
pub mod retry;
pub mod transport;
pub mod utils;
pub mod xpath;

// Re-export main types for convenience
pub use cache::{Clock, ManualClock, ResponseCache, SystemClock};
pub use config::ScraperDefinition;
pub use document::{Document, NodeView};
pub use error::{FetchError, ParseError};
pub use extract::{SelectorKind, SelectorSpec};
pub use fetcher::{FetchTarget, Fetcher, FetcherSettings};
pub use record::{BuildOutcome, ExtractedElement, ExtractionResult, ExtractionStatus, SelectorUsed};
pub use retry::RetryPolicy;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
pub use utils::{USER_AGENTS, pick_user_agent};
pub use xpath::XPathItem;
