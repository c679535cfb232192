use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;

use crate::error::ParseError;
use crate::xpath::{self, XPathItem};

/// The fixed set of things record construction may ask of a matched node
pub trait NodeView {
    /// Element tag name, `None` for bare text
    fn tag_name(&self) -> Option<String>;

    /// All descendant text, concatenated in document order
    fn text_content(&self) -> String;

    fn attribute(&self, name: &str) -> Option<&str>;

    fn attributes(&self) -> BTreeMap<String, String>;

    /// Tag name of the enclosing element, if there is one
    fn parent_tag(&self) -> Option<String>;
}

impl NodeView for ElementRef<'_> {
    fn tag_name(&self) -> Option<String> {
        Some(self.value().name().to_string())
    }

    fn text_content(&self) -> String {
        self.text().collect()
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.value().attr(name)
    }

    fn attributes(&self) -> BTreeMap<String, String> {
        self.value()
            .attrs()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    fn parent_tag(&self) -> Option<String> {
        self.parent()
            .and_then(ElementRef::wrap)
            .map(|parent| parent.value().name().to_string())
    }
}

/// A parsed page. Read-only once built.
pub struct Document {
    html: Html,
    source_url: String,
}

impl Document {
    pub fn parse(source_url: &str, body: &str) -> Self {
        Self {
            html: Html::parse_document(body),
            source_url: source_url.to_string(),
        }
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn html(&self) -> &Html {
        &self.html
    }

    /// Text of the first `<title>`, trimmed, or an empty string
    pub fn title(&self) -> String {
        self.html
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "title")
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default()
    }

    /// Elements named `tag`, optionally restricted by `class`: either one class
    /// token or the whole `class` attribute must equal it
    pub fn find_by_tag(&self, tag: &str, class: Option<&str>) -> Vec<ElementRef<'_>> {
        self.html
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|el| el.value().name().eq_ignore_ascii_case(tag))
            .filter(|el| match class {
                Some(class) => {
                    el.value().classes().any(|c| c == class)
                        || el.value().attr("class") == Some(class)
                }
                None => true,
            })
            .collect()
    }

    pub fn select_css(&self, selector: &str) -> Result<Vec<ElementRef<'_>>, ParseError> {
        let parsed = Selector::parse(selector).map_err(|e| ParseError::InvalidSelector {
            selector: selector.to_string(),
            reason: e.to_string(),
        })?;

        Ok(self.html.select(&parsed).collect())
    }

    /// Evaluate an XPath expression; text and attribute results come back as strings
    pub fn select_xpath(&self, expression: &str) -> Result<Vec<XPathItem<'_>>, ParseError> {
        xpath::evaluate(&self.html, expression).map_err(|reason| ParseError::InvalidXPath {
            expression: expression.to_string(),
            reason,
        })
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("source_url", &self.source_url)
            .field("title", &self.title())
            .finish()
    }
}
