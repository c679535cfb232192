use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::document::{Document, NodeView};
use crate::error::ParseError;

/// Which selector produced a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "selector", rename_all = "lowercase")]
pub enum SelectorUsed {
    Css(String),
    XPath(String),
}

/// One validated record. Content is always trimmed and non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ElementFields")]
pub struct ExtractedElement {
    content: String,
    source_url: String,
    element_type: String,
    css_classes: Option<Vec<String>>,
    parent_element: Option<String>,
    selector_used: Option<SelectorUsed>,
    attributes: BTreeMap<String, String>,
    timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ElementFields {
    content: String,
    source_url: String,
    element_type: String,
    #[serde(default)]
    css_classes: Option<Vec<String>>,
    #[serde(default)]
    parent_element: Option<String>,
    #[serde(default)]
    selector_used: Option<SelectorUsed>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    timestamp: DateTime<Utc>,
}

impl TryFrom<ElementFields> for ExtractedElement {
    type Error = ParseError;

    fn try_from(fields: ElementFields) -> Result<Self, Self::Error> {
        let content = fields.content.trim();
        if content.is_empty() {
            return Err(ParseError::EmptyContent {
                element_type: fields.element_type,
            });
        }

        Ok(Self {
            content: content.to_string(),
            source_url: fields.source_url,
            element_type: fields.element_type,
            css_classes: fields.css_classes,
            parent_element: fields.parent_element,
            selector_used: fields.selector_used,
            attributes: fields.attributes,
            timestamp: fields.timestamp,
        })
    }
}

impl ExtractedElement {
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn element_type(&self) -> &str {
        &self.element_type
    }

    pub fn css_classes(&self) -> Option<&[String]> {
        self.css_classes.as_deref()
    }

    pub fn parent_element(&self) -> Option<&str> {
        self.parent_element.as_deref()
    }

    pub fn selector_used(&self) -> Option<&SelectorUsed> {
        self.selector_used.as_ref()
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a record, re-checking the content invariant
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Build one record from a matched node.
///
/// This is the only place records are created; every strategy goes through it.
pub fn build_element<N: NodeView + ?Sized>(
    node: Option<&N>,
    source_url: &str,
    element_type: &str,
    selector: Option<SelectorUsed>,
) -> Result<ExtractedElement, ParseError> {
    let node = node.ok_or(ParseError::MissingNode)?;

    let content = node.text_content().trim().to_string();
    if content.is_empty() {
        return Err(ParseError::EmptyContent {
            element_type: element_type.to_string(),
        });
    }

    let css_classes = node
        .attribute("class")
        .map(|classes| classes.split_whitespace().map(|c| c.to_string()).collect());

    Ok(ExtractedElement {
        content,
        source_url: source_url.to_string(),
        element_type: element_type.to_string(),
        css_classes,
        parent_element: node.parent_tag(),
        selector_used: selector,
        attributes: node.attributes(),
        timestamp: Utc::now(),
    })
}

/// Per-element outcome inside a batch extraction
#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    Built(ExtractedElement),
    Skipped { reason: String },
}

impl From<Result<ExtractedElement, ParseError>> for BuildOutcome {
    fn from(result: Result<ExtractedElement, ParseError>) -> Self {
        match result {
            Ok(element) => BuildOutcome::Built(element),
            Err(e) => BuildOutcome::Skipped {
                reason: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Success,
    Partial,
    Failed,
}

/// Records produced by one extraction call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub elements: Vec<ExtractedElement>,
    pub page_title: String,
    pub source_url: String,
    pub timestamp: DateTime<Utc>,
    pub status: ExtractionStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ExtractionResult {
    /// Fold per-element outcomes into a result for `document`
    pub fn from_outcomes(document: &Document, strategy: &str, outcomes: Vec<BuildOutcome>) -> Self {
        let matched = outcomes.len();
        let mut elements = Vec::with_capacity(matched);
        let mut reasons = Vec::new();

        for outcome in outcomes {
            match outcome {
                BuildOutcome::Built(element) => elements.push(element),
                BuildOutcome::Skipped { reason } => reasons.push(reason),
            }
        }

        let status = if reasons.is_empty() {
            ExtractionStatus::Success
        } else if elements.is_empty() {
            ExtractionStatus::Failed
        } else {
            ExtractionStatus::Partial
        };

        let error = reasons.first().map(|first| {
            format!(
                "{} of {} matched element(s) skipped; first: {}",
                reasons.len(),
                matched,
                first
            )
        });

        let mut metadata = BTreeMap::new();
        metadata.insert("strategy".to_string(), serde_json::json!(strategy));
        metadata.insert("matched".to_string(), serde_json::json!(matched));
        metadata.insert("extracted".to_string(), serde_json::json!(elements.len()));
        metadata.insert("skipped".to_string(), serde_json::json!(reasons.len()));

        Self {
            elements,
            page_title: document.title(),
            source_url: document.source_url().to_string(),
            timestamp: Utc::now(),
            status,
            error,
            metadata,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xpath::XPathItem;

    const URL: &str = "https://example.com";

    fn doc(html: &str) -> Document {
        Document::parse(URL, html)
    }

    #[test]
    fn test_build_trims_content() {
        let document = doc("<div><h1 class='big  bold' id='t'>  Test Headline \n</h1></div>");
        let h1 = document.find_by_tag("h1", None).remove(0);

        let element = build_element(Some(&h1), URL, "h1", None).unwrap();
        assert_eq!(element.content(), "Test Headline");
        assert_eq!(element.element_type(), "h1");
        assert_eq!(element.source_url(), URL);
        assert_eq!(
            element.css_classes(),
            Some(&["big".to_string(), "bold".to_string()][..])
        );
        assert_eq!(element.parent_element(), Some("div"));
        assert_eq!(element.attributes().get("id").map(String::as_str), Some("t"));
        assert_eq!(element.selector_used(), None);
    }

    #[test]
    fn test_build_rejects_empty_content() {
        let document = doc("<p>   \n\t </p>");
        let p = document.find_by_tag("p", None).remove(0);

        let err = build_element(Some(&p), URL, "p", None).unwrap_err();
        assert_eq!(
            err,
            ParseError::EmptyContent {
                element_type: "p".to_string()
            }
        );
    }

    #[test]
    fn test_build_rejects_missing_node() {
        let err = build_element::<XPathItem<'_>>(None, URL, "p", None).unwrap_err();
        assert_eq!(err, ParseError::MissingNode);
    }

    #[test]
    fn test_build_tolerates_missing_class_and_parent() {
        let document = doc("<p>No class here</p>");
        let p = document.find_by_tag("p", None).remove(0);
        let element = build_element(Some(&p), URL, "p", None).unwrap();
        assert_eq!(element.css_classes(), None);

        let text = XPathItem::Text("detached".to_string());
        let element = build_element(
            Some(&text),
            URL,
            "text",
            Some(SelectorUsed::XPath("//p/text()".to_string())),
        )
        .unwrap();
        assert_eq!(element.parent_element(), None);
        assert_eq!(element.css_classes(), None);
        assert!(element.attributes().is_empty());
        assert_eq!(
            element.selector_used(),
            Some(&SelectorUsed::XPath("//p/text()".to_string()))
        );
    }

    #[test]
    fn test_outcomes_fold_into_status() {
        let document = doc("<title>T</title><p>a</p>");
        let p = document.find_by_tag("p", None).remove(0);
        let built = || BuildOutcome::from(build_element(Some(&p), URL, "p", None));
        let skipped = || BuildOutcome::Skipped {
            reason: "empty".to_string(),
        };

        let all_good = ExtractionResult::from_outcomes(&document, "tag", vec![built()]);
        assert_eq!(all_good.status, ExtractionStatus::Success);
        assert_eq!(all_good.page_title, "T");
        assert_eq!(all_good.error, None);

        let partial = ExtractionResult::from_outcomes(&document, "tag", vec![built(), skipped()]);
        assert_eq!(partial.status, ExtractionStatus::Partial);
        assert_eq!(partial.elements.len(), 1);
        assert!(partial.error.unwrap().starts_with("1 of 2"));
        assert_eq!(partial.metadata["skipped"], serde_json::json!(1));

        let failed = ExtractionResult::from_outcomes(&document, "tag", vec![skipped()]);
        assert_eq!(failed.status, ExtractionStatus::Failed);

        let empty = ExtractionResult::from_outcomes(&document, "tag", Vec::new());
        assert_eq!(empty.status, ExtractionStatus::Success);
        assert!(empty.elements.is_empty());
    }

    #[test]
    fn test_json_keeps_invariant() {
        let document = doc("<p class='x'>Hello</p>");
        let p = document.find_by_tag("p", None).remove(0);
        let element = build_element(
            Some(&p),
            URL,
            "p",
            Some(SelectorUsed::Css("p.x".to_string())),
        )
        .unwrap();

        let json = element.to_json().unwrap();
        assert!(json.contains(r#""selector_used":{"kind":"css","selector":"p.x"}"#));
        assert_eq!(ExtractedElement::from_json(&json).unwrap(), element);

        let blank = json.replace(r#""content":"Hello""#, r#""content":"   ""#);
        assert!(ExtractedElement::from_json(&blank).is_err());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ExtractionStatus::Partial).unwrap(),
            r#""partial""#
        );
    }
}
