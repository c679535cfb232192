use serde::{Deserialize, Serialize};

use crate::document::{Document, NodeView};
use crate::error::ParseError;
use crate::record::{BuildOutcome, ExtractionResult, SelectorUsed, build_element};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorKind {
    Css,
    Xpath,
    Tag,
}

/// What to extract from a fetched page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorSpec {
    pub kind: SelectorKind,
    pub selector: String,
    /// Class filter, only meaningful for the tag kind
    #[serde(default)]
    pub class: Option<String>,
}

impl SelectorSpec {
    pub fn css(selector: &str) -> Self {
        Self {
            kind: SelectorKind::Css,
            selector: selector.to_string(),
            class: None,
        }
    }

    pub fn xpath(expression: &str) -> Self {
        Self {
            kind: SelectorKind::Xpath,
            selector: expression.to_string(),
            class: None,
        }
    }

    pub fn tag(tag: &str, class: Option<&str>) -> Self {
        Self {
            kind: SelectorKind::Tag,
            selector: tag.to_string(),
            class: class.map(|c| c.to_string()),
        }
    }
}

fn require(document: Option<&Document>) -> Result<&Document, ParseError> {
    document.ok_or_else(|| {
        log::warn!("No document loaded. Please fetch the page first.");
        ParseError::NoDocument
    })
}

fn log_skips(outcomes: &[BuildOutcome], selector: &str) {
    for outcome in outcomes {
        if let BuildOutcome::Skipped { reason } = outcome {
            log::warn!("Skipping element matched by '{}': {}", selector, reason);
        }
    }
}

/// Elements with tag `tag`, optionally carrying `class`
pub fn extract_by_tag(
    document: Option<&Document>,
    tag: &str,
    class: Option<&str>,
) -> Result<ExtractionResult, ParseError> {
    let document = require(document)?;

    let nodes = document.find_by_tag(tag, class);
    log::info!(
        "Found {} elements with tag '{}' and class '{}'",
        nodes.len(),
        tag,
        class.unwrap_or("")
    );

    let outcomes: Vec<BuildOutcome> = nodes
        .iter()
        .map(|node| build_element(Some(node), document.source_url(), tag, None).into())
        .collect();
    log_skips(&outcomes, tag);

    Ok(ExtractionResult::from_outcomes(document, "tag", outcomes))
}

/// Every `<h1>` on the page
pub fn extract_headlines(document: Option<&Document>) -> Result<ExtractionResult, ParseError> {
    extract_by_tag(document, "h1", None)
}

pub fn extract_css(document: Option<&Document>, selector: &str) -> Result<ExtractionResult, ParseError> {
    let document = require(document)?;

    let nodes = document.select_css(selector)?;
    log::info!("Found {} elements with CSS selector '{}'", nodes.len(), selector);

    let outcomes: Vec<BuildOutcome> = nodes
        .iter()
        .map(|node| {
            // Result sets may mix tags, so each record takes its own tag name
            let element_type = node.value().name();
            build_element(
                Some(node),
                document.source_url(),
                element_type,
                Some(SelectorUsed::Css(selector.to_string())),
            )
            .into()
        })
        .collect();
    log_skips(&outcomes, selector);

    Ok(ExtractionResult::from_outcomes(document, "css", outcomes))
}

pub fn extract_xpath(document: Option<&Document>, expression: &str) -> Result<ExtractionResult, ParseError> {
    let document = require(document)?;

    let items = document.select_xpath(expression)?;
    log::info!("Found {} elements with XPath '{}'", items.len(), expression);

    let outcomes: Vec<BuildOutcome> = items
        .iter()
        .map(|item| {
            let element_type = item.tag_name().unwrap_or_else(|| "text".to_string());
            build_element(
                Some(item),
                document.source_url(),
                &element_type,
                Some(SelectorUsed::XPath(expression.to_string())),
            )
            .into()
        })
        .collect();
    log_skips(&outcomes, expression);

    Ok(ExtractionResult::from_outcomes(document, "xpath", outcomes))
}

/// Dispatch on the selector kind
pub fn extract(document: Option<&Document>, spec: &SelectorSpec) -> Result<ExtractionResult, ParseError> {
    match spec.kind {
        SelectorKind::Tag => extract_by_tag(document, &spec.selector, spec.class.as_deref()),
        SelectorKind::Css => extract_css(document, &spec.selector),
        SelectorKind::Xpath => extract_xpath(document, &spec.selector),
    }
}
