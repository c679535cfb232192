//! XPath 1.0 subset evaluated directly over a parsed `scraper::Html` tree.
//!
//! Location paths (absolute, relative, `//`), the common axes, `@attr`,
//! `text()`/`node()`/`comment()` tests, predicates with positions,
//! comparisons, `and`/`or`, unions and the usual string functions are
//! supported. Text and attribute results are returned as plain strings.

mod eval;
mod lexer;
mod parser;

use scraper::{ElementRef, Html, Node};
use std::collections::BTreeMap;

use crate::document::NodeView;
use eval::{Evaluator, Item, Value};

/// One XPath result: either an element or a bare string (text node, attribute, scalar)
#[derive(Debug, Clone)]
pub enum XPathItem<'a> {
    Element(ElementRef<'a>),
    Text(String),
}

impl NodeView for XPathItem<'_> {
    fn tag_name(&self) -> Option<String> {
        match self {
            XPathItem::Element(element) => element.tag_name(),
            XPathItem::Text(_) => None,
        }
    }

    fn text_content(&self) -> String {
        match self {
            XPathItem::Element(element) => element.text_content(),
            XPathItem::Text(text) => text.clone(),
        }
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        match self {
            XPathItem::Element(element) => NodeView::attribute(element, name),
            XPathItem::Text(_) => None,
        }
    }

    fn attributes(&self) -> BTreeMap<String, String> {
        match self {
            XPathItem::Element(element) => NodeView::attributes(element),
            XPathItem::Text(_) => BTreeMap::new(),
        }
    }

    fn parent_tag(&self) -> Option<String> {
        match self {
            XPathItem::Element(element) => element.parent_tag(),
            // Bare strings are detached from the tree
            XPathItem::Text(_) => None,
        }
    }
}

/// Evaluate `expression` against `html`, returning results in document order
pub fn evaluate<'a>(html: &'a Html, expression: &str) -> Result<Vec<XPathItem<'a>>, String> {
    let tokens = lexer::tokenize(expression)?;
    let expr = parser::parse(&tokens)?;
    let evaluator = Evaluator::new(html);

    let items = match evaluator.evaluate(&expr)? {
        Value::Nodes(items) => items,
        scalar => return Ok(vec![XPathItem::Text(evaluator.value_string(&scalar))]),
    };

    Ok(items
        .iter()
        .filter_map(|item| match item {
            Item::Attr { value, .. } => Some(XPathItem::Text(value.clone())),
            Item::Node(id) => {
                let node = evaluator.node(*id)?;
                match node.value() {
                    Node::Element(_) => ElementRef::wrap(node).map(XPathItem::Element),
                    Node::Document => Some(XPathItem::Element(html.root_element())),
                    Node::Text(_) | Node::Comment(_) => {
                        Some(XPathItem::Text(evaluator.string_value(item)))
                    }
                    _ => None,
                }
            }
        })
        .collect())
}
