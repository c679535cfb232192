use ego_tree::{NodeId, NodeRef};
use scraper::{Html, Node};
use std::collections::{HashMap, HashSet};

use super::parser::{Axis, CompareOp, Expr, NodeTest, PathStart, Step};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Item {
    Node(NodeId),
    Attr {
        owner: NodeId,
        name: String,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    Nodes(Vec<Item>),
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Value {
    fn to_bool(&self) -> bool {
        match self {
            Value::Nodes(items) => !items.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
        }
    }

    fn into_nodes(self) -> Result<Vec<Item>, String> {
        match self {
            Value::Nodes(items) => Ok(items),
            other => Err(format!("expected a node-set, found {:?}", other)),
        }
    }
}

struct Context<'c> {
    item: &'c Item,
    position: usize,
    size: usize,
}

pub(crate) struct Evaluator<'a> {
    html: &'a Html,
    order: HashMap<NodeId, usize>,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(html: &'a Html) -> Self {
        let order = html
            .tree
            .root()
            .descendants()
            .enumerate()
            .map(|(index, node)| (node.id(), index))
            .collect();

        Self { html, order }
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<NodeRef<'a, Node>> {
        self.html.tree.get(id)
    }

    /// Relative paths start at the root element; `/` still addresses the document node
    pub(crate) fn evaluate(&self, expr: &Expr) -> Result<Value, String> {
        let root = Item::Node(self.html.root_element().id());
        let ctx = Context {
            item: &root,
            position: 1,
            size: 1,
        };
        self.eval(expr, &ctx)
    }

    fn eval(&self, expr: &Expr, ctx: &Context<'_>) -> Result<Value, String> {
        match expr {
            Expr::Or(left, right) => {
                if self.eval(left, ctx)?.to_bool() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval(right, ctx)?.to_bool()))
            }
            Expr::And(left, right) => {
                if !self.eval(left, ctx)?.to_bool() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval(right, ctx)?.to_bool()))
            }
            Expr::Compare(op, left, right) => {
                let left = self.eval(left, ctx)?;
                let right = self.eval(right, ctx)?;
                Ok(Value::Bool(self.compare(*op, &left, &right)))
            }
            Expr::Union(branches) => {
                let mut items = Vec::new();
                for branch in branches {
                    items.extend(self.eval(branch, ctx)?.into_nodes()?);
                }
                Ok(Value::Nodes(self.sort_unique(items)))
            }
            Expr::Path { start, steps } => {
                let mut current = match start {
                    PathStart::Root => vec![Item::Node(self.html.tree.root().id())],
                    PathStart::Context => vec![ctx.item.clone()],
                    PathStart::Filter(primary, predicates) => {
                        let items = self.eval(primary, ctx)?.into_nodes()?;
                        self.apply_predicates(self.sort_unique(items), predicates)?
                    }
                };

                for step in steps {
                    current = self.apply_step(&current, step)?;
                }
                Ok(Value::Nodes(current))
            }
            Expr::Literal(value) => Ok(Value::Str(value.clone())),
            Expr::Number(value) => Ok(Value::Num(*value)),
            Expr::Call(name, args) => self.call(name, args, ctx),
        }
    }

    fn apply_step(&self, input: &[Item], step: &Step) -> Result<Vec<Item>, String> {
        let mut out = Vec::new();
        for item in input {
            // Candidates arrive in proximity order so positional predicates count correctly
            let candidates = self.axis_items(item, step);
            out.extend(self.apply_predicates(candidates, &step.predicates)?);
        }
        Ok(self.sort_unique(out))
    }

    fn apply_predicates(&self, mut items: Vec<Item>, predicates: &[Expr]) -> Result<Vec<Item>, String> {
        for predicate in predicates {
            let size = items.len();
            let mut kept = Vec::with_capacity(size);

            for (index, item) in items.into_iter().enumerate() {
                let position = index + 1;
                let ctx = Context {
                    item: &item,
                    position,
                    size,
                };
                let keep = match self.eval(predicate, &ctx)? {
                    Value::Num(n) => n == position as f64,
                    other => other.to_bool(),
                };
                if keep {
                    kept.push(item);
                }
            }

            items = kept;
        }
        Ok(items)
    }

    fn axis_items(&self, item: &Item, step: &Step) -> Vec<Item> {
        let id = match item {
            Item::Node(id) => *id,
            Item::Attr { owner, name, .. } => {
                return match step.axis {
                    Axis::SelfAxis if attr_matches(&step.test, name) => vec![item.clone()],
                    Axis::Parent | Axis::Ancestor | Axis::AncestorOrSelf => {
                        let mut parents = vec![Item::Node(*owner)];
                        if step.axis != Axis::Parent {
                            parents = self.axis_items(
                                &Item::Node(*owner),
                                &Step {
                                    axis: Axis::AncestorOrSelf,
                                    test: NodeTest::AnyNode,
                                    predicates: Vec::new(),
                                },
                            );
                        }
                        parents
                            .into_iter()
                            .filter(|parent| match parent {
                                Item::Node(pid) => self
                                    .node(*pid)
                                    .is_some_and(|n| node_matches(&step.test, n.value())),
                                Item::Attr { .. } => false,
                            })
                            .collect()
                    }
                    _ => Vec::new(),
                };
            }
        };

        let Some(node) = self.node(id) else {
            return Vec::new();
        };

        if step.axis == Axis::Attribute {
            return match node.value() {
                Node::Element(element) => element
                    .attrs()
                    .filter(|(name, _)| attr_matches(&step.test, name))
                    .map(|(name, value)| Item::Attr {
                        owner: id,
                        name: name.to_string(),
                        value: value.to_string(),
                    })
                    .collect(),
                _ => Vec::new(),
            };
        }

        let nodes: Vec<NodeRef<'a, Node>> = match step.axis {
            Axis::Child => node.children().collect(),
            Axis::Descendant => node.descendants().skip(1).collect(),
            Axis::DescendantOrSelf => node.descendants().collect(),
            Axis::Parent => node.parent().into_iter().collect(),
            Axis::Ancestor => node.ancestors().collect(),
            Axis::AncestorOrSelf => std::iter::once(node).chain(node.ancestors()).collect(),
            Axis::SelfAxis => vec![node],
            Axis::FollowingSibling => node.next_siblings().collect(),
            Axis::PrecedingSibling => node.prev_siblings().collect(),
            Axis::Attribute => Vec::new(),
        };

        nodes
            .into_iter()
            .filter(|n| node_matches(&step.test, n.value()))
            .map(|n| Item::Node(n.id()))
            .collect()
    }

    /// Deduplicate and put items back into document order
    fn sort_unique(&self, items: Vec<Item>) -> Vec<Item> {
        let mut seen = HashSet::new();
        let mut unique: Vec<Item> = items.into_iter().filter(|item| seen.insert(item.clone())).collect();

        unique.sort_by_key(|item| match item {
            Item::Node(id) => (self.order.get(id).copied().unwrap_or(usize::MAX), 0),
            Item::Attr { owner, .. } => (self.order.get(owner).copied().unwrap_or(usize::MAX), 1),
        });
        unique
    }

    pub(crate) fn string_value(&self, item: &Item) -> String {
        match item {
            Item::Attr { value, .. } => value.clone(),
            Item::Node(id) => match self.node(*id) {
                Some(node) => match node.value() {
                    Node::Text(text) => String::from(&*text.text),
                    Node::Comment(comment) => String::from(&*comment.comment),
                    _ => node
                        .descendants()
                        .filter_map(|n| match n.value() {
                            Node::Text(text) => Some(&*text.text),
                            _ => None,
                        })
                        .collect(),
                },
                None => String::new(),
            },
        }
    }

    pub(crate) fn value_string(&self, value: &Value) -> String {
        match value {
            Value::Nodes(items) => items
                .first()
                .map(|item| self.string_value(item))
                .unwrap_or_default(),
            Value::Str(s) => s.clone(),
            Value::Num(n) => format_number(*n),
            Value::Bool(b) => b.to_string(),
        }
    }

    fn value_number(&self, value: &Value) -> f64 {
        match value {
            Value::Num(n) => *n,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            other => self.value_string(other).trim().parse().unwrap_or(f64::NAN),
        }
    }

    fn compare(&self, op: CompareOp, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Nodes(l), Value::Nodes(r)) => l.iter().any(|a| {
                let a = Value::Str(self.string_value(a));
                r.iter()
                    .any(|b| self.compare_scalar(op, &a, &Value::Str(self.string_value(b))))
            }),
            (Value::Nodes(_), Value::Bool(_)) | (Value::Bool(_), Value::Nodes(_)) => {
                self.compare_scalar(op, &Value::Bool(left.to_bool()), &Value::Bool(right.to_bool()))
            }
            (Value::Nodes(items), other) => items
                .iter()
                .any(|item| self.compare_scalar(op, &Value::Str(self.string_value(item)), other)),
            (other, Value::Nodes(items)) => items
                .iter()
                .any(|item| self.compare_scalar(op, other, &Value::Str(self.string_value(item)))),
            _ => self.compare_scalar(op, left, right),
        }
    }

    fn compare_scalar(&self, op: CompareOp, left: &Value, right: &Value) -> bool {
        match op {
            CompareOp::Eq | CompareOp::NotEq => {
                let equal = if matches!(left, Value::Bool(_)) || matches!(right, Value::Bool(_)) {
                    left.to_bool() == right.to_bool()
                } else if matches!(left, Value::Num(_)) || matches!(right, Value::Num(_)) {
                    self.value_number(left) == self.value_number(right)
                } else {
                    self.value_string(left) == self.value_string(right)
                };
                (op == CompareOp::Eq) == equal
            }
            CompareOp::Lt => self.value_number(left) < self.value_number(right),
            CompareOp::LtEq => self.value_number(left) <= self.value_number(right),
            CompareOp::Gt => self.value_number(left) > self.value_number(right),
            CompareOp::GtEq => self.value_number(left) >= self.value_number(right),
        }
    }

    fn call(&self, name: &str, args: &[Expr], ctx: &Context<'_>) -> Result<Value, String> {
        let arity = |min: usize, max: usize| -> Result<(), String> {
            if args.len() < min || args.len() > max {
                Err(format!("{}() called with {} argument(s)", name, args.len()))
            } else {
                Ok(())
            }
        };

        match name {
            "last" => {
                arity(0, 0)?;
                Ok(Value::Num(ctx.size as f64))
            }
            "position" => {
                arity(0, 0)?;
                Ok(Value::Num(ctx.position as f64))
            }
            "count" => {
                arity(1, 1)?;
                let items = self.eval(&args[0], ctx)?.into_nodes()?;
                Ok(Value::Num(items.len() as f64))
            }
            "contains" | "starts-with" | "ends-with" => {
                arity(2, 2)?;
                let haystack = self.arg_string(&args[0], ctx)?;
                let needle = self.arg_string(&args[1], ctx)?;
                Ok(Value::Bool(match name {
                    "contains" => haystack.contains(&needle),
                    "starts-with" => haystack.starts_with(&needle),
                    _ => haystack.ends_with(&needle),
                }))
            }
            "normalize-space" => {
                arity(0, 1)?;
                let text = self.optional_arg_string(args, ctx)?;
                Ok(Value::Str(crate::utils::normalize_whitespace(&text)))
            }
            "string" => {
                arity(0, 1)?;
                Ok(Value::Str(self.optional_arg_string(args, ctx)?))
            }
            "string-length" => {
                arity(0, 1)?;
                let text = self.optional_arg_string(args, ctx)?;
                Ok(Value::Num(text.chars().count() as f64))
            }
            "concat" => {
                if args.len() < 2 {
                    return Err("concat() needs at least two arguments".to_string());
                }
                let mut out = String::new();
                for arg in args {
                    out.push_str(&self.arg_string(arg, ctx)?);
                }
                Ok(Value::Str(out))
            }
            "not" => {
                arity(1, 1)?;
                Ok(Value::Bool(!self.eval(&args[0], ctx)?.to_bool()))
            }
            "boolean" => {
                arity(1, 1)?;
                Ok(Value::Bool(self.eval(&args[0], ctx)?.to_bool()))
            }
            "number" => {
                arity(0, 1)?;
                let value = match args.first() {
                    Some(arg) => self.eval(arg, ctx)?,
                    None => Value::Str(self.string_value(ctx.item)),
                };
                Ok(Value::Num(self.value_number(&value)))
            }
            "true" => {
                arity(0, 0)?;
                Ok(Value::Bool(true))
            }
            "false" => {
                arity(0, 0)?;
                Ok(Value::Bool(false))
            }
            "name" | "local-name" => {
                arity(0, 1)?;
                let item = match args.first() {
                    Some(arg) => self.eval(arg, ctx)?.into_nodes()?.into_iter().next(),
                    None => Some(ctx.item.clone()),
                };
                Ok(Value::Str(item.map(|i| self.item_name(&i)).unwrap_or_default()))
            }
            other => Err(format!("unknown function '{}()'", other)),
        }
    }

    fn arg_string(&self, arg: &Expr, ctx: &Context<'_>) -> Result<String, String> {
        let value = self.eval(arg, ctx)?;
        Ok(self.value_string(&value))
    }

    fn optional_arg_string(&self, args: &[Expr], ctx: &Context<'_>) -> Result<String, String> {
        match args.first() {
            Some(arg) => self.arg_string(arg, ctx),
            None => Ok(self.string_value(ctx.item)),
        }
    }

    fn item_name(&self, item: &Item) -> String {
        match item {
            Item::Attr { name, .. } => name.clone(),
            Item::Node(id) => self
                .node(*id)
                .and_then(|node| match node.value() {
                    Node::Element(element) => Some(element.name().to_string()),
                    _ => None,
                })
                .unwrap_or_default(),
        }
    }
}

fn node_matches(test: &NodeTest, node: &Node) -> bool {
    match test {
        NodeTest::Name(name) => match node {
            Node::Element(element) => element.name().eq_ignore_ascii_case(name),
            _ => false,
        },
        NodeTest::Wildcard => matches!(node, Node::Element(_)),
        NodeTest::Text => matches!(node, Node::Text(_)),
        NodeTest::Comment => matches!(node, Node::Comment(_)),
        NodeTest::AnyNode => true,
    }
}

fn attr_matches(test: &NodeTest, attr_name: &str) -> bool {
    match test {
        NodeTest::Name(name) => attr_name.eq_ignore_ascii_case(name),
        NodeTest::Wildcard | NodeTest::AnyNode => true,
        NodeTest::Text | NodeTest::Comment => false,
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{}Infinity", sign)
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
