use super::lexer::Token;

/// Deepest nesting of parentheses, predicates and call arguments accepted
const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Parent,
    Ancestor,
    AncestorOrSelf,
    SelfAxis,
    FollowingSibling,
    PrecedingSibling,
    Attribute,
}

impl Axis {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "child" => Axis::Child,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "parent" => Axis::Parent,
            "ancestor" => Axis::Ancestor,
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "self" => Axis::SelfAxis,
            "following-sibling" => Axis::FollowingSibling,
            "preceding-sibling" => Axis::PrecedingSibling,
            "attribute" => Axis::Attribute,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum NodeTest {
    Name(String),
    Wildcard,
    Text,
    Comment,
    AnyNode,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub predicates: Vec<Expr>,
}

impl Step {
    fn descendant_or_self() -> Self {
        Step {
            axis: Axis::DescendantOrSelf,
            test: NodeTest::AnyNode,
            predicates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PathStart {
    Root,
    Context,
    Filter(Box<Expr>, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    Union(Vec<Expr>),
    Path { start: PathStart, steps: Vec<Step> },
    Literal(String),
    Number(f64),
    Call(String, Vec<Expr>),
}

pub(crate) fn parse(tokens: &[Token]) -> Result<Expr, String> {
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;

    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(format!("unexpected token {:?}", token)),
    }
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), String> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(format!("expected {:?}, found {:?}", expected, token)),
            None => Err(format!("expected {:?}, found end of expression", expected)),
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(Token::Name(name)) if name == keyword => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        if self.depth >= MAX_DEPTH {
            return Err("expression nested too deeply".to_string());
        }
        self.depth += 1;
        let result = self.parse_or_inner();
        self.depth -= 1;
        result
    }

    fn parse_or_inner(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_equality()?;
        while self.eat_keyword("and") {
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => CompareOp::Eq,
                Some(Token::NotEq) => CompareOp::NotEq,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_relational()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_union()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => CompareOp::Lt,
                Some(Token::LtEq) => CompareOp::LtEq,
                Some(Token::Gt) => CompareOp::Gt,
                Some(Token::GtEq) => CompareOp::GtEq,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_union()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_union(&mut self) -> Result<Expr, String> {
        let first = self.parse_path_expr()?;
        if self.peek() != Some(&Token::Pipe) {
            return Ok(first);
        }

        let mut branches = vec![first];
        while self.eat(&Token::Pipe) {
            branches.push(self.parse_path_expr()?);
        }
        Ok(Expr::Union(branches))
    }

    fn parse_path_expr(&mut self) -> Result<Expr, String> {
        match self.peek().cloned() {
            Some(Token::Literal(value)) => {
                self.pos += 1;
                Ok(Expr::Literal(value))
            }
            Some(Token::Number(value)) => {
                self.pos += 1;
                Ok(Expr::Number(value))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                self.parse_filter(inner)
            }
            Some(Token::Name(name))
                if self.peek_at(1) == Some(&Token::LParen) && !is_node_type(&name) =>
            {
                self.pos += 2;
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.parse_or()?);
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(&Token::Comma)?;
                    }
                }
                self.parse_filter(Expr::Call(name, args))
            }
            Some(Token::Slash) => {
                self.pos += 1;
                let steps = if self.starts_step() {
                    self.parse_relative_steps(Vec::new())?
                } else {
                    Vec::new()
                };
                Ok(Expr::Path {
                    start: PathStart::Root,
                    steps,
                })
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                let steps = self.parse_relative_steps(vec![Step::descendant_or_self()])?;
                Ok(Expr::Path {
                    start: PathStart::Root,
                    steps,
                })
            }
            Some(_) => {
                let steps = self.parse_relative_steps(Vec::new())?;
                Ok(Expr::Path {
                    start: PathStart::Context,
                    steps,
                })
            }
            None => Err("unexpected end of expression".to_string()),
        }
    }

    /// Predicates and trailing steps after a parenthesised expression or function call
    fn parse_filter(&mut self, primary: Expr) -> Result<Expr, String> {
        let predicates = self.parse_predicates()?;
        let has_steps = matches!(self.peek(), Some(Token::Slash) | Some(Token::DoubleSlash));

        if predicates.is_empty() && !has_steps {
            return Ok(primary);
        }

        let steps = match self.peek() {
            Some(Token::Slash) => {
                self.pos += 1;
                self.parse_relative_steps(Vec::new())?
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                self.parse_relative_steps(vec![Step::descendant_or_self()])?
            }
            _ => Vec::new(),
        };

        Ok(Expr::Path {
            start: PathStart::Filter(Box::new(primary), predicates),
            steps,
        })
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Name(_))
                | Some(Token::Star)
                | Some(Token::At)
                | Some(Token::Dot)
                | Some(Token::DotDot)
        )
    }

    fn parse_relative_steps(&mut self, mut steps: Vec<Step>) -> Result<Vec<Step>, String> {
        steps.push(self.parse_step()?);
        loop {
            match self.peek() {
                Some(Token::Slash) => {
                    self.pos += 1;
                    steps.push(self.parse_step()?);
                }
                Some(Token::DoubleSlash) => {
                    self.pos += 1;
                    steps.push(Step::descendant_or_self());
                    steps.push(self.parse_step()?);
                }
                _ => return Ok(steps),
            }
        }
    }

    fn parse_step(&mut self) -> Result<Step, String> {
        if self.eat(&Token::Dot) {
            return Ok(Step {
                axis: Axis::SelfAxis,
                test: NodeTest::AnyNode,
                predicates: Vec::new(),
            });
        }
        if self.eat(&Token::DotDot) {
            return Ok(Step {
                axis: Axis::Parent,
                test: NodeTest::AnyNode,
                predicates: Vec::new(),
            });
        }

        let axis = if self.eat(&Token::At) {
            Axis::Attribute
        } else if let (Some(Token::Name(name)), Some(Token::ColonColon)) =
            (self.peek(), self.peek_at(1))
        {
            let axis = Axis::from_name(name).ok_or_else(|| format!("unknown axis '{}'", name))?;
            self.pos += 2;
            axis
        } else {
            Axis::Child
        };

        let test = self.parse_node_test()?;
        let predicates = self.parse_predicates()?;

        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn parse_node_test(&mut self) -> Result<NodeTest, String> {
        match self.advance().cloned() {
            Some(Token::Star) => Ok(NodeTest::Wildcard),
            Some(Token::Name(name)) => {
                if is_node_type(&name) && self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    self.expect(&Token::RParen)?;
                    Ok(match name.as_str() {
                        "text" => NodeTest::Text,
                        "comment" => NodeTest::Comment,
                        _ => NodeTest::AnyNode,
                    })
                } else {
                    Ok(NodeTest::Name(name.to_ascii_lowercase()))
                }
            }
            Some(token) => Err(format!("expected a node test, found {:?}", token)),
            None => Err("expected a node test, found end of expression".to_string()),
        }
    }

    fn parse_predicates(&mut self) -> Result<Vec<Expr>, String> {
        let mut predicates = Vec::new();
        while self.eat(&Token::LBracket) {
            predicates.push(self.parse_or()?);
            self.expect(&Token::RBracket)?;
        }
        Ok(predicates)
    }
}

fn is_node_type(name: &str) -> bool {
    matches!(name, "text" | "node" | "comment")
}
