#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Comma,
    Pipe,
    Dot,
    DotDot,
    Star,
    ColonColon,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Name(String),
    Literal(String),
    Number(f64),
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match c {
            c if c.is_whitespace() => {
                i += 1;
            }
            '/' => {
                if next == Some('/') {
                    tokens.push(Token::DoubleSlash);
                    i += 2;
                } else {
                    tokens.push(Token::Slash);
                    i += 1;
                }
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '@' => {
                tokens.push(Token::At);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            '<' => {
                if next == Some('=') {
                    tokens.push(Token::LtEq);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if next == Some('=') {
                    tokens.push(Token::GtEq);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            ':' if next == Some(':') => {
                tokens.push(Token::ColonColon);
                i += 2;
            }
            '.' if next == Some('.') => {
                tokens.push(Token::DotDot);
                i += 2;
            }
            '.' if !next.is_some_and(|n| n.is_ascii_digit()) => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == quote)
                    .map(|offset| start + offset)
                    .ok_or_else(|| format!("unterminated string literal at position {}", i))?;
                tokens.push(Token::Literal(chars[start..end].iter().collect()));
                i = end + 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{}'", text))?;
                tokens.push(Token::Number(value));
            }
            c if is_name_start(c) => {
                let start = i;
                while i < chars.len() {
                    let ch = chars[i];
                    if is_name_char(ch) {
                        i += 1;
                    } else if ch == ':'
                        && chars.get(i + 1).is_some_and(|&n| is_name_start(n))
                    {
                        // prefixed name such as svg:rect
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            other => {
                return Err(format!("unexpected character '{}' at position {}", other, i));
            }
        }
    }

    Ok(tokens)
}
