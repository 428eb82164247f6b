//! Lexical analysis for formulas
//!
//! Turns a formula string into positioned tokens. Unary minus is left to the
//! parser, so `-` is always emitted as [`Token::Minus`].

use std::iter::Peekable;
use std::str::CharIndices;

use super::error::ParseError;

/// Token types for the lexer
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Number(f64),
    String(String),
    Boolean(bool),
    Identifier(String),

    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Power,

    // Comparison
    Equal,
    NotEqual,
    Greater,
    Less,
    GreaterEqual,
    LessEqual,

    // Logical
    And,
    Or,
    Not,

    // Ternary
    Question,
    Colon,

    // Punctuation
    LeftParen,
    RightParen,
    Comma,
}

impl Token {
    /// Short description used in parse errors
    pub fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {}", n),
            Token::String(s) => format!("string {:?}", s),
            Token::Boolean(b) => format!("'{}'", b),
            Token::Identifier(name) => format!("identifier '{}'", name),
            Token::Plus => "'+'".to_string(),
            Token::Minus => "'-'".to_string(),
            Token::Star => "'*'".to_string(),
            Token::Slash => "'/'".to_string(),
            Token::Percent => "'%'".to_string(),
            Token::Power => "'**'".to_string(),
            Token::Equal => "'=='".to_string(),
            Token::NotEqual => "'!='".to_string(),
            Token::Greater => "'>'".to_string(),
            Token::Less => "'<'".to_string(),
            Token::GreaterEqual => "'>='".to_string(),
            Token::LessEqual => "'<='".to_string(),
            Token::And => "'&&'".to_string(),
            Token::Or => "'||'".to_string(),
            Token::Not => "'!'".to_string(),
            Token::Question => "'?'".to_string(),
            Token::Colon => "':'".to_string(),
            Token::LeftParen => "'('".to_string(),
            Token::RightParen => "')'".to_string(),
            Token::Comma => "','".to_string(),
        }
    }
}

/// A token and the byte offset where it starts
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

type Chars<'a> = Peekable<CharIndices<'a>>;

fn next_is(chars: &mut Chars, expected: char) -> bool {
    if chars.peek().map(|&(_, c)| c) == Some(expected) {
        chars.next();
        true
    } else {
        false
    }
}

/// Parse operator tokens, including two-character lookahead
fn parse_operator(ch: char, position: usize, chars: &mut Chars) -> Result<Option<Token>, ParseError> {
    let token = match ch {
        '+' => Token::Plus,
        '-' => Token::Minus,
        '/' => Token::Slash,
        '%' => Token::Percent,
        '?' => Token::Question,
        ':' => Token::Colon,
        '(' => Token::LeftParen,
        ')' => Token::RightParen,
        ',' => Token::Comma,
        '*' => {
            if next_is(chars, '*') {
                Token::Power
            } else {
                Token::Star
            }
        }
        '!' => {
            if next_is(chars, '=') {
                Token::NotEqual
            } else {
                Token::Not
            }
        }
        '=' => {
            if next_is(chars, '=') {
                Token::Equal
            } else {
                return Err(ParseError::new(position, "expected '==' for equality comparison"));
            }
        }
        '>' => {
            if next_is(chars, '=') {
                Token::GreaterEqual
            } else {
                Token::Greater
            }
        }
        '<' => {
            if next_is(chars, '=') {
                Token::LessEqual
            } else {
                Token::Less
            }
        }
        '&' => {
            if next_is(chars, '&') {
                Token::And
            } else {
                return Err(ParseError::new(position, "expected '&&' but got single '&'"));
            }
        }
        '|' => {
            if next_is(chars, '|') {
                Token::Or
            } else {
                return Err(ParseError::new(position, "expected '||' but got single '|'"));
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(token))
}

/// Parse a quoted string literal; the opening quote is already consumed.
///
/// A backslash escapes the next character.
fn parse_string(quote: char, start: usize, chars: &mut Chars) -> Result<String, ParseError> {
    let mut string = String::new();
    while let Some((_, ch)) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some((_, escaped)) => string.push(escaped),
                None => break,
            },
            c if c == quote => return Ok(string),
            c => string.push(c),
        }
    }
    Err(ParseError::new(start, "unterminated string literal"))
}

/// Parse a numeric literal: digits, optional fraction, optional exponent
fn parse_number(input: &str, start: usize, chars: &mut Chars) -> Result<f64, ParseError> {
    let mut end = start;
    let mut seen_exponent = false;
    while let Some(&(i, ch)) = chars.peek() {
        let accept = ch.is_ascii_digit()
            || ch == '.'
            || (!seen_exponent && (ch == 'e' || ch == 'E'))
            || ((ch == '+' || ch == '-') && matches!(input[start..i].chars().last(), Some('e' | 'E')));
        if !accept {
            break;
        }
        if ch == 'e' || ch == 'E' {
            seen_exponent = true;
        }
        end = i + ch.len_utf8();
        chars.next();
    }
    let literal = &input[start..end];
    literal
        .parse::<f64>()
        .map_err(|_| ParseError::new(start, format!("invalid number '{}'", literal)))
}

/// Parse a bare identifier: letters, digits, `_` and `.`
fn parse_identifier(input: &str, start: usize, chars: &mut Chars) -> String {
    let mut end = start;
    while let Some(&(i, ch)) = chars.peek() {
        if ch.is_alphanumeric() || ch == '_' || ch == '.' {
            end = i + ch.len_utf8();
            chars.next();
        } else {
            break;
        }
    }
    input[start..end].to_string()
}

/// Parse a bracketed variable name such as `[request count]`
fn parse_bracketed(start: usize, chars: &mut Chars) -> Result<String, ParseError> {
    let mut name = String::new();
    for (_, ch) in chars.by_ref() {
        if ch == ']' {
            if name.is_empty() {
                return Err(ParseError::new(start, "empty variable name"));
            }
            return Ok(name);
        }
        name.push(ch);
    }
    Err(ParseError::new(start, "unterminated variable name, expected ']'"))
}

fn keyword_or_identifier(ident: String) -> Token {
    match ident.as_str() {
        "true" => Token::Boolean(true),
        "false" => Token::Boolean(false),
        _ => Token::Identifier(ident),
    }
}

/// Tokenize a formula
///
/// # Examples
///
/// ```
/// use formula_controller::eval::tokenizer::{tokenize, Token};
///
/// let tokens = tokenize("a + 2").unwrap();
/// assert_eq!(tokens[1].token, Token::Plus);
/// ```
pub fn tokenize(input: &str) -> Result<Vec<Spanned>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(position, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        let token = if ch.is_ascii_digit()
            || (ch == '.' && input[position + 1..].starts_with(|c: char| c.is_ascii_digit()))
        {
            Token::Number(parse_number(input, position, &mut chars)?)
        } else if ch == '\'' || ch == '"' {
            chars.next();
            Token::String(parse_string(ch, position, &mut chars)?)
        } else if ch == '[' {
            chars.next();
            Token::Identifier(parse_bracketed(position, &mut chars)?)
        } else if ch.is_alphabetic() || ch == '_' {
            keyword_or_identifier(parse_identifier(input, position, &mut chars))
        } else {
            chars.next();
            match parse_operator(ch, position, &mut chars)? {
                Some(token) => token,
                None => {
                    return Err(ParseError::new(
                        position,
                        format!("unexpected character '{}'", ch),
                    ))
                }
            }
        };

        tokens.push(Spanned { token, position });
    }

    Ok(tokens)
}
