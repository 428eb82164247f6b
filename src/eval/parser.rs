//! Recursive-descent parser for formulas
//!
//! Precedence, lowest first: `?:`, `||`, `&&`, comparisons, `+ -`,
//! `* / %`, unary `- !`, `**` (right associative).
//!
//! Expression trees are at most [`MAX_NESTING`] levels deep, so evaluating a
//! parsed formula cannot exhaust the stack.

use super::ast::{BinaryOp, Expression, UnaryOp};
use super::error::ParseError;
use super::functions::FunctionRegistry;
use super::tokenizer::{tokenize, Spanned, Token};
use super::value::Value;

/// Deepest expression tree a formula may produce
pub const MAX_NESTING: usize = 256;

/// Formula parser bound to the functions that calls may name
pub struct FormulaParser<'a> {
    functions: &'a FunctionRegistry,
}

impl<'a> FormulaParser<'a> {
    pub fn new(functions: &'a FunctionRegistry) -> Self {
        Self { functions }
    }

    /// Parse a formula string
    pub fn parse(&self, input: &str) -> Result<Expression, ParseError> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(ParseError::new(0, "empty formula"));
        }

        let mut cursor = Cursor {
            tokens,
            index: 0,
            depth: 0,
            end: input.len(),
            functions: self.functions,
        };
        let expr = cursor.parse_ternary()?;
        match cursor.peek() {
            None => Ok(expr),
            Some(spanned) => Err(ParseError::new(
                spanned.position,
                format!("unexpected {}", spanned.token.describe()),
            )),
        }
    }
}

struct Cursor<'a> {
    tokens: Vec<Spanned>,
    index: usize,
    depth: usize,
    /// Length of the input, reported as the position of end-of-input errors
    end: usize,
    functions: &'a FunctionRegistry,
}

impl Cursor<'_> {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.index)
    }

    fn peek_token(&self) -> Option<&Token> {
        self.peek().map(|spanned| &spanned.token)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let spanned = self.tokens.get(self.index).cloned();
        if spanned.is_some() {
            self.index += 1;
        }
        spanned
    }

    /// Consume the next token if it equals `token`
    fn eat(&mut self, token: &Token) -> bool {
        if self.peek_token() == Some(token) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn position(&self) -> usize {
        self.peek().map_or(self.end, |spanned| spanned.position)
    }

    /// Descend one level, failing once the tree would exceed `MAX_NESTING`
    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ParseError::new(self.position(), "formula nested too deeply"));
        }
        Ok(())
    }

    fn leave(&mut self, levels: usize) {
        self.depth -= levels;
    }

    fn expect(&mut self, token: Token) -> Result<(), ParseError> {
        match self.advance() {
            Some(spanned) if spanned.token == token => Ok(()),
            Some(spanned) => Err(ParseError::new(
                spanned.position,
                format!(
                    "expected {} but found {}",
                    token.describe(),
                    spanned.token.describe()
                ),
            )),
            None => Err(ParseError::new(
                self.end,
                format!("unexpected end of formula, expected {}", token.describe()),
            )),
        }
    }

    fn parse_ternary(&mut self) -> Result<Expression, ParseError> {
        self.enter()?;
        let condition = self.parse_binary(BinaryOp::Or.precedence())?;
        if !self.eat(&Token::Question) {
            self.leave(1);
            return Ok(condition);
        }
        let then = self.parse_ternary()?;
        self.expect(Token::Colon)?;
        let otherwise = self.parse_ternary()?;
        self.leave(1);
        Ok(Expression::Ternary {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    /// Left-associative binary operators at or above `min_precedence`,
    /// excluding `**` which binds inside unary expressions.
    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expression, ParseError> {
        let mut left = self.parse_unary()?;
        // Every fold deepens the left spine by one level.
        let mut folds = 0;

        while let Some(op) = self.peek_token().and_then(infix_operator) {
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            self.enter()?;
            folds += 1;
            self.index += 1;
            let right = self.parse_binary(precedence + 1)?;
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        self.leave(folds);
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression, ParseError> {
        let op = match self.peek_token() {
            Some(Token::Minus) => UnaryOp::Negate,
            Some(Token::Not) => UnaryOp::Not,
            _ => return self.parse_power(),
        };
        self.enter()?;
        self.index += 1;
        let operand = self.parse_unary()?;
        self.leave(1);
        Ok(Expression::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_power(&mut self) -> Result<Expression, ParseError> {
        let base = self.parse_primary()?;
        if !self.eat(&Token::Power) {
            return Ok(base);
        }
        self.enter()?;
        let exponent = self.parse_unary()?;
        self.leave(1);
        Ok(Expression::Binary {
            op: BinaryOp::Power,
            left: Box::new(base),
            right: Box::new(exponent),
        })
    }

    fn parse_primary(&mut self) -> Result<Expression, ParseError> {
        let Some(Spanned { token, position }) = self.advance() else {
            return Err(ParseError::new(self.end, "unexpected end of formula"));
        };

        match token {
            Token::Number(n) => Ok(Expression::Literal(Value::Number(n))),
            Token::String(s) => Ok(Expression::Literal(Value::String(s))),
            Token::Boolean(b) => Ok(Expression::Literal(Value::Bool(b))),
            Token::LeftParen => {
                let inner = self.parse_ternary()?;
                self.expect(Token::RightParen)?;
                Ok(inner)
            }
            Token::Identifier(name) => {
                if self.eat(&Token::LeftParen) {
                    self.parse_call(name, position)
                } else {
                    Ok(Expression::Variable(name))
                }
            }
            other => Err(ParseError::new(
                position,
                format!("unexpected {}", other.describe()),
            )),
        }
    }

    /// Parse call arguments; the opening parenthesis is already consumed
    fn parse_call(&mut self, name: String, position: usize) -> Result<Expression, ParseError> {
        if !self.functions.contains(&name) {
            return Err(ParseError::new(
                position,
                format!("undefined function '{}'", name),
            ));
        }

        let mut args = Vec::new();
        if !self.eat(&Token::RightParen) {
            loop {
                args.push(self.parse_ternary()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(Token::RightParen)?;
                break;
            }
        }

        Ok(Expression::Call { name, args })
    }
}

fn infix_operator(token: &Token) -> Option<BinaryOp> {
    let op = match token {
        Token::Or => BinaryOp::Or,
        Token::And => BinaryOp::And,
        Token::Equal => BinaryOp::Equal,
        Token::NotEqual => BinaryOp::NotEqual,
        Token::Greater => BinaryOp::Greater,
        Token::Less => BinaryOp::Less,
        Token::GreaterEqual => BinaryOp::GreaterEqual,
        Token::LessEqual => BinaryOp::LessEqual,
        Token::Plus => BinaryOp::Add,
        Token::Minus => BinaryOp::Subtract,
        Token::Star => BinaryOp::Multiply,
        Token::Slash => BinaryOp::Divide,
        Token::Percent => BinaryOp::Remainder,
        _ => return None,
    };
    Some(op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parse(input: &str) -> Result<Expression, ParseError> {
        let functions = FunctionRegistry::standard(Duration::from_secs(1));
        FormulaParser::new(&functions).parse(input)
    }

    fn canonical(input: &str) -> String {
        parse(input).unwrap().to_string()
    }

    #[test]
    fn test_precedence() {
        let expr = parse("1 + 2 * 3").unwrap();
        assert!(matches!(
            expr,
            Expression::Binary { op: BinaryOp::Add, ref right, .. }
                if matches!(**right, Expression::Binary { op: BinaryOp::Multiply, .. })
        ));
        assert_eq!(canonical("(1+2)*3"), "(1 + 2) * 3");
        assert_eq!(canonical("1+(2*3)"), "1 + 2 * 3");
        assert_eq!(canonical("a-(b-c)"), "a - (b - c)");
        assert_eq!(canonical("(a-b)-c"), "a - b - c");
    }

    #[test]
    fn test_power_is_right_associative_and_binds_tighter_than_negation() {
        assert_eq!(canonical("2**3**2"), "2 ** 3 ** 2");
        assert_eq!(canonical("(2**3)**2"), "(2 ** 3) ** 2");
        let expr = parse("-2 ** 2").unwrap();
        assert!(matches!(expr, Expression::Unary { op: UnaryOp::Negate, .. }));
        assert_eq!(canonical("(-2)**2"), "(-2) ** 2");
    }

    #[test]
    fn test_logical_and_comparison() {
        assert_eq!(canonical("a>1&&b<2||!c"), "a > 1 && b < 2 || !c");
        assert_eq!(canonical("a && (b || c)"), "a && (b || c)");
    }

    #[test]
    fn test_ternary() {
        let expr = parse("x > 0 ? 'pos' : x < 0 ? 'neg' : 'zero'").unwrap();
        assert!(matches!(expr, Expression::Ternary { ref otherwise, .. }
            if matches!(**otherwise, Expression::Ternary { .. })));
        assert_eq!(
            canonical("x>0?'pos':'other'"),
            "x > 0 ? 'pos' : 'other'"
        );
    }

    #[test]
    fn test_calls() {
        let expr = parse("trunc(x / 3, 2)").unwrap();
        assert!(matches!(expr, Expression::Call { ref name, ref args } if name == "trunc" && args.len() == 2));
        assert_eq!(canonical("strlen( [user name] )"), "strlen([user name])");
        assert_eq!(canonical("responseTime(\"http://x\")"), "responseTime('http://x')");
    }

    #[test]
    fn test_unknown_function_is_parse_error() {
        let err = parse("1 + sqrt(4)").unwrap_err();
        assert_eq!(err.message, "undefined function 'sqrt'");
        assert_eq!(err.position, 4);
    }

    #[test]
    fn test_unbalanced_parenthesis() {
        let err = parse("(").unwrap_err();
        assert_eq!(err.to_string(), "unexpected end of formula at position 1");

        let err = parse("(1 + 2").unwrap_err();
        assert_eq!(
            err.to_string(),
            "unexpected end of formula, expected ')' at position 6"
        );

        let err = parse("1 + 2)").unwrap_err();
        assert_eq!(err.to_string(), "unexpected ')' at position 5");
    }

    #[test]
    fn test_other_syntax_errors() {
        assert!(parse("").is_err());
        assert!(parse("   ").is_err());
        assert!(parse("1 +").is_err());
        assert!(parse("* 2").is_err());
        assert!(parse("trunc(1,").is_err());
        assert!(parse("a ? b").is_err());
        assert!(parse("1 2").is_err());
    }

    #[test]
    fn test_nesting_is_bounded() {
        let nested = |levels: usize| format!("{}1{}", "(".repeat(levels), ")".repeat(levels));
        assert_eq!(canonical(&nested(100)), "1");

        let err = parse(&nested(3_000)).unwrap_err();
        assert_eq!(err.message, "formula nested too deeply");

        for formula in [
            format!("{}1", "-".repeat(3_000)),
            format!("{}1", "!".repeat(3_000)),
            vec!["2"; 3_000].join(" ** "),
            vec!["1"; 3_000].join(" + "),
            format!("{}1{}", "strlen(".repeat(3_000), ")".repeat(3_000)),
            format!("{}1{}", "x ? ".repeat(3_000), " : 0".repeat(3_000)),
        ] {
            let err = parse(&formula).unwrap_err();
            assert_eq!(err.message, "formula nested too deeply", "{}", &formula[..20]);
        }

        let sum = vec!["1"; 100].join(" + ");
        assert!(parse(&sum).is_ok());
    }

    #[test]
    fn test_variables_are_collected() {
        let expr = parse("a + b * a + trunc(c, 2)").unwrap();
        assert_eq!(expr.variables(), vec!["a", "b", "c"]);
    }
}
