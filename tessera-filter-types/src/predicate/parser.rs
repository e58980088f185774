use std::ops::Range;

use logos::Logos;
use thiserror::Error;

use super::{CompareOp, Literal, Operand, Predicate, lexer::Token};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at offset {}: {message}", .span.start)]
pub struct PredicateParseError {
    pub span: Range<usize>,
    pub message: String,
}

impl PredicateParseError {
    fn new(span: Range<usize>, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
        }
    }
}

type ParseResult<T> = Result<T, PredicateParseError>;

fn tokenize(input: &str) -> ParseResult<Vec<(Token, Range<usize>)>> {
    let mut lexer = Token::lexer(input);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next() {
        let span = lexer.span();
        match token {
            Ok(token) => tokens.push((token, span)),
            Err(()) => {
                return Err(PredicateParseError::new(
                    span.clone(),
                    format!("unexpected input {:?}", &input[span]),
                ));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, Range<usize>)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn span(&self) -> Range<usize> {
        self.tokens
            .get(self.pos)
            .map_or(self.end..self.end, |(_, s)| s.clone())
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
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

    fn expect(&mut self, expected: Token) -> ParseResult<()> {
        if self.eat(&expected) {
            return Ok(());
        }
        Err(self.error(format!("expected {}", expected.describe())))
    }

    fn error(&self, message: impl Into<String>) -> PredicateParseError {
        let found = match self.peek() {
            Some(token) => format!(", found {}", token.describe()),
            None => ", found end of input".to_string(),
        };
        PredicateParseError::new(self.span(), format!("{}{found}", message.into()))
    }

    fn or_expr(&mut self) -> ParseResult<Predicate> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::Or) {
            let right = self.and_expr()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> ParseResult<Predicate> {
        let mut left = self.not_expr()?;
        while self.eat(&Token::And) {
            let right = self.not_expr()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> ParseResult<Predicate> {
        if self.eat(&Token::Not) {
            return Ok(Predicate::Not(Box::new(self.not_expr()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> ParseResult<Predicate> {
        if self.eat(&Token::LParen) {
            let inner = self.or_expr()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }

        let operand = self.operand()?;
        self.postfix(operand)
    }

    fn postfix(&mut self, operand: Operand) -> ParseResult<Predicate> {
        let op = match self.peek() {
            Some(Token::Eq) => Some(CompareOp::Eq),
            Some(Token::Ne) => Some(CompareOp::Ne),
            Some(Token::Lt) => Some(CompareOp::Lt),
            Some(Token::Lte) => Some(CompareOp::Lte),
            Some(Token::Gt) => Some(CompareOp::Gt),
            Some(Token::Gte) => Some(CompareOp::Gte),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let right = self.operand()?;
            return Ok(Predicate::Compare(operand, op, right));
        }

        if self.eat(&Token::Is) {
            let negated = self.eat(&Token::Not);
            self.expect(Token::Null)?;
            return Ok(Predicate::IsNull { operand, negated });
        }

        let negated = self.eat(&Token::Not);
        if self.eat(&Token::In) {
            let list = self.literal_list()?;
            return Ok(Predicate::In {
                operand,
                list,
                negated,
            });
        }
        if self.eat(&Token::Like) {
            let span = self.span();
            let Some(Token::String(pattern)) = self.advance() else {
                return Err(PredicateParseError::new(span, "expected string pattern after LIKE"));
            };
            return Ok(Predicate::Like {
                operand,
                pattern,
                negated,
            });
        }

        match (operand, negated) {
            (Operand::Literal(Literal::Bool(b)), false) => Ok(Predicate::Const(b)),
            (_, true) => Err(self.error("expected IN or LIKE after NOT")),
            _ => Err(self.error("expected comparison operator")),
        }
    }

    fn operand(&mut self) -> ParseResult<Operand> {
        let span = self.span();
        Ok(match self.advance() {
            Some(Token::Ident(name)) | Some(Token::QuotedIdent(name)) => Operand::Field(name),
            Some(token) => Operand::Literal(
                literal_from(token).ok_or_else(|| {
                    PredicateParseError::new(span, "expected field or literal")
                })?,
            ),
            None => {
                return Err(PredicateParseError::new(
                    span,
                    "expected field or literal, found end of input",
                ));
            }
        })
    }

    fn literal_list(&mut self) -> ParseResult<Vec<Literal>> {
        self.expect(Token::LParen)?;
        let mut list = Vec::new();
        loop {
            let span = self.span();
            let literal = self
                .advance()
                .and_then(literal_from)
                .ok_or_else(|| PredicateParseError::new(span, "expected literal in IN list"))?;
            list.push(literal);

            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(Token::RParen)?;
            return Ok(list);
        }
    }
}

fn literal_from(token: Token) -> Option<Literal> {
    Some(match token {
        Token::Null => Literal::Null,
        Token::Bool(b) => Literal::Bool(b),
        Token::Number(n) => Literal::Number(n),
        Token::String(s) => Literal::String(s),
        _ => return None,
    })
}

/// Parse a predicate, failing on the first syntax error.
pub fn parse(input: &str) -> Result<Predicate, PredicateParseError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(PredicateParseError::new(0..0, "empty predicate"));
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.len(),
    };
    let predicate = parser.or_expr()?;
    if parser.peek().is_some() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(predicate)
}
