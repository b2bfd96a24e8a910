//! Lexer and recursive-descent parser for CEL source text.
//!
//! Produces the [`crate::ast`] tree directly; parenthesized groups are
//! folded away and `true`/`false`/`null` are resolved during lexing, which
//! is where the grammar disambiguates them from identifiers. Operator
//! precedence follows the language definition:
//!
//! `?:` < `||` < `&&` < relations < `+ -` < `* / %` < unary < member/call.
//!
//! Nesting depth is bounded so hostile input fails with a parse error
//! instead of exhausting the stack.

use std::sync::Arc;

use crate::{
    ast::{ArithOp, Expr, ExprNode, RelOp, Span},
    error::ParseError,
};

/// Words the grammar reserves; using one as an identifier is a syntax error.
const RESERVED: &[&str] = &[
    "as", "break", "const", "continue", "else", "for", "function", "if", "import", "let", "loop", "package",
    "namespace", "return", "var", "void", "while",
];

/// Parses a complete expression, consuming all input.
pub fn parse(source: &str, max_depth: usize) -> Result<ExprNode, ParseError> {
    let tokens = Lexer::new(source).run()?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
        depth: 0,
        max_depth,
    };
    let expr = parser.parse_expr()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(parser.error_at(token.span, "unexpected trailing input")),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    /// Unsigned magnitude; the parser applies sign folding so that
    /// `-9223372036854775808` round-trips even though its magnitude does
    /// not fit in i64.
    IntLit(u64),
    UintLit(u64),
    DoubleLit(f64),
    StringLit(Arc<str>),
    BytesLit(Arc<[u8]>),
    BoolLit(bool),
    NullLit,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Dot,
    Comma,
    Colon,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
    AndAnd,
    OrOr,
    In,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    span: Span,
}

/// Computes the one-based line and column of a byte offset.
fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let prefix = &source[..offset.min(source.len())];
    let line = prefix.matches('\n').count() + 1;
    let column = prefix.rfind('\n').map_or(offset + 1, |nl| offset - nl);
    (line, column)
}

struct Lexer<'src> {
    source: &'src str,
    bytes: &'src [u8],
    pos: usize,
}

impl<'src> Lexer<'src> {
    fn new(source: &'src str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> ParseError {
        let (line, column) = line_column(self.source, offset);
        ParseError::new(message, line, column)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let start = self.pos;
            let Some(byte) = self.peek() else {
                break;
            };
            let kind = match byte {
                b'0'..=b'9' => self.lex_number()?,
                b'.' if self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) => self.lex_number()?,
                b'"' | b'\'' => self.lex_string(false, false)?,
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.lex_word()?,
                _ => self.lex_operator()?,
            };
            tokens.push(Token {
                kind,
                span: Span::new(start, self.pos),
            });
        }
        Ok(tokens)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => self.pos += 1,
                // line comments run to end of line
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(byte) = self.peek() {
                        self.pos += 1;
                        if byte == b'\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn lex_operator(&mut self) -> Result<TokenKind, ParseError> {
        let start = self.pos;
        let two = |lexer: &mut Self, kind| {
            lexer.pos += 2;
            Ok(kind)
        };
        let one = |lexer: &mut Self, kind| {
            lexer.pos += 1;
            Ok(kind)
        };
        match (self.peek(), self.peek_at(1)) {
            (Some(b'&'), Some(b'&')) => two(self, TokenKind::AndAnd),
            (Some(b'|'), Some(b'|')) => two(self, TokenKind::OrOr),
            (Some(b'='), Some(b'=')) => two(self, TokenKind::EqEq),
            (Some(b'!'), Some(b'=')) => two(self, TokenKind::Ne),
            (Some(b'<'), Some(b'=')) => two(self, TokenKind::Le),
            (Some(b'>'), Some(b'=')) => two(self, TokenKind::Ge),
            (Some(b'('), _) => one(self, TokenKind::LParen),
            (Some(b')'), _) => one(self, TokenKind::RParen),
            (Some(b'['), _) => one(self, TokenKind::LBracket),
            (Some(b']'), _) => one(self, TokenKind::RBracket),
            (Some(b'{'), _) => one(self, TokenKind::LBrace),
            (Some(b'}'), _) => one(self, TokenKind::RBrace),
            (Some(b'.'), _) => one(self, TokenKind::Dot),
            (Some(b','), _) => one(self, TokenKind::Comma),
            (Some(b':'), _) => one(self, TokenKind::Colon),
            (Some(b'?'), _) => one(self, TokenKind::Question),
            (Some(b'+'), _) => one(self, TokenKind::Plus),
            (Some(b'-'), _) => one(self, TokenKind::Minus),
            (Some(b'*'), _) => one(self, TokenKind::Star),
            (Some(b'/'), _) => one(self, TokenKind::Slash),
            (Some(b'%'), _) => one(self, TokenKind::Percent),
            (Some(b'!'), _) => one(self, TokenKind::Bang),
            (Some(b'<'), _) => one(self, TokenKind::Lt),
            (Some(b'>'), _) => one(self, TokenKind::Gt),
            (Some(other), _) => Err(self.error(start, format!("unexpected character {:?}", other as char))),
            (None, _) => Err(self.error(start, "unexpected end of input")),
        }
    }

    /// Identifiers, keywords, and string-literal prefixes (`r"..."`,
    /// `b'...'`, and combinations).
    fn lex_word(&mut self) -> Result<TokenKind, ParseError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            self.pos += 1;
        }
        let word = &self.source[start..self.pos];

        // A short run of r/b letters directly against a quote is a string
        // prefix, not an identifier.
        if matches!(self.peek(), Some(b'"' | b'\'')) {
            let r_count = word.bytes().filter(|b| matches!(b, b'r' | b'R')).count();
            let b_count = word.bytes().filter(|b| matches!(b, b'b' | b'B')).count();
            let valid_prefix = match word.len() {
                1 => r_count + b_count == 1,
                2 => r_count == 1 && b_count == 1,
                _ => false,
            };
            if valid_prefix {
                return self.lex_string(r_count == 1, b_count == 1);
            }
        }

        match word {
            "true" => Ok(TokenKind::BoolLit(true)),
            "false" => Ok(TokenKind::BoolLit(false)),
            "null" => Ok(TokenKind::NullLit),
            "in" => Ok(TokenKind::In),
            _ if RESERVED.contains(&word) => Err(self.error(start, format!("reserved word '{word}'"))),
            _ => Ok(TokenKind::Ident(word.to_owned())),
        }
    }

    fn lex_number(&mut self) -> Result<TokenKind, ParseError> {
        let start = self.pos;

        // hex int / uint
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_some_and(|b| b.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            if self.pos == digits_start {
                return Err(self.error(start, "malformed hex literal"));
            }
            let magnitude = u64::from_str_radix(&self.source[digits_start..self.pos], 16)
                .map_err(|_| self.error(start, "hex literal too large"))?;
            if matches!(self.peek(), Some(b'u' | b'U')) {
                self.pos += 1;
                return Ok(TokenKind::UintLit(magnitude));
            }
            return Ok(TokenKind::IntLit(magnitude));
        }

        let mut is_double = false;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) {
            is_double = true;
            self.pos += 1;
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let mut lookahead = 1;
            if matches!(self.peek_at(1), Some(b'+' | b'-')) {
                lookahead = 2;
            }
            if self.peek_at(lookahead).is_some_and(|b| b.is_ascii_digit()) {
                is_double = true;
                self.pos += lookahead;
                while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }

        let text = &self.source[start..self.pos];
        if is_double {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error(start, format!("malformed float literal '{text}'")))?;
            return Ok(TokenKind::DoubleLit(value));
        }
        if matches!(self.peek(), Some(b'u' | b'U')) {
            self.pos += 1;
            let magnitude: u64 = text
                .parse()
                .map_err(|_| self.error(start, format!("uint literal out of range '{text}'")))?;
            return Ok(TokenKind::UintLit(magnitude));
        }
        let magnitude: u64 = text
            .parse()
            .map_err(|_| self.error(start, format!("int literal out of range '{text}'")))?;
        Ok(TokenKind::IntLit(magnitude))
    }

    fn lex_string(&mut self, raw: bool, bytes: bool) -> Result<TokenKind, ParseError> {
        let start = self.pos;
        let quote = self.peek().expect("caller checked the opening quote");
        self.pos += 1;
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.pos += 2;
        }

        let mut text = Vec::new();
        loop {
            let Some(byte) = self.peek() else {
                return Err(self.error(start, "unterminated string literal"));
            };
            if byte == quote {
                if !triple {
                    self.pos += 1;
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    break;
                }
                text.push(byte);
                self.pos += 1;
            } else if byte == b'\\' && !raw {
                self.escape_sequence(&mut text, bytes)?;
            } else if byte == b'\n' && !triple {
                return Err(self.error(start, "unterminated string literal"));
            } else {
                text.push(byte);
                self.pos += 1;
            }
        }

        if bytes {
            Ok(TokenKind::BytesLit(Arc::from(text)))
        } else {
            let text =
                String::from_utf8(text).map_err(|_| self.error(start, "string literal is not valid UTF-8"))?;
            Ok(TokenKind::StringLit(Arc::from(text)))
        }
    }

    fn escape_sequence(&mut self, out: &mut Vec<u8>, bytes: bool) -> Result<(), ParseError> {
        let start = self.pos;
        self.pos += 1;
        let Some(escape) = self.peek() else {
            return Err(self.error(start, "trailing backslash in string literal"));
        };
        self.pos += 1;
        match escape {
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'\\' | b'\'' | b'"' | b'`' | b'?' => out.push(escape),
            b'x' | b'X' => {
                let value = self.hex_digits(2, start)?;
                self.push_escaped(out, value, bytes, start)?;
            }
            b'u' => {
                if bytes {
                    return Err(self.error(start, "\\u escapes are not allowed in bytes literals"));
                }
                let value = self.hex_digits(4, start)?;
                self.push_escaped(out, value, bytes, start)?;
            }
            b'U' => {
                if bytes {
                    return Err(self.error(start, "\\U escapes are not allowed in bytes literals"));
                }
                let value = self.hex_digits(8, start)?;
                self.push_escaped(out, value, bytes, start)?;
            }
            b'0'..=b'7' => {
                self.pos -= 1;
                let mut value: u32 = 0;
                for _ in 0..3 {
                    let Some(digit @ b'0'..=b'7') = self.peek() else {
                        return Err(self.error(start, "octal escape needs three digits"));
                    };
                    value = value * 8 + u32::from(digit - b'0');
                    self.pos += 1;
                }
                self.push_escaped(out, value, bytes, start)?;
            }
            other => {
                return Err(self.error(start, format!("invalid escape sequence '\\{}'", other as char)));
            }
        }
        Ok(())
    }

    fn hex_digits(&mut self, count: usize, start: usize) -> Result<u32, ParseError> {
        let mut value: u32 = 0;
        for _ in 0..count {
            let Some(digit) = self.peek().and_then(|b| (b as char).to_digit(16)) else {
                return Err(self.error(start, "malformed hex escape"));
            };
            value = value * 16 + digit;
            self.pos += 1;
        }
        Ok(value)
    }

    fn push_escaped(&self, out: &mut Vec<u8>, value: u32, bytes: bool, start: usize) -> Result<(), ParseError> {
        if bytes {
            let byte = u8::try_from(value).map_err(|_| self.error(start, "byte escape out of range"))?;
            out.push(byte);
        } else {
            let ch = char::from_u32(value).ok_or_else(|| self.error(start, "escape is not a valid code point"))?;
            let mut buf = [0u8; 4];
            out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        }
        Ok(())
    }
}

struct Parser<'src> {
    source: &'src str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl Parser<'_> {
    fn error_at(&self, span: Span, message: impl Into<String>) -> ParseError {
        let (line, column) = line_column(self.source, span.start);
        ParseError::new(message, line, column)
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        let offset = self
            .peek()
            .map_or(self.source.len(), |token| token.span.start);
        let (line, column) = line_column(self.source, offset);
        ParseError::new(message, line, column)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|token| &token.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Span, ParseError> {
        match self.peek() {
            Some(token) if token.kind == *kind => {
                let span = token.span;
                self.pos += 1;
                Ok(span)
            }
            _ => Err(self.error_here(format!("expected {what}"))),
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(self.error_here("expression nesting too deep"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// `expr: conditionalor ['?' conditionalor ':' expr]`
    fn parse_expr(&mut self) -> Result<ExprNode, ParseError> {
        self.enter()?;
        let cond = self.parse_or()?;
        let node = if self.eat(&TokenKind::Question) {
            let then = self.parse_or()?;
            self.expect(&TokenKind::Colon, "':' in conditional")?;
            let orelse = self.parse_expr()?;
            let span = cond.span.join(orelse.span);
            ExprNode::new(
                span,
                Expr::Conditional {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    orelse: Box::new(orelse),
                },
            )
        } else {
            cond
        };
        self.leave();
        Ok(node)
    }

    fn parse_or(&mut self) -> Result<ExprNode, ParseError> {
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::OrOr) {
            self.enter()?;
            let right = self.parse_and()?;
            let span = left.span.join(right.span);
            left = ExprNode::new(
                span,
                Expr::Or {
                    left: Box::new(left),
                    right: Box::new(right),
                },
            );
            self.leave();
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<ExprNode, ParseError> {
        let mut left = self.parse_relation()?;
        while self.eat(&TokenKind::AndAnd) {
            self.enter()?;
            let right = self.parse_relation()?;
            let span = left.span.join(right.span);
            left = ExprNode::new(
                span,
                Expr::And {
                    left: Box::new(left),
                    right: Box::new(right),
                },
            );
            self.leave();
        }
        Ok(left)
    }

    fn parse_relation(&mut self) -> Result<ExprNode, ParseError> {
        let mut left = self.parse_addition()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Lt) => RelOp::Lt,
                Some(TokenKind::Le) => RelOp::Le,
                Some(TokenKind::Gt) => RelOp::Gt,
                Some(TokenKind::Ge) => RelOp::Ge,
                Some(TokenKind::EqEq) => RelOp::Eq,
                Some(TokenKind::Ne) => RelOp::Ne,
                Some(TokenKind::In) => RelOp::In,
                _ => break,
            };
            self.pos += 1;
            self.enter()?;
            let right = self.parse_addition()?;
            let span = left.span.join(right.span);
            left = ExprNode::new(
                span,
                Expr::Relation {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            );
            self.leave();
        }
        Ok(left)
    }

    fn parse_addition(&mut self) -> Result<ExprNode, ParseError> {
        let mut left = self.parse_multiplication()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => ArithOp::Add,
                Some(TokenKind::Minus) => ArithOp::Sub,
                _ => break,
            };
            self.pos += 1;
            self.enter()?;
            let right = self.parse_multiplication()?;
            let span = left.span.join(right.span);
            left = ExprNode::new(
                span,
                Expr::Arith {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            );
            self.leave();
        }
        Ok(left)
    }

    fn parse_multiplication(&mut self) -> Result<ExprNode, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => ArithOp::Mul,
                Some(TokenKind::Slash) => ArithOp::Div,
                Some(TokenKind::Percent) => ArithOp::Mod,
                _ => break,
            };
            self.pos += 1;
            self.enter()?;
            let right = self.parse_unary()?;
            let span = left.span.join(right.span);
            left = ExprNode::new(
                span,
                Expr::Arith {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            );
            self.leave();
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<ExprNode, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::Bang) => {
                let span = self.advance().expect("peeked").span;
                self.enter()?;
                let operand = self.parse_unary()?;
                self.leave();
                let span = span.join(operand.span);
                Ok(ExprNode::new(span, Expr::UnaryNot(Box::new(operand))))
            }
            Some(TokenKind::Minus) => {
                let span = self.advance().expect("peeked").span;
                self.enter()?;
                // A minus directly against an int literal folds into the
                // literal, so i64::MIN is expressible without overflow.
                if let Some(TokenKind::IntLit(magnitude)) = self.peek_kind() {
                    let magnitude = *magnitude;
                    let lit = self.advance().expect("peeked");
                    self.leave();
                    let value = (magnitude as i128).checked_neg().expect("u64 magnitude negates");
                    let value = i64::try_from(value)
                        .map_err(|_| self.error_at(lit.span, "int literal out of range"))?;
                    let span = span.join(lit.span);
                    return self.parse_member_suffix(ExprNode::new(span, Expr::IntLit(value)));
                }
                let operand = self.parse_unary()?;
                self.leave();
                let span = span.join(operand.span);
                Ok(ExprNode::new(span, Expr::UnaryNeg(Box::new(operand))))
            }
            _ => self.parse_member(),
        }
    }

    fn parse_member(&mut self) -> Result<ExprNode, ParseError> {
        let primary = self.parse_primary()?;
        self.parse_member_suffix(primary)
    }

    /// Applies `.ident`, `.ident(...)`, `[...]`, and `{...}` suffixes.
    fn parse_member_suffix(&mut self, mut node: ExprNode) -> Result<ExprNode, ParseError> {
        loop {
            if self.eat(&TokenKind::Dot) {
                let name = self.expect_ident("member name after '.'")?;
                if self.eat(&TokenKind::LParen) {
                    let args = self.parse_expr_list(&TokenKind::RParen)?;
                    let close = self.expect(&TokenKind::RParen, "')' after arguments")?;
                    let span = node.span.join(close);
                    node = ExprNode::new(
                        span,
                        Expr::MemberDotArg {
                            object: Box::new(node),
                            method: name,
                            args,
                        },
                    );
                } else {
                    let span = node.span;
                    node = ExprNode::new(
                        span,
                        Expr::MemberDot {
                            object: Box::new(node),
                            field: name,
                        },
                    );
                }
            } else if self.eat(&TokenKind::LBracket) {
                self.enter()?;
                let index = self.parse_expr()?;
                self.leave();
                let close = self.expect(&TokenKind::RBracket, "']' after index")?;
                let span = node.span.join(close);
                node = ExprNode::new(
                    span,
                    Expr::MemberIndex {
                        object: Box::new(node),
                        index: Box::new(index),
                    },
                );
            } else if self.peek_kind() == Some(&TokenKind::LBrace) {
                let Some(type_name) = flatten_type_path(&node) else {
                    // `{` after a non-path expression starts no message
                    // literal; leave it for the caller (e.g. a map literal
                    // in an enclosing context).
                    return Ok(node);
                };
                self.pos += 1;
                let fields = self.parse_field_inits()?;
                let close = self.expect(&TokenKind::RBrace, "'}' after field initializers")?;
                let span = node.span.join(close);
                node = ExprNode::new(span, Expr::MemberObject { type_name, fields });
            } else {
                return Ok(node);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<ExprNode, ParseError> {
        let Some(token) = self.advance() else {
            return Err(self.error_here("unexpected end of expression"));
        };
        let span = token.span;
        let node = match token.kind {
            TokenKind::IntLit(magnitude) => {
                let value = i64::try_from(magnitude)
                    .map_err(|_| self.error_at(span, "int literal out of range"))?;
                ExprNode::new(span, Expr::IntLit(value))
            }
            TokenKind::UintLit(magnitude) => ExprNode::new(span, Expr::UintLit(magnitude)),
            TokenKind::DoubleLit(value) => ExprNode::new(span, Expr::DoubleLit(value)),
            TokenKind::StringLit(text) => ExprNode::new(span, Expr::StringLit(text)),
            TokenKind::BytesLit(data) => ExprNode::new(span, Expr::BytesLit(data)),
            TokenKind::BoolLit(value) => ExprNode::new(span, Expr::BoolLit(value)),
            TokenKind::NullLit => ExprNode::new(span, Expr::NullLit),
            TokenKind::Ident(name) => {
                if self.eat(&TokenKind::LParen) {
                    let args = self.parse_expr_list(&TokenKind::RParen)?;
                    let close = self.expect(&TokenKind::RParen, "')' after arguments")?;
                    ExprNode::new(span.join(close), Expr::IdentArg { function: name, args })
                } else {
                    ExprNode::new(span, Expr::Ident(name))
                }
            }
            TokenKind::Dot => {
                let name = self.expect_ident("identifier after leading '.'")?;
                if self.eat(&TokenKind::LParen) {
                    let args = self.parse_expr_list(&TokenKind::RParen)?;
                    let close = self.expect(&TokenKind::RParen, "')' after arguments")?;
                    ExprNode::new(span.join(close), Expr::DotIdentArg { function: name, args })
                } else {
                    ExprNode::new(span, Expr::DotIdent(name))
                }
            }
            TokenKind::LParen => {
                self.enter()?;
                let inner = self.parse_expr()?;
                self.leave();
                let close = self.expect(&TokenKind::RParen, "')'")?;
                // paren_expr is folded: only the span widens
                ExprNode::new(span.join(close), inner.expr)
            }
            TokenKind::LBracket => {
                let items = self.parse_expr_list(&TokenKind::RBracket)?;
                let close = self.expect(&TokenKind::RBracket, "']' after list elements")?;
                ExprNode::new(span.join(close), Expr::ListLit(items))
            }
            TokenKind::LBrace => {
                let entries = self.parse_map_inits()?;
                let close = self.expect(&TokenKind::RBrace, "'}' after map entries")?;
                ExprNode::new(span.join(close), Expr::MapLit(entries))
            }
            other => {
                return Err(self.error_at(span, format!("unexpected token {other:?}")));
            }
        };
        Ok(node)
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::Ident(_)) => {
                let Some(Token {
                    kind: TokenKind::Ident(name),
                    ..
                }) = self.advance()
                else {
                    unreachable!("peeked an identifier");
                };
                Ok(name)
            }
            _ => Err(self.error_here(format!("expected {what}"))),
        }
    }

    /// Comma-separated expressions up to (not including) `close`; allows a
    /// trailing comma.
    fn parse_expr_list(&mut self, close: &TokenKind) -> Result<Vec<ExprNode>, ParseError> {
        let mut items = Vec::new();
        while self.peek_kind() != Some(close) {
            self.enter()?;
            items.push(self.parse_expr()?);
            self.leave();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(items)
    }

    fn parse_map_inits(&mut self) -> Result<Vec<(ExprNode, ExprNode)>, ParseError> {
        let mut entries = Vec::new();
        while self.peek_kind() != Some(&TokenKind::RBrace) {
            self.enter()?;
            let key = self.parse_expr()?;
            self.expect(&TokenKind::Colon, "':' in map entry")?;
            let value = self.parse_expr()?;
            self.leave();
            entries.push((key, value));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(entries)
    }

    fn parse_field_inits(&mut self) -> Result<Vec<(String, ExprNode)>, ParseError> {
        let mut fields = Vec::new();
        while self.peek_kind() != Some(&TokenKind::RBrace) {
            let name = self.expect_ident("field name")?;
            self.expect(&TokenKind::Colon, "':' in field initializer")?;
            self.enter()?;
            let value = self.parse_expr()?;
            self.leave();
            fields.push((name, value));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(fields)
    }
}

/// Flattens an ident / member-dot chain into a dotted type name for message
/// construction. Returns `None` when the expression is not a plain path.
fn flatten_type_path(node: &ExprNode) -> Option<String> {
    match &node.expr {
        Expr::Ident(name) | Expr::DotIdent(name) => Some(name.clone()),
        Expr::MemberDot { object, field } => {
            let mut path = flatten_type_path(object)?;
            path.push('.');
            path.push_str(field);
            Some(path)
        }
        _ => None,
    }
}
