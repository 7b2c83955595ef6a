//! # Parser Module
//!
//! Recursive descent parser with precedence climbing for expressions.
//! Consumes the flat token stream from the lexer and produces the list of
//! top-level [`Item`]s for the compiler.
//!
//! There is no error recovery: the first structural problem is returned
//! as a [`CompileError`] and parsing stops.
//!
//! ## Block structure
//! Statements are not separated by anything. A block (method body, loop
//! body, branch body, class body) is closed by a single `;`, so nested
//! blocks close with one `;` each:
//!
//! ```text
//! class public Counter:
//!     def public static i32 main():
//!         i: i32 = 0
//!         while i < 10:
//!             i = i + 1
//!         ;
//!         return i
//!     ;
//! ;
//! ```

use crate::ast::*;
use crate::error::{CompileError, CompileResult, ErrorCode, Span};
use crate::token::{Token, TokenKind};

// -----------------------------------------------------------------------------
// PRECEDENCE LEVELS
// -----------------------------------------------------------------------------

/// What an infix token does once the climb decides to consume it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Infix {
    Binary(BinOp),
    /// `as TYPE` wraps the left operand instead of reading a right operand.
    Cast,
}

/// Binding power of infix operators, low to high. Level 6 is unused.
///
/// | level | operators          |
/// |-------|--------------------|
/// | 1     | `==` `!=`          |
/// | 2     | `+` `-` `as`       |
/// | 3     | `*` `/` `%`        |
/// | 4     | `>` `<` `>=` `<=`  |
/// | 5     | `&&`               |
/// | 7     | `\|\|`             |
fn infix_operator(kind: &TokenKind) -> Option<(Infix, u8)> {
    let entry = match kind {
        TokenKind::EqEq => (Infix::Binary(BinOp::Eq), 1),
        TokenKind::BangEq => (Infix::Binary(BinOp::Ne), 1),
        TokenKind::Plus => (Infix::Binary(BinOp::Add), 2),
        TokenKind::Minus => (Infix::Binary(BinOp::Sub), 2),
        TokenKind::As => (Infix::Cast, 2),
        TokenKind::Star => (Infix::Binary(BinOp::Mul), 3),
        TokenKind::Slash => (Infix::Binary(BinOp::Div), 3),
        TokenKind::Percent => (Infix::Binary(BinOp::Rem), 3),
        TokenKind::Gt => (Infix::Binary(BinOp::Gt), 4),
        TokenKind::Lt => (Infix::Binary(BinOp::Lt), 4),
        TokenKind::GtEq => (Infix::Binary(BinOp::Ge), 4),
        TokenKind::LtEq => (Infix::Binary(BinOp::Le), 4),
        TokenKind::And => (Infix::Binary(BinOp::And), 5),
        TokenKind::Or => (Infix::Binary(BinOp::Or), 7),
        _ => return None,
    };
    Some(entry)
}

// -----------------------------------------------------------------------------
// PARSER STATE
// -----------------------------------------------------------------------------

/// The LIA parser. Turns tokens into top-level declarations.
pub struct Parser {
    /// Token stream produced by the lexer, always ending in `Eof`.
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    /// Parses the entire token stream.
    ///
    /// # Errors
    /// `InvalidToken` for an unexpected token, `EndOfFile` when the input
    /// ends inside a construct, `SyntaxError` for structural problems.
    pub fn parse(&mut self) -> CompileResult<Vec<Item>> {
        let mut items = Vec::new();
        while !self.is_at_end() {
            items.push(self.top_level()?);
        }
        tracing::debug!(items = items.len(), "parsed program");
        Ok(items)
    }

    // -------------------------------------------------------------------------
    // DECLARATION PARSING
    // -------------------------------------------------------------------------

    fn top_level(&mut self) -> CompileResult<Item> {
        match self.peek_kind() {
            TokenKind::Namespace => {
                let start = self.advance().span; // consume 'namespace'
                let (name, name_span) = self.expect_ident("namespace must have a name")?;
                Ok(Item::Namespace {
                    name,
                    span: start.to(name_span),
                })
            }
            TokenKind::Class | TokenKind::Public | TokenKind::Private => {
                Ok(Item::Class(self.class_declaration()?))
            }
            _ => Err(self.unexpected("expected a namespace declaration or class definition")),
        }
    }

    /// Parses `VIS? class VIS? NAME : (field | def)* ;`
    fn class_declaration(&mut self) -> CompileResult<ClassDecl> {
        let start = self.peek().span;
        let mut is_public = self.visibility();
        self.expect_kind(&TokenKind::Class, "expected 'class'")?;
        if is_public.is_none() {
            is_public = self.visibility();
        }
        let (name, name_span) = self.expect_ident("class must have a name")?;
        self.expect_kind(&TokenKind::Colon, "expected ':' after class head")?;

        let mut fields = Vec::new();
        let mut methods = Vec::new();
        let end = loop {
            match self.peek_kind() {
                TokenKind::Def => methods.push(self.function_declaration()?),
                TokenKind::Field => fields.push(self.field_declaration()?),
                TokenKind::Semicolon => break self.advance().span,
                _ => {
                    return Err(self.unexpected(
                        "expected a method definition, a field or a closing ';'",
                    ))
                }
            }
        };

        Ok(ClassDecl {
            name,
            name_span,
            is_public: is_public.unwrap_or(true),
            fields,
            methods,
            span: start.to(end),
        })
    }

    /// Parses `def VIS class? static? RET NAME (params)? : block`
    fn function_declaration(&mut self) -> CompileResult<FunctionDecl> {
        let start = self.advance().span; // consume 'def'
        let is_public = match self.visibility() {
            Some(public) => public,
            None => return Err(self.unexpected("must declare a public or private function")),
        };
        let is_class_method = self.match_kind(&TokenKind::Class);
        let is_static = !is_class_method && self.match_kind(&TokenKind::Static);

        let (return_type, return_type_span) = self.expect_ident("must declare a return type")?;
        let (name, name_span) = self.expect_ident("must declare the function name")?;

        let params = if self.match_kind(&TokenKind::LParen) {
            self.parse_params()?
        } else {
            Vec::new()
        };

        self.expect_kind(&TokenKind::Colon, "expected ':' after function head")?;
        let body = self.parse_block()?;

        Ok(FunctionDecl {
            name,
            name_span,
            return_type,
            return_type_span,
            params,
            span: start.to(body.span),
            body,
            is_public,
            is_static,
            is_class_method,
        })
    }

    /// Parses `field VIS static? NAME TYPE (= expr)?`
    fn field_declaration(&mut self) -> CompileResult<FieldDecl> {
        let start = self.advance().span; // consume 'field'
        let is_public = match self.visibility() {
            Some(public) => public,
            None => return Err(self.unexpected("must declare a public or private field")),
        };
        let is_static = self.match_kind(&TokenKind::Static);
        let (name, _) = self.expect_ident("field must have a name")?;
        let (type_name, type_span) = self.expect_ident("field must have a type")?;

        let default = if self.match_kind(&TokenKind::Eq) {
            Some(self.expression(0)?)
        } else {
            None
        };
        let end = default.as_ref().map_or(type_span, Expr::span);

        Ok(FieldDecl {
            name,
            type_name,
            is_public,
            is_static,
            default,
            span: start.to(end),
        })
    }

    /// Parses `name: TYPE (, name: TYPE)* )` after the opening parenthesis.
    fn parse_params(&mut self) -> CompileResult<Vec<Param>> {
        let mut params = Vec::new();
        if self.match_kind(&TokenKind::RParen) {
            return Ok(params);
        }

        loop {
            let (name, name_span) =
                self.expect_ident("expected a parameter declaration or closing parenthesis")?;
            self.expect_kind(&TokenKind::Colon, "expected ':' after parameter name")?;
            let (type_name, type_span) = self.expect_ident("parameters must have types")?;
            params.push(Param {
                name,
                type_name,
                span: name_span.to(type_span),
            });

            if self.match_kind(&TokenKind::RParen) {
                break;
            }
            self.expect_kind(&TokenKind::Comma, "expected ',' or ')' in parameter list")?;
        }
        Ok(params)
    }

    // -------------------------------------------------------------------------
    // STATEMENT PARSING
    // -------------------------------------------------------------------------

    /// Parses statements up to and including the closing `;`.
    fn parse_block(&mut self) -> CompileResult<Block> {
        let start = self.peek().span;
        let mut stmts = Vec::new();
        loop {
            if self.check_kind(&TokenKind::Semicolon) {
                let end = self.advance().span;
                return Ok(Block {
                    stmts,
                    span: start.to(end),
                });
            }
            if self.is_at_end() {
                return Err(self.unexpected("expected a closing ';'"));
            }
            stmts.push(self.statement()?);
        }
    }

    fn statement(&mut self) -> CompileResult<Stmt> {
        match self.peek_kind() {
            TokenKind::Return => self.return_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::If => self.if_statement(),
            TokenKind::Ident(_)
                if matches!(self.peek_kind_at(1), TokenKind::Colon | TokenKind::Eq) =>
            {
                self.assignment()
            }
            TokenKind::Ident(_)
            | TokenKind::Int(_)
            | TokenKind::Float(_)
            | TokenKind::Str(_)
            | TokenKind::LParen
            | TokenKind::Minus
            | TokenKind::Plus
            | TokenKind::Bang => {
                let expr = self.expression(0)?;
                let span = expr.span();
                Ok(Stmt::Expr { expr, span })
            }
            _ => Err(self.unexpected("expected a statement")),
        }
    }

    /// Parses `return expr`, or a bare `return` directly before `;`.
    fn return_statement(&mut self) -> CompileResult<Stmt> {
        let start = self.advance().span; // consume 'return'
        if self.check_kind(&TokenKind::Semicolon) {
            return Ok(Stmt::Return {
                value: None,
                span: start,
            });
        }
        let value = self.expression(0)?;
        Ok(Stmt::Return {
            span: start.to(value.span()),
            value: Some(value),
        })
    }

    fn while_statement(&mut self) -> CompileResult<Stmt> {
        let start = self.advance().span; // consume 'while'
        let condition = self.expression(0)?;
        self.expect_kind(&TokenKind::Colon, "missing ':' before loop body")?;
        let body = self.parse_block()?;
        Ok(Stmt::While {
            condition,
            span: start.to(body.span),
            body,
        })
    }

    /// Parses `if c: block (elif c: block)* (else: block)?`
    fn if_statement(&mut self) -> CompileResult<Stmt> {
        let start = self.advance().span; // consume 'if'
        let mut branches = vec![self.cond_branch(start)?];

        while self.check_kind(&TokenKind::Elif) {
            let elif = self.advance().span;
            branches.push(self.cond_branch(elif)?);
        }

        let else_body = if self.match_kind(&TokenKind::Else) {
            self.expect_kind(&TokenKind::Colon, "missing ':' after 'else'")?;
            Some(self.parse_block()?)
        } else {
            None
        };

        let end = match (&else_body, branches.last()) {
            (Some(block), _) => block.span,
            (None, Some(branch)) => branch.span,
            (None, None) => start,
        };
        Ok(Stmt::If {
            branches,
            else_body,
            span: start.to(end),
        })
    }

    fn cond_branch(&mut self, keyword: Span) -> CompileResult<CondBranch> {
        let condition = self.expression(0)?;
        self.expect_kind(&TokenKind::Colon, "missing ':' before branch body")?;
        let body = self.parse_block()?;
        Ok(CondBranch {
            condition,
            span: keyword.to(body.span),
            body,
        })
    }

    /// Parses `name (: TYPE)? (= expr)?`; one of the two must be present.
    fn assignment(&mut self) -> CompileResult<Stmt> {
        let (name, name_span) = self.expect_ident("expected a variable name")?;
        let mut end = name_span;

        let type_name = if self.match_kind(&TokenKind::Colon) {
            let (type_name, type_span) = self.expect_ident(
                "expected a type annotation, since a colon follows the variable name",
            )?;
            end = type_span;
            Some(type_name)
        } else {
            None
        };

        let value = if self.match_kind(&TokenKind::Eq) {
            let value = self.expression(0)?;
            end = value.span();
            Some(value)
        } else {
            None
        };

        if type_name.is_none() && value.is_none() {
            return Err(CompileError::syntax(
                format!(
                    "expected a value or type annotation for the declared variable '{}'",
                    name
                ),
                name_span,
            ));
        }

        Ok(Stmt::Assign {
            name,
            name_span,
            type_name,
            value,
            span: name_span.to(end),
        })
    }

    // -------------------------------------------------------------------------
    // EXPRESSION PARSING — Precedence Climbing
    // -------------------------------------------------------------------------

    /// Parses an expression whose operators all bind tighter than
    /// `min_prec`. Operators of equal level associate to the left.
    fn expression(&mut self, min_prec: u8) -> CompileResult<Expr> {
        let mut left = self.unary()?;

        while let Some((infix, prec)) = infix_operator(self.peek_kind()) {
            if prec <= min_prec {
                break;
            }
            self.advance(); // consume operator

            left = match infix {
                Infix::Cast => {
                    let (target, target_span) =
                        self.expect_ident("expected a type name after cast operator")?;
                    Expr::Cast {
                        span: left.span().to(target_span),
                        expr: Box::new(left),
                        target,
                        target_span,
                    }
                }
                Infix::Binary(op) => {
                    let right = self.expression(prec)?;
                    Expr::Binary {
                        span: left.span().to(right.span()),
                        left: Box::new(left),
                        op,
                        right: Box::new(right),
                    }
                }
            };
        }

        Ok(left)
    }

    fn unary(&mut self) -> CompileResult<Expr> {
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Pos,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.primary(),
        };
        let start = self.advance().span;
        let operand = self.unary()?;
        Ok(Expr::Unary {
            op,
            span: start.to(operand.span()),
            operand: Box::new(operand),
        })
    }

    fn primary(&mut self) -> CompileResult<Expr> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Int(value) => {
                self.advance();
                Ok(Expr::Int {
                    value,
                    span: token.span,
                })
            }
            TokenKind::Float(value) => {
                self.advance();
                Ok(Expr::Float {
                    value,
                    span: token.span,
                })
            }
            TokenKind::Str(value) => {
                self.advance();
                Ok(Expr::Str {
                    value,
                    span: token.span,
                })
            }
            TokenKind::Ident(name) => {
                self.advance();
                if self.match_kind(&TokenKind::LParen) {
                    let (args, end) = self.parse_args()?;
                    return Ok(Expr::Call {
                        callee: name,
                        callee_span: token.span,
                        args,
                        span: token.span.to(end),
                    });
                }
                Ok(Expr::Ident {
                    name,
                    span: token.span,
                })
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.expression(0)?;
                let close = self.expect_kind(&TokenKind::RParen, "expected a closing parenthesis")?;
                Ok(expr.with_span(token.span.to(close.span)))
            }
            _ => Err(self.unexpected("expected an expression")),
        }
    }

    /// Parses call arguments after `(`; returns them with the span of `)`.
    fn parse_args(&mut self) -> CompileResult<(Vec<Expr>, Span)> {
        let mut args = Vec::new();
        if self.check_kind(&TokenKind::RParen) {
            return Ok((args, self.advance().span));
        }

        loop {
            args.push(self.expression(0)?);
            if self.match_kind(&TokenKind::Comma) {
                continue;
            }
            let close = self.expect_kind(&TokenKind::RParen, "expected a closing parenthesis")?;
            return Ok((args, close.span));
        }
    }

    // -------------------------------------------------------------------------
    // TOKEN HELPERS
    // -------------------------------------------------------------------------

    #[inline]
    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    #[inline]
    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.current].kind
    }

    /// Kind of the token `offset` places ahead, clamped to the final `Eof`.
    fn peek_kind_at(&self, offset: usize) -> &TokenKind {
        let index = (self.current + offset).min(self.tokens.len() - 1);
        &self.tokens[index].kind
    }

    #[inline]
    fn advance(&mut self) -> Token {
        let token = self.tokens[self.current].clone();
        if !self.is_at_end() {
            self.current += 1;
        }
        token
    }

    #[inline]
    fn is_at_end(&self) -> bool {
        matches!(self.tokens[self.current].kind, TokenKind::Eof)
    }

    fn check_kind(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind)
    }

    fn match_kind(&mut self, kind: &TokenKind) -> bool {
        if self.check_kind(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consumes `public`/`private` if present.
    fn visibility(&mut self) -> Option<bool> {
        match self.peek_kind() {
            TokenKind::Public => {
                self.advance();
                Some(true)
            }
            TokenKind::Private => {
                self.advance();
                Some(false)
            }
            _ => None,
        }
    }

    fn expect_kind(&mut self, kind: &TokenKind, msg: &str) -> CompileResult<Token> {
        if self.check_kind(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(msg))
        }
    }

    /// Expects an identifier and returns its name and span.
    fn expect_ident(&mut self, msg: &str) -> CompileResult<(String, Span)> {
        if let TokenKind::Ident(name) = self.peek_kind() {
            let name = name.clone();
            let span = self.advance().span;
            Ok((name, span))
        } else {
            Err(self.unexpected(msg))
        }
    }

    /// Error for the current token: `EndOfFile` at `Eof`, else `InvalidToken`.
    fn unexpected(&self, msg: &str) -> CompileError {
        let token = self.peek();
        if self.is_at_end() {
            let end = self
                .current
                .checked_sub(1)
                .map_or(token.span.start, |prev| self.tokens[prev].span.end);
            return CompileError::new(
                ErrorCode::EndOfFile,
                format!("unexpected end of file: {}", msg),
                Span::point(end),
            );
        }
        CompileError::new(
            ErrorCode::InvalidToken,
            format!("{}, found {}", msg, token.kind.describe()),
            token.span,
        )
    }
}
