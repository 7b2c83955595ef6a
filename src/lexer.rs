use crate::error::{CompileError, CompileResult, Span};
use crate::options::Directive;
use crate::token::{lookup_keyword, Token, TokenKind};

pub struct Lexer<'src> {
    source: &'src str,
    bytes: &'src [u8],
    pos: usize,
    directives: Vec<Directive>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            directives: Vec::new(),
        }
    }

    /// Converts the whole source into tokens, terminated by a single `Eof`.
    pub fn tokenize(&mut self) -> CompileResult<Vec<Token>> {
        let mut tokens = Vec::with_capacity(self.bytes.len() / 4);

        loop {
            self.skip_whitespace_and_comments();

            if self.is_at_end() {
                tokens.push(Token::new(TokenKind::Eof, "", Span::point(self.pos)));
                break;
            }

            let token = self.scan_token()?;
            tokens.push(token);
        }

        tracing::debug!(
            tokens = tokens.len(),
            directives = self.directives.len(),
            "lexed source"
        );
        Ok(tokens)
    }

    /// Directive comments seen so far, in source order.
    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    fn scan_token(&mut self) -> CompileResult<Token> {
        let start = self.pos;
        let byte = self.advance();

        let kind = match byte {
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b':' => TokenKind::Colon,
            b';' => TokenKind::Semicolon,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b',' => TokenKind::Comma,
            b'.' => TokenKind::Dot,

            b'&' => {
                self.match_byte(b'&');
                TokenKind::And
            }
            b'|' => {
                self.match_byte(b'|');
                TokenKind::Or
            }
            b'!' => {
                if self.match_byte(b'=') {
                    TokenKind::BangEq
                } else {
                    TokenKind::Bang
                }
            }
            b'=' => {
                if self.match_byte(b'=') {
                    TokenKind::EqEq
                } else if self.match_byte(b'<') {
                    TokenKind::As
                } else {
                    TokenKind::Eq
                }
            }
            b'<' => {
                if self.match_byte(b'=') {
                    TokenKind::LtEq
                } else {
                    TokenKind::Lt
                }
            }
            b'>' => {
                if self.match_byte(b'=') {
                    TokenKind::GtEq
                } else {
                    TokenKind::Gt
                }
            }

            b'"' => return Ok(self.scan_string(start)),

            b'0'..=b'9' => self.scan_number(start),

            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.scan_identifier(start),

            _ => {
                // Report the whole character, not just its first byte.
                let ch = self.source[start..].chars().next().unwrap_or('\u{fffd}');
                let end = start + ch.len_utf8();
                return Err(CompileError::lexer(
                    format!("Unexpected character: '{}'", ch),
                    Span::new(start, end),
                ));
            }
        };

        Ok(self.make_token(kind, start))
    }

    /// Strings have no escapes. A missing closing quote swallows the rest
    /// of the input; the parser reports the resulting end of file.
    fn scan_string(&mut self, start: usize) -> Token {
        let body_start = self.pos;
        let body_end = match memchr::memchr(b'"', &self.bytes[self.pos..]) {
            Some(offset) => {
                self.pos += offset + 1;
                body_start + offset
            }
            None => {
                self.pos = self.bytes.len();
                self.pos
            }
        };
        let value = self.source[body_start..body_end].to_string();
        self.make_token(TokenKind::Str(value), start)
    }

    /// At most one decimal point belongs to a number; a second `.` ends it
    /// and is lexed as its own token.
    fn scan_number(&mut self, start: usize) -> TokenKind {
        let mut seen_dot = false;
        while !self.is_at_end() {
            match self.peek() {
                b'0'..=b'9' => {
                    self.advance();
                }
                b'.' if !seen_dot => {
                    seen_dot = true;
                    self.advance();
                }
                _ => break,
            }
        }

        let text = &self.source[start..self.pos];
        if !seen_dot {
            if let Ok(value) = text.parse::<i64>() {
                return TokenKind::Int(value);
            }
        }
        // Digits with at most one dot always parse as f64.
        TokenKind::Float(text.parse::<f64>().unwrap_or(f64::INFINITY))
    }

    fn scan_identifier(&mut self, start: usize) -> TokenKind {
        while !self.is_at_end() && (self.peek().is_ascii_alphanumeric() || self.peek() == b'_') {
            self.advance();
        }

        let text = &self.source[start..self.pos];
        match lookup_keyword(text) {
            Some(keyword) => keyword,
            None => TokenKind::Ident(text.to_string()),
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while !self.is_at_end() && self.peek().is_ascii_whitespace() {
                self.advance();
            }

            if self.is_at_end() || self.peek() != b'#' {
                break;
            }
            self.advance(); // '#'

            if !self.is_at_end() && self.peek() == b'*' {
                self.skip_block_comment();
            } else {
                self.skip_line_comment();
            }
        }
    }

    fn skip_line_comment(&mut self) {
        let start = self.pos;
        let remaining = &self.bytes[self.pos..];
        self.pos = match memchr::memchr(b'\n', remaining) {
            Some(offset) => self.pos + offset,
            None => self.bytes.len(),
        };

        let body = &self.source[start..self.pos];
        if let Some(directive_body) = body.strip_prefix(':') {
            self.record_directive(directive_body, Span::new(start - 1, self.pos));
        }
    }

    /// `#* ... *#`; the opening `#` is already consumed.
    fn skip_block_comment(&mut self) {
        let start = self.pos;
        self.advance(); // '*'
        let body_start = self.pos;

        let mut body_end = self.bytes.len();
        while let Some(offset) = memchr::memchr(b'*', &self.bytes[self.pos..]) {
            let star = self.pos + offset;
            if self.bytes.get(star + 1) == Some(&b'#') {
                body_end = star;
                self.pos = star + 2;
                break;
            }
            self.pos = star + 1;
        }
        if body_end == self.bytes.len() {
            self.pos = self.bytes.len();
        }

        let body = &self.source[body_start..body_end];
        if let Some(directive_body) = body.strip_prefix(':') {
            self.record_directive(directive_body, Span::new(start - 1, self.pos));
        }
    }

    fn record_directive(&mut self, body: &str, span: Span) {
        match Directive::parse(body, span) {
            Some(directive) => {
                tracing::debug!(?directive, "compiler directive");
                self.directives.push(directive);
            }
            None => tracing::debug!(body, "ignoring unrecognized directive"),
        }
    }

    #[inline]
    fn make_token(&self, kind: TokenKind, start: usize) -> Token {
        Token::new(kind, &self.source[start..self.pos], Span::new(start, self.pos))
    }

    #[inline(always)]
    fn peek(&self) -> u8 {
        self.bytes[self.pos]
    }

    #[inline(always)]
    fn advance(&mut self) -> u8 {
        let byte = self.bytes[self.pos];
        self.pos += 1;
        byte
    }

    #[inline]
    fn match_byte(&mut self, expected: u8) -> bool {
        if !self.is_at_end() && self.bytes[self.pos] == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    #[inline(always)]
    fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}
