//! # Token Module
//!
//! Defines all token types and keywords of the LIA language. Tokens are
//! produced by the lexer and consumed by the parser. Each token carries
//! its raw source text and a byte [`Span`].

use crate::error::Span;

// -----------------------------------------------------------------------------
// TOKEN KIND — All Lexical Categories
// -----------------------------------------------------------------------------

/// Represents every possible token type in the LIA language.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // -- Literals --
    /// Integer literal that fits in an `i64`.
    Int(i64),
    /// Float literal, or integral text too large for an `i64`.
    Float(f64),
    /// String literal contents, without the quotes.
    Str(String),

    // -- Identifiers & Keywords --
    Ident(String),
    /// `public`
    Public,
    /// `private`
    Private,
    /// `class`
    Class,
    /// `def`
    Def,
    /// `return`
    Return,
    /// `if`
    If,
    /// `else`
    Else,
    /// `elif`
    Elif,
    /// `while`
    While,
    /// `namespace`
    Namespace,
    /// `static`
    Static,
    /// `field`
    Field,
    /// `as` or `=<`
    As,

    // -- Arithmetic Operators --
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,

    // -- Comparison Operators --
    /// `==`
    EqEq,
    /// `!=`
    BangEq,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    LtEq,
    /// `>=`
    GtEq,

    // -- Logical Operators --
    /// `&` or `&&`
    And,
    /// `|` or `||`
    Or,
    /// `!`
    Bang,

    // -- Assignment --
    /// `=`
    Eq,

    // -- Punctuation --
    /// `:`
    Colon,
    /// `;`
    Semicolon,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `,`
    Comma,
    /// `.`
    Dot,

    // -- Special --
    /// End of file marker.
    Eof,
}

impl TokenKind {
    /// Short human-readable description used in parser diagnostics.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Int(v) => format!("integer '{}'", v),
            TokenKind::Float(v) => format!("float '{}'", v),
            TokenKind::Str(_) => "string".to_string(),
            TokenKind::Ident(name) => format!("identifier '{}'", name),
            TokenKind::Eof => "end of file".to_string(),
            other => format!("{:?}", other),
        }
    }
}

// -----------------------------------------------------------------------------
// TOKEN — Token with Source Location
// -----------------------------------------------------------------------------

/// A single token produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Exact source text the token was lexed from.
    pub text: String,
    pub span: Span,
}

impl Token {
    #[inline]
    pub fn new(kind: TokenKind, text: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            text: text.into(),
            span,
        }
    }
}

// -----------------------------------------------------------------------------
// KEYWORD LOOKUP
// -----------------------------------------------------------------------------

/// Resolves an identifier string to its keyword token kind, if it matches
/// a reserved keyword. Returns `None` for non-keyword identifiers.
#[inline]
pub fn lookup_keyword(ident: &str) -> Option<TokenKind> {
    match ident {
        "public" => Some(TokenKind::Public),
        "private" => Some(TokenKind::Private),
        "class" => Some(TokenKind::Class),
        "def" => Some(TokenKind::Def),
        "return" => Some(TokenKind::Return),
        "if" => Some(TokenKind::If),
        "else" => Some(TokenKind::Else),
        "elif" => Some(TokenKind::Elif),
        "while" => Some(TokenKind::While),
        "namespace" => Some(TokenKind::Namespace),
        "static" => Some(TokenKind::Static),
        "as" => Some(TokenKind::As),
        "field" => Some(TokenKind::Field),
        _ => None,
    }
}
