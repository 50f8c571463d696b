//! The token definition for the field path language.

/// A token is a single unit of a path, with a specific kind and location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
}

/// The kind of a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    /// Root token including the leading `$`, e.g. `$aasdesc`.
    Root(&'a str),
    Identifier(&'a str),
    /// Raw digits between brackets, converted by the parser.
    Digits(&'a str),

    // Punctuation
    Hash,     // #
    Dot,      // .
    LBracket, // [
    RBracket, // ]

    // Special
    Illegal(char),
}

impl TokenKind<'_> {
    /// Short human readable name, used in parser error messages.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Root(r) => format!("root `{r}`"),
            TokenKind::Identifier(s) => format!("identifier `{s}`"),
            TokenKind::Digits(d) => format!("number `{d}`"),
            TokenKind::Hash => "`#`".to_string(),
            TokenKind::Dot => "`.`".to_string(),
            TokenKind::LBracket => "`[`".to_string(),
            TokenKind::RBracket => "`]`".to_string(),
            TokenKind::Illegal(c) => format!("illegal character `{c}`"),
        }
    }
}

/// Represents a span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// The starting byte offset.
    pub start: usize,
    /// The ending byte offset.
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}
