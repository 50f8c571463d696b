//! 字段路径的语法分析器
//!
//! ## 语法
//!
//! ```text
//! path     := ROOT '#' segment ('.' segment)*
//! segment  := IDENT selector?
//! selector := '[' DIGITS ']'     固定下标
//!           | '[' ']'            通配（存在量词）
//! ```
//!
//! ## 示例
//!
//! ```text
//! $aasdesc#idShort
//! $aasdesc#specificAssetIds[0].externalSubjectId.keys[1].value
//! $sm#semanticId.keys[].value
//! ```
//!
//! 片段（FRAGMENT）使用相同语法，但最后一段必须带下标，指向一个重复结构。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lexer::Lexer;
use crate::token::{Span, Token, TokenKind};

/// 段上的下标选择器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    /// 没有方括号
    None,
    /// `[n]`
    Fixed(u32),
    /// `[]`
    Any,
}

/// 路径中的一段，例如 `keys[1]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment {
    pub name: String,
    pub selector: Selector,
}

impl Segment {
    pub fn new(name: impl Into<String>, selector: Selector) -> Self {
        Self {
            name: name.into(),
            selector,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.selector {
            Selector::None => write!(f, "{}", self.name),
            Selector::Fixed(n) => write!(f, "{}[{}]", self.name, n),
            Selector::Any => write!(f, "{}[]", self.name),
        }
    }
}

/// 解析后的根限定路径
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    root: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    /// 解析字段路径
    pub fn parse(input: &str) -> Result<Self> {
        let tokens: Vec<_> = Lexer::new(input).collect();
        let mut parser = Parser::new(input, &tokens);
        let root = parser.parse_root()?;
        let segments = parser.parse_segments()?;
        Ok(Self { root, segments })
    }

    /// 解析片段路径，要求最后一段带下标
    pub fn parse_fragment(input: &str) -> Result<Self> {
        let path = Self::parse(input)?;
        match path.last().selector {
            Selector::None => Err(Error::PathSyntax {
                path: input.to_string(),
                span: Span::new(input.len(), input.len()),
                message: "fragment must end on an indexed segment (`[]` or `[n]`)".to_string(),
            }),
            _ => Ok(path),
        }
    }

    /// 根标识，包含 `$`
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// 解析保证至少有一段
    pub fn last(&self) -> &Segment {
        &self.segments[self.segments.len() - 1]
    }

    /// 路径中是否出现 `[]`
    pub fn is_quantified(&self) -> bool {
        self.segments.iter().any(|s| s.selector == Selector::Any)
    }

    /// 本路径是否位于 `prefix` 之下：根相同、段名逐一相同，
    /// 且下标要么相同，要么本路径在该位置使用 `[]`
    pub fn is_under(&self, prefix: &FieldPath) -> bool {
        self.root == prefix.root
            && self.segments.len() >= prefix.segments.len()
            && self
                .segments
                .iter()
                .zip(&prefix.segments)
                .all(|(own, pre)| {
                    own.name == pre.name
                        && (own.selector == pre.selector || own.selector == Selector::Any)
                })
    }

    /// 截取前 `len` 段（至少保留一段）
    pub fn truncated(&self, len: usize) -> FieldPath {
        FieldPath {
            root: self.root.clone(),
            segments: self.segments[..len.clamp(1, self.segments.len())].to_vec(),
        }
    }

    /// 替换最后一段的下标
    pub fn with_last_selector(&self, selector: Selector) -> FieldPath {
        let mut path = self.clone();
        if let Some(last) = path.segments.last_mut() {
            last.selector = selector;
        }
        path
    }

    /// 把位于 `prefix` 之下的路径改写为以 `prefix` 的各段开头，
    /// 使其中的 `[]` 采用前缀中的下标
    pub fn rebase(&self, prefix: &FieldPath) -> Option<FieldPath> {
        if !self.is_under(prefix) {
            return None;
        }
        let mut segments = prefix.segments.clone();
        segments.extend_from_slice(&self.segments[prefix.segments.len()..]);
        Some(FieldPath {
            root: self.root.clone(),
            segments,
        })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#", self.root)?;
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for FieldPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(value: FieldPath) -> Self {
        value.to_string()
    }
}

/// 解析不含根的相对路径，例如绑定配置中的 `keys[0].value`
pub fn parse_relative(input: &str) -> Result<Vec<Segment>> {
    let tokens: Vec<_> = Lexer::new(input).collect();
    let mut parser = Parser::new(input, &tokens);
    parser.parse_segments()
}

struct Parser<'a> {
    input: &'a str,
    tokens: &'a [Token<'a>],
    position: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, tokens: &'a [Token<'a>]) -> Self {
        Self {
            input,
            tokens,
            position: 0,
        }
    }

    /// 返回当前 token，不推进位置
    fn peek(&self) -> Option<&'a Token<'a>> {
        self.tokens.get(self.position)
    }

    /// 推进一个 token 并返回它
    fn advance(&mut self) -> Option<&'a Token<'a>> {
        let token = self.tokens.get(self.position);
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn error(&self, message: String, span: Span) -> Error {
        Error::PathSyntax {
            path: self.input.to_string(),
            span,
            message,
        }
    }

    /// 当前 token 的描述与位置，输入结束时指向末尾
    fn found(&self) -> (String, Span) {
        match self.peek() {
            Some(token) => (token.kind.describe(), token.span),
            None => (
                "end of path".to_string(),
                Span::new(self.input.len(), self.input.len()),
            ),
        }
    }

    /// 期望下一个 token 为指定类型
    fn expect(&mut self, kind: TokenKind<'static>, what: &str) -> Result<Span> {
        match self.peek() {
            Some(token) if token.kind == kind => {
                let span = token.span;
                self.position += 1;
                Ok(span)
            }
            _ => {
                let (found, span) = self.found();
                Err(self.error(format!("expected {what}, found {found}"), span))
            }
        }
    }

    fn parse_root(&mut self) -> Result<String> {
        let root = match self.peek() {
            Some(Token {
                kind: TokenKind::Root(root),
                ..
            }) => root.to_string(),
            _ => {
                let (found, span) = self.found();
                return Err(self.error(format!("expected root like `$sm`, found {found}"), span));
            }
        };
        self.advance();
        self.expect(TokenKind::Hash, "`#` after root")?;
        Ok(root)
    }

    /// segment ('.' segment)* 直到输入结束
    fn parse_segments(&mut self) -> Result<Vec<Segment>> {
        let mut segments = vec![self.parse_segment()?];
        while self.peek().is_some() {
            self.expect(TokenKind::Dot, "`.` or `[`")?;
            segments.push(self.parse_segment()?);
        }
        Ok(segments)
    }

    fn parse_segment(&mut self) -> Result<Segment> {
        let name = match self.peek() {
            Some(Token {
                kind: TokenKind::Identifier(name),
                ..
            }) => name.to_string(),
            _ => {
                let (found, span) = self.found();
                return Err(self.error(format!("expected segment name, found {found}"), span));
            }
        };
        self.advance();

        let selector = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::LBracket) => {
                self.advance();
                self.parse_selector()?
            }
            _ => Selector::None,
        };
        Ok(Segment { name, selector })
    }

    /// `[` 已被消费
    fn parse_selector(&mut self) -> Result<Selector> {
        let selector = match self.peek() {
            Some(Token {
                kind: TokenKind::RBracket,
                ..
            }) => Selector::Any,
            Some(Token {
                kind: TokenKind::Digits(digits),
                span,
            }) => {
                let index = digits.parse::<u32>().map_err(|_| {
                    self.error(format!("index `{digits}` is out of range"), *span)
                })?;
                self.advance();
                Selector::Fixed(index)
            }
            _ => {
                let (found, span) = self.found();
                return Err(self.error(format!("expected index or `]`, found {found}"), span));
            }
        };
        self.expect(TokenKind::RBracket, "`]`")?;
        Ok(selector)
    }
}
