//! 字段路径的词法分析器
//!
//! 把 `$aasdesc#specificAssetIds[0].externalSubjectId.keys[].value`
//! 这样的路径切分为 token 序列。

use crate::token::{Span, Token, TokenKind};

pub struct Lexer<'a> {
    input: &'a str,
    /// 输入字符串中的当前位置（字节索引）
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer { input, position: 0 }
    }

    /// 返回当前位置的字符，不推进位置
    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    /// 推进位置一个字符并返回该字符
    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if let Some(c) = c {
            self.position += c.len_utf8();
        }
        c
    }

    /// 消费满足条件的连续字符
    fn eat_while(&mut self, pred: impl Fn(char) -> bool) {
        while let Some(c) = self.peek() {
            if pred(c) {
                self.bump();
            } else {
                break;
            }
        }
    }

    /// 读取数字（仅出现在方括号内）
    fn read_digits(&mut self, start: usize) -> Token<'a> {
        self.eat_while(|c| c.is_ascii_digit());
        Token {
            kind: TokenKind::Digits(&self.input[start..self.position]),
            span: Span::new(start, self.position),
        }
    }

    /// 读取标识符
    /// 标识符可以包含字母、数字、连字符和下划线
    fn read_identifier(&mut self, start: usize) -> Token<'a> {
        self.eat_while(is_ident_char);
        Token {
            kind: TokenKind::Identifier(&self.input[start..self.position]),
            span: Span::new(start, self.position),
        }
    }

    /// 读取根标识，`$` 已被调用者消费
    fn read_root(&mut self, start: usize) -> Token<'a> {
        self.eat_while(is_ident_char);
        let kind = if self.position == start + 1 {
            TokenKind::Illegal('$')
        } else {
            TokenKind::Root(&self.input[start..self.position])
        };
        Token {
            kind,
            span: Span::new(start, self.position),
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.position;
        let c = self.bump()?;

        let simple = |kind| Token {
            kind,
            span: Span::new(start, start + 1),
        };

        let token = match c {
            '#' => simple(TokenKind::Hash),
            '.' => simple(TokenKind::Dot),
            '[' => simple(TokenKind::LBracket),
            ']' => simple(TokenKind::RBracket),
            '$' => self.read_root(start),
            c if c.is_ascii_digit() => self.read_digits(start),
            c if c.is_ascii_alphabetic() || c == '_' => self.read_identifier(start),
            c => Token {
                kind: TokenKind::Illegal(c),
                span: Span::new(start, self.position),
            },
        };
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind<'_>> {
        Lexer::new(input).map(|t| t.kind).collect()
    }

    #[test]
    fn test_scalar_path() {
        assert_eq!(
            kinds("$aasdesc#idShort"),
            vec![
                TokenKind::Root("$aasdesc"),
                TokenKind::Hash,
                TokenKind::Identifier("idShort"),
            ]
        );
    }

    #[test]
    fn test_indexed_path() {
        assert_eq!(
            kinds("$sm#semanticId.keys[12].value"),
            vec![
                TokenKind::Root("$sm"),
                TokenKind::Hash,
                TokenKind::Identifier("semanticId"),
                TokenKind::Dot,
                TokenKind::Identifier("keys"),
                TokenKind::LBracket,
                TokenKind::Digits("12"),
                TokenKind::RBracket,
                TokenKind::Dot,
                TokenKind::Identifier("value"),
            ]
        );
    }

    #[test]
    fn test_wildcard_and_spans() {
        let tokens: Vec<_> = Lexer::new("$bd#specificAssetIds[]").collect();
        assert_eq!(tokens[0].span, Span::new(0, 3));
        assert_eq!(tokens[2].span, Span::new(4, 20));
        assert_eq!(tokens[3].kind, TokenKind::LBracket);
        assert_eq!(tokens[4].kind, TokenKind::RBracket);
        assert_eq!(tokens[4].span, Span::new(21, 22));
    }

    #[test]
    fn test_identifier_with_dash() {
        assert_eq!(
            kinds("$sm#asset-kind_2"),
            vec![
                TokenKind::Root("$sm"),
                TokenKind::Hash,
                TokenKind::Identifier("asset-kind_2"),
            ]
        );
    }

    #[test]
    fn test_illegal_characters() {
        assert_eq!(kinds("$"), vec![TokenKind::Illegal('$')]);
        assert_eq!(
            kinds("$sm# id"),
            vec![
                TokenKind::Root("$sm"),
                TokenKind::Hash,
                TokenKind::Illegal(' '),
                TokenKind::Identifier("id"),
            ]
        );
        // 非 ASCII 字符按完整字符报告
        let tokens: Vec<_> = Lexer::new("ä").collect();
        assert_eq!(tokens[0].kind, TokenKind::Illegal('ä'));
        assert_eq!(tokens[0].span, Span::new(0, 2));
    }
}
