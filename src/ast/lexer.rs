//! Hand-written lexer for fragments.

use super::error::{ParseError, ParseResult};
use super::token::{Span, Spanned, Token};

pub struct Lexer<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            input,
            bytes: input.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    /// Tokenize the whole input.
    pub fn tokenize(mut self) -> ParseResult<Vec<Spanned>> {
        let mut tokens = Vec::new();
        while let Some(tok) = self.next_token()? {
            tokens.push(tok);
        }
        Ok(tokens)
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.col)
    }

    fn current(&self) -> Option<char> {
        if self.pos >= self.bytes.len() {
            return None;
        }
        let byte = self.bytes[self.pos];
        if byte < 128 {
            Some(byte as char)
        } else {
            self.input[self.pos..].chars().next()
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        let byte_pos = self.pos + offset;
        if byte_pos >= self.bytes.len() {
            return None;
        }
        let byte = self.bytes[byte_pos];
        if byte < 128 {
            Some(byte as char)
        } else {
            self.input[byte_pos..].chars().next()
        }
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.current();
        if let Some(ch) = c {
            if ch == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
            self.pos += ch.len_utf8();
        }
        c
    }

    fn skip_trivia(&mut self) -> ParseResult<()> {
        loop {
            match (self.current(), self.peek(1)) {
                (Some(c), _) if c.is_whitespace() => {
                    self.advance();
                }
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.advance() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.span();
                    self.advance();
                    self.advance();
                    loop {
                        match (self.current(), self.peek(1)) {
                            (Some('*'), Some('/')) => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            (Some(_), _) => {
                                self.advance();
                            }
                            (None, _) => {
                                return Err(ParseError::UnterminatedComment { span: start })
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> ParseResult<Option<Spanned>> {
        self.skip_trivia()?;
        let span = self.span();
        let Some(c) = self.current() else {
            return Ok(None);
        };

        let token = if c.is_ascii_alphabetic() || c == '_' {
            let start = self.pos;
            while matches!(self.current(), Some(ch) if ch.is_ascii_alphanumeric() || ch == '_') {
                self.advance();
            }
            let word = &self.input[start..self.pos];
            Token::keyword(word).unwrap_or_else(|| Token::Ident(word.to_string()))
        } else if c.is_ascii_digit() {
            let start = self.pos;
            while matches!(self.current(), Some(ch) if ch.is_ascii_digit()) {
                self.advance();
            }
            let text = &self.input[start..self.pos];
            let value = text.parse::<i64>().map_err(|_| ParseError::InvalidNumber {
                text: text.to_string(),
                span,
            })?;
            Token::Int(value)
        } else {
            self.punct(c, span)?
        };

        Ok(Some(Spanned { token, span }))
    }

    fn punct(&mut self, c: char, span: Span) -> ParseResult<Token> {
        let next = self.peek(1);
        let (token, width) = match (c, next) {
            (':', Some(':')) => (Token::PathSep, 2),
            ('<', Some('=')) => (Token::LtEq, 2),
            ('>', Some('=')) => (Token::GtEq, 2),
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('&', Some('&')) => (Token::AndAnd, 2),
            ('|', Some('|')) => (Token::OrOr, 2),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('{', _) => (Token::LBrace, 1),
            ('}', _) => (Token::RBrace, 1),
            (';', _) => (Token::Semi, 1),
            (',', _) => (Token::Comma, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('=', _) => (Token::Assign, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('!', _) => (Token::Bang, 1),
            (other, _) => return Err(ParseError::UnexpectedChar { found: other, span }),
        };
        for _ in 0..width {
            self.advance();
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_declaration_tokens() {
        assert_eq!(
            kinds("int x = 1;"),
            vec![
                Token::KwInt,
                Token::Ident("x".into()),
                Token::Assign,
                Token::Int(1),
                Token::Semi
            ]
        );
    }

    #[test]
    fn test_two_char_operators_and_paths() {
        assert_eq!(
            kinds("a::b <= c && !d != e"),
            vec![
                Token::Ident("a".into()),
                Token::PathSep,
                Token::Ident("b".into()),
                Token::LtEq,
                Token::Ident("c".into()),
                Token::AndAnd,
                Token::Bang,
                Token::Ident("d".into()),
                Token::NotEq,
                Token::Ident("e".into()),
            ]
        );
    }

    #[test]
    fn test_comments_and_spans() {
        let toks = Lexer::new("// lead\n  x /* inner */ + 2").tokenize().unwrap();
        assert_eq!(toks.len(), 3);
        assert_eq!(toks[0].span, Span::new(2, 3));
        assert_eq!(toks[2].token, Token::Int(2));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            Lexer::new("x $ y").tokenize(),
            Err(ParseError::UnexpectedChar { found: '$', .. })
        ));
        assert!(Lexer::new("/* open").tokenize().unwrap_err().is_incomplete());
        assert!(matches!(
            Lexer::new("99999999999999999999").tokenize(),
            Err(ParseError::InvalidNumber { .. })
        ));
    }
}
