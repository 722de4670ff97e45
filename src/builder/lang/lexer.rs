/// A deliberately minimal tokenizer for the small concrete syntax
/// `builder::lang` uses to drive `IrBuilder`. The real ISA description
/// grammar is out of scope (see spec); this is a stand-in collaborator,
/// not a general-purpose lexer, so it gets one token kind per concept and
/// nothing more.
use crate::common::source::Span;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Int(i64),
    Str(String),
    Punct(char),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    file_id: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, file_id: u32) -> Self {
        Self { src: src.as_bytes(), pos: 0, file_id }
    }

    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let start = self.pos as u32;
            let Some(&b) = self.src.get(self.pos) else {
                tokens.push(Token { kind: TokenKind::Eof, span: Span::new(start, start, self.file_id) });
                break;
            };
            let kind = if b.is_ascii_digit() {
                self.lex_int()
            } else if b == b'"' {
                self.lex_string()
            } else if is_ident_start(b) {
                self.lex_ident()
            } else if b == b'$' && self.src.get(self.pos + 1) == Some(&b'{') {
                self.lex_template_ref()
            } else {
                self.pos += 1;
                TokenKind::Punct(b as char)
            };
            let end = self.pos as u32;
            tokens.push(Token { kind, span: Span::new(start, end, self.file_id) });
        }
        tokens
    }

    fn skip_trivia(&mut self) {
        loop {
            while matches!(self.src.get(self.pos), Some(b) if b.is_ascii_whitespace()) {
                self.pos += 1;
            }
            if self.src.get(self.pos) == Some(&b'#') {
                while !matches!(self.src.get(self.pos), None | Some(b'\n')) {
                    self.pos += 1;
                }
                continue;
            }
            break;
        }
    }

    fn lex_int(&mut self) -> TokenKind {
        let start = self.pos;
        while matches!(self.src.get(self.pos), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        TokenKind::Int(text.parse().unwrap_or(0))
    }

    fn lex_string(&mut self) -> TokenKind {
        self.pos += 1; // opening quote
        let start = self.pos;
        while matches!(self.src.get(self.pos), Some(b) if *b != b'"') {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap().to_string();
        if self.src.get(self.pos) == Some(&b'"') {
            self.pos += 1; // closing quote
        }
        TokenKind::Str(text)
    }

    fn lex_ident(&mut self) -> TokenKind {
        let start = self.pos;
        while matches!(self.src.get(self.pos), Some(&b) if is_ident_continue(b)) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap().to_string();
        TokenKind::Ident(text)
    }

    /// `${name}` used in GENERATE() templates, captured as a single ident
    /// token so the parser doesn't need to special-case `$`, `{`, `}`.
    fn lex_template_ref(&mut self) -> TokenKind {
        self.pos += 2; // "${"
        let start = self.pos;
        while matches!(self.src.get(self.pos), Some(b) if *b != b'}') {
            self.pos += 1;
        }
        let name = std::str::from_utf8(&self.src[start..self.pos]).unwrap().to_string();
        if self.src.get(self.pos) == Some(&b'}') {
            self.pos += 1;
        }
        TokenKind::Ident(format!("${{{name}}}"))
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_a_small_snippet() {
        let tokens = Lexer::new("slot Foo { const k = 1; }", 0).tokenize();
        let kinds: Vec<TokenKind> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident("slot".to_string()),
                TokenKind::Ident("Foo".to_string()),
                TokenKind::Punct('{'),
                TokenKind::Ident("const".to_string()),
                TokenKind::Ident("k".to_string()),
                TokenKind::Punct('='),
                TokenKind::Int(1),
                TokenKind::Punct(';'),
                TokenKind::Punct('}'),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn skips_comments() {
        let tokens = Lexer::new("# comment\nfoo", 0).tokenize();
        assert_eq!(tokens[0].kind, TokenKind::Ident("foo".to_string()));
    }
}
