//! Byte-stream tokenizer for the C subset.
//!
//! Scans one file at a time into the shared [`TokenStream`]. The scanner is
//! byte-oriented: bytes above 0x7F inside string and character literals are
//! carried through as single `char`s in the 0x80-0xFF range, so arbitrary
//! input bytes survive to the assembly stage unchanged.

use crate::common::diag::{CompileError, Result};
use super::token::{Token, TokenKind, TokenStream};

/// Longest token the lexer will accept, matching the fixed buffer of the
/// original hand-bootstrappable implementation.
pub const MAX_TOKEN_LEN: usize = 4096;

/// Three-character punctuators, longest-match first.
const PUNCT3: &[&str] = &["<<=", ">>=", "..."];

/// Two-character punctuators.
const PUNCT2: &[&str] = &[
    "<=", ">=", "==", "!=", "&&", "||", "++", "--", "<<", ">>", "+=", "-=",
    "*=", "/=", "%=", "&=", "|=", "^=", "->",
];

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    file: u16,
    name: &'a str,
}

/// Tokenize `content` (from file `name`) onto the end of `stream`.
pub fn lex_file(stream: &mut TokenStream, name: &str, content: &str) -> Result<()> {
    let file = stream.add_file(name);
    let mut lx = Lexer { src: content.as_bytes(), pos: 0, line: 1, file, name };
    lx.run(&mut stream.tokens)
}

impl<'a> Lexer<'a> {
    fn err(&self, msg: impl Into<String>) -> CompileError {
        CompileError::at(self.name, self.line, msg)
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }

    fn push(&self, out: &mut Vec<Token>, kind: TokenKind, lexeme: String, line: u32) {
        out.push(Token::new(kind, lexeme, self.file, line));
    }

    fn run(&mut self, out: &mut Vec<Token>) -> Result<()> {
        while let Some(b) = self.peek() {
            match b {
                b'\n' => {
                    let line = self.line;
                    self.bump();
                    self.push(out, TokenKind::Newline, "\n".to_string(), line);
                }
                b' ' | b'\t' | b'\r' => {
                    self.bump();
                }
                b'/' if self.peek2() == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                b'/' if self.peek2() == Some(b'*') => {
                    self.block_comment(out)?;
                }
                b'\'' => self.char_literal(out)?,
                b'"' => self.string_literal(out)?,
                b'#' => self.directive(out),
                _ if is_ident_start(b) => self.identifier(out)?,
                _ if b.is_ascii_digit() => self.number(out)?,
                _ => self.punct(out)?,
            }
        }
        Ok(())
    }

    /// Skip a `/* ... */` comment, emitting the newlines it spans so line
    /// numbers downstream stay correct.
    fn block_comment(&mut self, out: &mut Vec<Token>) -> Result<()> {
        let start_line = self.line;
        self.bump();
        self.bump();
        loop {
            match self.peek() {
                None => {
                    self.line = start_line;
                    return Err(self.err("unterminated block comment"));
                }
                Some(b'*') if self.peek2() == Some(b'/') => {
                    self.bump();
                    self.bump();
                    return Ok(());
                }
                Some(b'\n') => {
                    let line = self.line;
                    self.bump();
                    self.push(out, TokenKind::Newline, "\n".to_string(), line);
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
    }

    fn identifier(&mut self, out: &mut Vec<Token>) -> Result<()> {
        let line = self.line;
        let mut s = String::new();
        while let Some(b) = self.peek() {
            if !is_ident_cont(b) {
                break;
            }
            s.push(b as char);
            self.bump();
            if s.len() > MAX_TOKEN_LEN {
                return Err(self.err("token exceeds maximum length"));
            }
        }
        self.push(out, TokenKind::Identifier, s, line);
        Ok(())
    }

    fn number(&mut self, out: &mut Vec<Token>) -> Result<()> {
        let line = self.line;
        let mut s = String::new();
        let hex = self.peek() == Some(b'0')
            && matches!(self.peek2(), Some(b'x') | Some(b'X'));
        if hex {
            s.push(self.bump().unwrap() as char);
            s.push(self.bump().unwrap() as char);
            while let Some(b) = self.peek() {
                if !b.is_ascii_hexdigit() {
                    break;
                }
                s.push(b as char);
                self.bump();
            }
            if s.len() == 2 {
                return Err(self.err("hexadecimal literal with no digits"));
            }
        } else {
            while let Some(b) = self.peek() {
                if !b.is_ascii_digit() {
                    break;
                }
                s.push(b as char);
                self.bump();
            }
        }
        if s.len() > MAX_TOKEN_LEN {
            return Err(self.err("token exceeds maximum length"));
        }
        let value = if hex {
            i64::from_str_radix(&s[2..], 16)
        } else {
            s.parse::<i64>()
        }
        .map_err(|_| self.err(format!("integer constant '{}' out of range", s)))?;
        out.push(Token::with_value(TokenKind::Integer, s, value, self.file, line));
        Ok(())
    }

    /// Decode one escape sequence after the backslash has been consumed.
    fn escape(&mut self) -> Result<u8> {
        let b = self.bump().ok_or_else(|| self.err("unterminated escape sequence"))?;
        Ok(match b {
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'\\' => b'\\',
            b'\'' => b'\'',
            b'"' => b'"',
            b'0' => 0,
            b'a' => 7,
            b'b' => 8,
            b'f' => 12,
            b'v' => 11,
            b'e' => 27,
            b'x' => {
                let hi = self.bump().ok_or_else(|| self.err("unterminated \\x escape"))?;
                let lo = self.bump().ok_or_else(|| self.err("unterminated \\x escape"))?;
                let hex = [hi, lo];
                let s = std::str::from_utf8(&hex)
                    .ok()
                    .filter(|s| s.bytes().all(|b| b.is_ascii_hexdigit()))
                    .ok_or_else(|| self.err("malformed \\x escape"))?;
                u8::from_str_radix(s, 16).unwrap_or(0)
            }
            other => {
                return Err(self.err(format!("unknown escape sequence '\\{}'", other as char)))
            }
        })
    }

    fn char_literal(&mut self, out: &mut Vec<Token>) -> Result<()> {
        let line = self.line;
        self.bump();
        let b = self.bump().ok_or_else(|| self.err("unterminated character literal"))?;
        if b == b'\n' {
            return Err(self.err("unterminated character literal"));
        }
        let value = if b == b'\\' { self.escape()? } else { b };
        match self.bump() {
            Some(b'\'') => {}
            _ => return Err(self.err("unterminated character literal")),
        }
        out.push(Token::with_value(
            TokenKind::CharLit,
            (value as char).to_string(),
            value as i64,
            self.file,
            line,
        ));
        Ok(())
    }

    fn string_literal(&mut self, out: &mut Vec<Token>) -> Result<()> {
        let line = self.line;
        self.bump();
        let mut s = String::new();
        loop {
            match self.peek() {
                None | Some(b'\n') => {
                    return Err(self.err("unterminated string literal"));
                }
                Some(b'"') => {
                    self.bump();
                    break;
                }
                Some(b'\\') => {
                    self.bump();
                    s.push(self.escape()? as char);
                }
                Some(b) => {
                    self.bump();
                    s.push(b as char);
                }
            }
            if s.len() > MAX_TOKEN_LEN {
                return Err(self.err("token exceeds maximum length"));
            }
        }
        self.push(out, TokenKind::StringLit, s, line);
        Ok(())
    }

    /// A `#` that starts a token absorbs a following directive word, so the
    /// preprocessor sees `#define` and friends as single tokens.
    fn directive(&mut self, out: &mut Vec<Token>) {
        let line = self.line;
        let mut s = String::from("#");
        self.bump();
        while let Some(b) = self.peek() {
            if !b.is_ascii_alphabetic() {
                break;
            }
            s.push(b as char);
            self.bump();
        }
        self.push(out, TokenKind::Directive, s, line);
    }

    fn punct(&mut self, out: &mut Vec<Token>) -> Result<()> {
        let line = self.line;
        let rest = &self.src[self.pos..];
        for p in PUNCT3 {
            if rest.starts_with(p.as_bytes()) {
                self.pos += 3;
                self.push(out, TokenKind::Punct, p.to_string(), line);
                return Ok(());
            }
        }
        for p in PUNCT2 {
            if rest.starts_with(p.as_bytes()) {
                self.pos += 2;
                self.push(out, TokenKind::Punct, p.to_string(), line);
                return Ok(());
            }
        }
        let b = self.bump().unwrap();
        if b"+-*/%&|^~!<>=(){}[];,.:?".contains(&b) {
            self.push(out, TokenKind::Punct, (b as char).to_string(), line);
            Ok(())
        } else {
            Err(self.err(format!("stray '{}' in program", b as char)))
        }
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_cont(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> TokenStream {
        let mut ts = TokenStream::new();
        lex_file(&mut ts, "test.c", src).unwrap();
        ts
    }

    fn lexemes(src: &str) -> Vec<String> {
        lex(src)
            .tokens
            .iter()
            .filter(|t| t.kind != TokenKind::Newline)
            .map(|t| t.lexeme.clone())
            .collect()
    }

    #[test]
    fn test_identifiers_and_numbers() {
        assert_eq!(lexemes("int main_2 = 42;"), ["int", "main_2", "=", "42", ";"]);
        let ts = lex("0x20");
        assert_eq!(ts.tokens[0].value, 32);
    }

    #[test]
    fn test_multichar_punctuators_maximal_munch() {
        assert_eq!(lexemes("a <<= b >> c >= d"), ["a", "<<=", "b", ">>", "c", ">=", "d"]);
        assert_eq!(lexemes("p->q ... x++"), ["p", "->", "q", "...", "x", "++"]);
    }

    #[test]
    fn test_char_escapes() {
        let ts = lex(r"'\n' '\t' '\\' '\x41' '\0'");
        let values: Vec<i64> = ts
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::CharLit)
            .map(|t| t.value)
            .collect();
        assert_eq!(values, [10, 9, 92, 65, 0]);
    }

    #[test]
    fn test_string_escape_processing() {
        let ts = lex(r#""hi\n""#);
        assert_eq!(ts.tokens[0].kind, TokenKind::StringLit);
        assert_eq!(ts.tokens[0].lexeme, "hi\n");
    }

    #[test]
    fn test_comments_preserve_newlines() {
        let ts = lex("a // trailing\nb /* two\nlines */ c");
        let kinds: Vec<_> = ts.tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            [
                TokenKind::Identifier,
                TokenKind::Newline,
                TokenKind::Identifier,
                TokenKind::Newline,
                TokenKind::Identifier,
            ]
        );
        // The token after the block comment is on line 3.
        assert_eq!(ts.tokens.last().unwrap().line, 3);
    }

    #[test]
    fn test_directive_tokens() {
        let ts = lex("#define FOO 1\n#endif");
        assert_eq!(ts.tokens[0].kind, TokenKind::Directive);
        assert_eq!(ts.tokens[0].lexeme, "#define");
        let last = &ts.tokens[ts.tokens.len() - 1];
        assert_eq!(last.lexeme, "#endif");
    }

    #[test]
    fn test_unterminated_string_is_fatal() {
        let mut ts = TokenStream::new();
        let err = lex_file(&mut ts, "bad.c", "\"oops\n").unwrap_err();
        assert_eq!(err.to_string(), "bad.c:1: unterminated string literal");
    }

    #[test]
    fn test_unterminated_comment_reports_start_line() {
        let mut ts = TokenStream::new();
        let err = lex_file(&mut ts, "bad.c", "x\n/* no end").unwrap_err();
        assert!(err.to_string().starts_with("bad.c:2:"));
    }

    #[test]
    fn test_line_numbers_immutable_after_lex() {
        let ts = lex("a\nb\nc");
        let lines: Vec<u32> = ts
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Identifier)
            .map(|t| t.line)
            .collect();
        assert_eq!(lines, [1, 2, 3]);
    }
}
