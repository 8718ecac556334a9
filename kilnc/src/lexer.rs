//! The token model and lexer.
//!
//! Single-pass over source bytes with free, unlimited checkpoint/rollback,
//! so the parser can speculatively retry type-looking lookahead. Operators
//! are recognised by a longest-match-by-prefix discipline: a token keeps
//! extending only while what's accumulated so far is still a prefix of some
//! entry in the operator table, which disambiguates `->` from `-`, `::` from
//! `:`, and `...` from `.` without a hand-rolled state machine per operator.

use std::rc::Rc;

use crate::diag::Range;
use crate::symbol::{intern, Symbol};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    End,
    Integer,
    Real,
    String,
    Name,
    MacroName,
    // Keywords
    Fn,
    Return,
    If,
    Else,
    True,
    False,
    While,
    Break,
    Continue,
    Struct,
    Null,
    Import,
    /// A primitive type keyword (`i8 i16 i32 i64 u0 u8 u16 u32 u64 f32 f64
    /// bool str void`); the exact primitive is read back out of the lexeme.
    Type,
    // Punctuation / operators
    Plus,
    Minus,
    Asterisk,
    Ampersand,
    Slash,
    ParenOpen,
    ParenClose,
    CurlyOpen,
    CurlyClose,
    BracketOpen,
    BracketClose,
    Period,
    TriplePeriod,
    Comma,
    Semicolon,
    Colon,
    DoubleColon,
    Equal,
    Arrow,
    DoubleEqual,
    NotEqual,
    SmallerEqual,
    GreaterEqual,
    Smaller,
    Greater,
    Not,
}

impl TokenKind {
    #[must_use]
    pub fn is_primitive_type_name(lexeme: &str) -> bool {
        matches!(
            lexeme,
            "i8" | "i16" | "i32" | "i64" | "u0" | "u8" | "u16" | "u32" | "u64" | "f32" | "f64" | "bool" | "str" | "void"
        )
    }
}

const OPERATORS: &[(&str, TokenKind)] = &[
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Asterisk),
    ("&", TokenKind::Ampersand),
    ("/", TokenKind::Slash),
    ("(", TokenKind::ParenOpen),
    (")", TokenKind::ParenClose),
    ("{", TokenKind::CurlyOpen),
    ("}", TokenKind::CurlyClose),
    ("[", TokenKind::BracketOpen),
    ("]", TokenKind::BracketClose),
    (".", TokenKind::Period),
    ("...", TokenKind::TriplePeriod),
    (",", TokenKind::Comma),
    (";", TokenKind::Semicolon),
    (":", TokenKind::Colon),
    ("::", TokenKind::DoubleColon),
    ("=", TokenKind::Equal),
    ("->", TokenKind::Arrow),
    ("==", TokenKind::DoubleEqual),
    ("!=", TokenKind::NotEqual),
    ("<=", TokenKind::SmallerEqual),
    (">=", TokenKind::GreaterEqual),
    ("<", TokenKind::Smaller),
    (">", TokenKind::Greater),
    ("!", TokenKind::Not),
];

const KEYWORDS: &[(&str, TokenKind)] = &[
    ("fn", TokenKind::Fn),
    ("return", TokenKind::Return),
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("true", TokenKind::True),
    ("false", TokenKind::False),
    ("while", TokenKind::While),
    ("break", TokenKind::Break),
    ("continue", TokenKind::Continue),
    ("struct", TokenKind::Struct),
    ("null", TokenKind::Null),
    ("import", TokenKind::Import),
    ("i8", TokenKind::Type),
    ("i16", TokenKind::Type),
    ("i32", TokenKind::Type),
    ("i64", TokenKind::Type),
    ("u0", TokenKind::Type),
    ("u8", TokenKind::Type),
    ("u16", TokenKind::Type),
    ("u32", TokenKind::Type),
    ("u64", TokenKind::Type),
    ("f32", TokenKind::Type),
    ("f64", TokenKind::Type),
    ("bool", TokenKind::Type),
    ("str", TokenKind::Type),
    ("void", TokenKind::Type),
];

fn operator_startswith_char(c: char) -> bool {
    OPERATORS.iter().any(|(op, _)| op.starts_with(c))
}

fn operator_prefix(s: &str) -> bool {
    OPERATORS.iter().any(|(op, _)| op.starts_with(s))
}

fn operator_exact(s: &str) -> Option<TokenKind> {
    OPERATORS.iter().find(|(op, _)| *op == s).map(|(_, k)| *k)
}

fn keyword_exact(s: &str) -> Option<TokenKind> {
    KEYWORDS.iter().find(|(kw, _)| *kw == s).map(|(_, k)| *k)
}

#[derive(Clone, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: Rc<str>,
    pub range: Range,
}

impl Token {
    #[must_use]
    pub fn name_symbol(&self) -> Symbol {
        intern(&self.lexeme)
    }
}

/// Free, unlimited checkpoint/rollback state. Cloning a
/// `Checkpoint` is cheap: it is just the byte offset and line/column.
#[derive(Clone, Copy, Debug)]
pub struct Checkpoint {
    offset: usize,
    line: u32,
    col: u32,
}

pub struct Lexer {
    file: Rc<str>,
    bytes: Vec<u8>,
    offset: usize,
    line: u32,
    col: u32,
}

impl Lexer {
    #[must_use]
    pub fn new(source: &str, file: Rc<str>) -> Self {
        Lexer { file, bytes: source.as_bytes().to_vec(), offset: 0, line: 1, col: 1 }
    }

    #[must_use]
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint { offset: self.offset, line: self.line, col: self.col }
    }

    pub fn rollback(&mut self, cp: Checkpoint) {
        self.offset = cp.offset;
        self.line = cp.line;
        self.col = cp.col;
    }

    fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.offset).copied()
    }

    fn read_byte(&mut self) -> Option<u8> {
        let b = self.peek_byte()?;
        self.offset += 1;
        if b == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(b)
    }

    fn unread_byte(&mut self) {
        // Only ever called right after `read_byte` returned the byte being
        // unread, so line/col can simply be recomputed by re-scanning back
        // one byte; newline never needs ungetting mid-token (strings and
        // comments consume their own newlines directly).
        debug_assert!(self.offset > 0);
        self.offset -= 1;
        if self.col > 1 {
            self.col -= 1;
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek_byte() {
            if (b as char).is_whitespace() {
                self.read_byte();
            } else {
                break;
            }
        }
    }

    /// Consumes the next token, tracing it at `trace!` when tracing is
    /// enabled — cheap because the format string is never built unless the
    /// level is active.
    pub fn consume(&mut self) -> Token {
        let tok = self.consume_inner();
        log::trace!("token {:?} {:?} at {}", tok.kind, tok.lexeme, tok.range);
        tok
    }

    /// Speculative lookahead: checkpoint, consume `dist + 1` tokens, report
    /// the last one, then roll back so the lookahead is never
    /// position-observable.
    pub fn peek(&mut self, dist: usize) -> Token {
        let cp = self.checkpoint();
        let mut tok = self.consume();
        for _ in 0..dist {
            tok = self.consume();
        }
        self.rollback(cp);
        tok
    }

    fn consume_inner(&mut self) -> Token {
        let mut tok = String::new();
        let mut is_num = false;
        let mut is_real = false;
        let mut is_op = false;
        let mut is_string = false;

        loop {
            self.skip_whitespace();
            let start_line = self.line;
            let start_col = self.col;

            if self.peek_byte().is_none() {
                return Token {
                    kind: TokenKind::End,
                    lexeme: Rc::from(""),
                    range: Range::new(self.file.clone(), start_line, start_col, 0),
                };
            }

            let actual_line = start_line;
            let actual_col = start_col;

            'scan: loop {
                let Some(b) = self.peek_byte() else { break 'scan };
                let c = b as char;

                if c == '"' {
                    if !tok.is_empty() {
                        break 'scan;
                    }
                    self.read_byte();
                    loop {
                        match self.read_byte() {
                            Some(b'"') | None => break,
                            Some(b) => tok.push(b as char),
                        }
                    }
                    tok = post_process_string(&tok);
                    is_string = true;
                    break 'scan;
                }

                if c == '#' {
                    while let Some(b) = self.read_byte() {
                        if b == b'\n' {
                            break;
                        }
                    }
                    self.skip_whitespace();
                    if tok.is_empty() {
                        continue 'scan;
                    }
                    break 'scan;
                }

                // Stop an in-progress non-operator token right before a
                // character that starts an operator (unless the operator
                // table already accepts `tok + c`, or `c` is `.` — periods
                // inside a digit run are handled below).
                if !tok.is_empty()
                && operator_startswith_char(c)
                && !operator_prefix(&format!("{tok}{c}"))
                && c != '.'
                {
                    break 'scan;
                }

                if operator_startswith_char(c) && (c != '.' || tok.is_empty() || tok == "." || tok == "..") {
                    if tok.is_empty() {
                        is_op = true;
                        tok.push(c);
                    } else if is_op {
                        tok.push(c);
                    } else {
                        break 'scan;
                    }
                    self.read_byte();
                    continue 'scan;
                }

                if is_op || c.is_whitespace() {
                    break 'scan;
                }

                if c.is_ascii_digit() {
                    if is_num || tok.is_empty() {
                        is_num = true;
                    }
                    tok.push(c);
                    self.read_byte();
                } else if c == '.' {
                    self.read_byte();
                    let next = self.peek_byte().map(|b| b as char);
                    if tok.is_empty() {
                        if let Some(d) = next.filter(|d| d.is_ascii_digit()) {
                            tok.push('0');
                            tok.push('.');
                            tok.push(d);
                            is_num = true;
                            is_real = true;
                            self.read_byte();
                        } else {
                            tok.push('.');
                            break 'scan;
                        }
                    } else if is_num && !is_real && next.is_some_and(|d| d.is_ascii_digit()) {
                        tok.push('.');
                        tok.push(next.unwrap());
                        is_real = true;
                        self.read_byte();
                    } else {
                        self.unread_byte();
                        break 'scan;
                    }
                } else if !is_num {
                    tok.push(c);
                    self.read_byte();
                } else {
                    // No scientific notation.
                    break 'scan;
                }
            }

            let kind = if is_op {
                match operator_exact(&tok) {
                    Some(k) => k,
                    None => {
                        // Operator-prefix accumulation stalled on something
                        // not itself a full operator; this cannot happen
                        // given `operator_prefix` gates every push above.
                        TokenKind::Not
                    }
                }
            } else if let Some(k) = keyword_exact(&tok) {
                k
            } else if is_real {
                TokenKind::Real
            } else if is_num {
                TokenKind::Integer
            } else if is_string {
                TokenKind::String
            } else {
                TokenKind::Name
            };

            let (kind, tok) = if kind == TokenKind::Name && self.peek_byte() == Some(b'!') {
                self.read_byte();
                let mut t = tok;
                t.push('!');
                (TokenKind::MacroName, t)
            } else {
                (kind, tok)
            };

            let length = self.col.saturating_sub(actual_col).max(tok.len() as u32);
            let range = Range::new(self.file.clone(), actual_line, actual_col, length);
            return Token { kind, lexeme: Rc::from(tok.as_str()), range };
        }
    }
}

/// Applies the fixed escape table `? \ a b f n r t v`; any other
/// character following a backslash is passed through unchanged rather than
/// rejected.
fn post_process_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('?') => out.push('?'),
            Some('\\') => out.push('\\'),
            Some('a') => out.push('\u{07}'),
            Some('b') => out.push('\u{08}'),
            Some('f') => out.push('\u{0C}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('v') => out.push('\u{0B}'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(src: &str) -> Vec<(TokenKind, String)> {
        let mut lexer = Lexer::new(src, Rc::from("test.kl"));
        let mut out = Vec::new();
        loop {
            let tok = lexer.consume();
            if tok.kind == TokenKind::End {
                break;
            }
            out.push((tok.kind, tok.lexeme.to_string()));
        }
        out
    }

    #[test]
    fn operator_disambiguation_s2() {
        // the spec's literal S2 scenario, verbatim
        let src = "hello under_score test4 4test ( ) +-===- > fn i32 42 12.34 . ... \"a string\"# comment\nback";
        let toks = lex_all(src);
        let expected = vec![
            (TokenKind::Name, "hello"),
            (TokenKind::Name, "under_score"),
            (TokenKind::Name, "test4"),
            (TokenKind::Integer, "4"),
            (TokenKind::Name, "test"),
            (TokenKind::ParenOpen, "("),
            (TokenKind::ParenClose, ")"),
            (TokenKind::Plus, "+"),
            (TokenKind::Minus, "-"),
            (TokenKind::DoubleEqual, "=="),
            (TokenKind::Equal, "="),
            (TokenKind::Minus, "-"),
            (TokenKind::Greater, ">"),
            (TokenKind::Fn, "fn"),
            (TokenKind::Type, "i32"),
            (TokenKind::Integer, "42"),
            (TokenKind::Real, "12.34"),
            (TokenKind::Period, "."),
            (TokenKind::TriplePeriod, "..."),
            (TokenKind::String, "a string"),
            (TokenKind::Name, "back"),
        ];
        let actual: Vec<_> = toks.iter().map(|(k, s)| (*k, s.as_str())).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn macro_name_appends_bang() {
        let toks = lex_all("as!(x, i32)");
        assert_eq!(toks[0], (TokenKind::MacroName, "as!".to_string()));
    }

    #[test]
    fn unknown_escape_passes_through() {
        let toks = lex_all(r#""\q""#);
        assert_eq!(toks[0], (TokenKind::String, "q".to_string()));
    }

    #[test]
    fn checkpoint_rollback_is_not_position_observable() {
        let mut lexer = Lexer::new("a b c", Rc::from("test.kl"));
        let cp = lexer.checkpoint();
        let first = lexer.peek(2);
        assert_eq!(first.lexeme.as_ref(), "c");
        lexer.rollback(cp);
        let again = lexer.consume();
        assert_eq!(again.lexeme.as_ref(), "a");
    }
}
