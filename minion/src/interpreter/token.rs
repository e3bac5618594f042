//! Indentation-aware lexer for the supported Python subset.
//!
//! Produces a flat token stream with explicit `Indent` / `Dedent` / `Newline`
//! tokens. Newlines and indentation are suppressed inside brackets. F-strings
//! are lexed as single tokens carrying their raw inner text; the parser splits
//! the interpolations.

use super::InterpreterError;

#[derive(Clone, Debug, PartialEq)]
pub enum Tok {
    Newline,
    Indent,
    Dedent,
    EndOfFile,
    Name(String),
    Kw(&'static str),
    Int(i64),
    Float(f64),
    Str(String),
    /// Raw inner text of an f-string literal.
    FStr(String),
    /// Operator or delimiter, longest-match.
    Sym(&'static str),
}

#[derive(Clone, Debug)]
pub struct Token {
    pub tok: Tok,
    pub line: u32,
}

const KEYWORDS: &[&str] = &[
    "def", "class", "if", "elif", "else", "while", "for", "in", "not", "and", "or", "return",
    "break", "continue", "pass", "import", "from", "as", "try", "except", "finally", "raise",
    "with", "lambda", "True", "False", "None", "is", "assert",
];

const SYMBOLS: &[&str] = &[
    "**=", "//=", "<<=", ">>=", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "&=", "|=",
    "^=", "**", "//", "<<", ">>", "->", "+", "-", "*", "/", "%", "=", "<", ">", "(", ")", "[",
    "]", "{", "}", ",", ":", ".", ";", "&", "|", "^", "~", "@",
];

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    paren_depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
    /// True until the first real token of the current logical line.
    at_line_start: bool,
}

/// Tokenizes `source`; fails with [`InterpreterError::Syntax`] on malformed
/// input (bad indentation, unterminated strings, unknown characters).
pub fn tokenize(source: &str) -> Result<Vec<Token>, InterpreterError> {
    let mut lexer = Lexer {
        src: source.as_bytes(),
        pos: 0,
        line: 1,
        paren_depth: 0,
        indents: vec![0],
        tokens: Vec::new(),
        at_line_start: true,
    };
    lexer.run(source)?;
    Ok(lexer.tokens)
}

impl<'a> Lexer<'a> {
    fn err(&self, msg: impl Into<String>) -> InterpreterError {
        InterpreterError::Syntax(format!("{} (line {})", msg.into(), self.line))
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn run(&mut self, source: &str) -> Result<(), InterpreterError> {
        while self.pos < self.src.len() {
            if self.at_line_start && self.paren_depth == 0 {
                self.handle_indentation()?;
                self.at_line_start = false;
                if self.pos >= self.src.len() {
                    break;
                }
            }
            let c = match self.peek() {
                Some(c) => c,
                None => break,
            };
            match c {
                b'#' => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                b'\n' => {
                    self.bump();
                    if self.paren_depth == 0 {
                        let emitted_any = self
                            .tokens
                            .last()
                            .map(|t| !matches!(t.tok, Tok::Newline))
                            .unwrap_or(false);
                        if emitted_any {
                            // token line is the line just ended
                            self.tokens.push(Token {
                                tok: Tok::Newline,
                                line: self.line.saturating_sub(1),
                            });
                        }
                        self.at_line_start = true;
                    }
                }
                b' ' | b'\t' | b'\r' => {
                    self.bump();
                }
                b'\\' if self.peek_at(1) == Some(b'\n') => {
                    // explicit line continuation
                    self.bump();
                    self.bump();
                }
                b'0'..=b'9' => self.lex_number()?,
                b'"' | b'\'' => {
                    let s = self.lex_string(false)?;
                    self.push(Tok::Str(s));
                }
                b'.' if self.peek_at(1).map(|d| d.is_ascii_digit()).unwrap_or(false) => {
                    self.lex_number()?
                }
                c if c.is_ascii_alphabetic() || c == b'_' => self.lex_name_or_prefixed_string(source)?,
                _ => self.lex_symbol()?,
            }
        }
        // close the final logical line and any open indents
        let needs_newline = self
            .tokens
            .last()
            .map(|t| !matches!(t.tok, Tok::Newline))
            .unwrap_or(false);
        if needs_newline {
            self.push(Tok::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::EndOfFile);
        Ok(())
    }

    fn handle_indentation(&mut self) -> Result<(), InterpreterError> {
        loop {
            let start = self.pos;
            let mut width = 0usize;
            while let Some(c) = self.peek() {
                match c {
                    b' ' => {
                        width += 1;
                        self.bump();
                    }
                    b'\t' => {
                        width += 8 - width % 8;
                        self.bump();
                    }
                    _ => break,
                }
            }
            match self.peek() {
                // blank or comment-only line: consume and retry
                Some(b'\n') => {
                    self.bump();
                    continue;
                }
                Some(b'#') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                    continue;
                }
                None => return Ok(()),
                Some(_) => {
                    let current = *self.indents.last().unwrap_or(&0);
                    if width > current {
                        self.indents.push(width);
                        self.push(Tok::Indent);
                    } else if width < current {
                        while *self.indents.last().unwrap_or(&0) > width {
                            self.indents.pop();
                            self.push(Tok::Dedent);
                        }
                        if *self.indents.last().unwrap_or(&0) != width {
                            return Err(self.err("inconsistent dedent"));
                        }
                    }
                    let _ = start;
                    return Ok(());
                }
            }
        }
    }

    fn lex_number(&mut self) -> Result<(), InterpreterError> {
        let start = self.pos;
        // hex / binary / octal
        if self.peek() == Some(b'0')
            && matches!(self.peek_at(1), Some(b'x') | Some(b'X') | Some(b'b') | Some(b'B') | Some(b'o') | Some(b'O'))
        {
            let base_char = self.peek_at(1).unwrap();
            self.bump();
            self.bump();
            let digits_start = self.pos;
            while let Some(c) = self.peek() {
                if c.is_ascii_alphanumeric() || c == b'_' {
                    self.bump();
                } else {
                    break;
                }
            }
            let digits: String = std::str::from_utf8(&self.src[digits_start..self.pos])
                .unwrap_or("")
                .replace('_', "");
            let radix = match base_char {
                b'x' | b'X' => 16,
                b'b' | b'B' => 2,
                _ => 8,
            };
            let value = i64::from_str_radix(&digits, radix)
                .map_err(|_| self.err("invalid integer literal"))?;
            self.push(Tok::Int(value));
            return Ok(());
        }

        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                b'0'..=b'9' | b'_' => {
                    self.bump();
                }
                b'.' if !is_float
                    && self.peek_at(1) != Some(b'.')
                    // attribute access on int literals is not a float dot
                    && self.peek_at(1).map(|d| d.is_ascii_digit() || d == b' ' || d == b'\n' || d == b')' || d == b',' || d == b']' || d == b'}').unwrap_or(true) =>
                {
                    is_float = true;
                    self.bump();
                }
                b'e' | b'E'
                    if self
                        .peek_at(1)
                        .map(|d| d.is_ascii_digit() || d == b'+' || d == b'-')
                        .unwrap_or(false) =>
                {
                    is_float = true;
                    self.bump();
                    self.bump();
                }
                _ => break,
            }
        }
        let text: String = std::str::from_utf8(&self.src[start..self.pos])
            .unwrap_or("")
            .replace('_', "");
        if is_float {
            let value: f64 = text.parse().map_err(|_| self.err("invalid float literal"))?;
            self.push(Tok::Float(value));
        } else {
            let value: i64 = text.parse().map_err(|_| self.err("invalid integer literal"))?;
            self.push(Tok::Int(value));
        }
        Ok(())
    }

    /// Lexes a string literal starting at the current quote character.
    /// Returns the decoded content (or raw content when `raw` is set).
    fn lex_string(&mut self, raw: bool) -> Result<String, InterpreterError> {
        let quote = self.bump().ok_or_else(|| self.err("expected string"))?;
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }
        let mut out = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(self.err("unterminated string literal"));
            };
            if c == quote {
                if !triple {
                    break;
                }
                if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                    self.bump();
                    self.bump();
                    break;
                }
                out.push(quote as char);
                continue;
            }
            if c == b'\n' && !triple {
                return Err(self.err("unterminated string literal"));
            }
            if c == b'\\' && !raw {
                let Some(esc) = self.bump() else {
                    return Err(self.err("unterminated escape"));
                };
                match esc {
                    b'n' => out.push('\n'),
                    b't' => out.push('\t'),
                    b'r' => out.push('\r'),
                    b'0' => out.push('\0'),
                    b'\\' => out.push('\\'),
                    b'\'' => out.push('\''),
                    b'"' => out.push('"'),
                    b'\n' => {}
                    b'x' => {
                        let hi = self.bump().ok_or_else(|| self.err("bad \\x escape"))?;
                        let lo = self.bump().ok_or_else(|| self.err("bad \\x escape"))?;
                        let hex = format!("{}{}", hi as char, lo as char);
                        let code =
                            u8::from_str_radix(&hex, 16).map_err(|_| self.err("bad \\x escape"))?;
                        out.push(code as char);
                    }
                    other => {
                        out.push('\\');
                        out.push(other as char);
                    }
                }
            } else {
                // re-assemble multi-byte utf-8 sequences
                if c < 0x80 {
                    out.push(c as char);
                } else {
                    let mut bytes = vec![c];
                    let extra = if c >= 0xF0 {
                        3
                    } else if c >= 0xE0 {
                        2
                    } else {
                        1
                    };
                    for _ in 0..extra {
                        if let Some(b) = self.bump() {
                            bytes.push(b);
                        }
                    }
                    out.push_str(&String::from_utf8_lossy(&bytes));
                }
            }
        }
        Ok(out)
    }

    /// Raw slice of a string literal (used for f-strings, where escapes are
    /// processed per-fragment after interpolation splitting).
    fn lex_string_raw_span(&mut self) -> Result<String, InterpreterError> {
        self.lex_string(true)
    }

    fn lex_name_or_prefixed_string(&mut self, _source: &str) -> Result<(), InterpreterError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.bump();
            } else {
                break;
            }
        }
        let word = std::str::from_utf8(&self.src[start..self.pos])
            .map_err(|_| self.err("invalid identifier"))?
            .to_string();

        // string prefixes: f"", r"", fr"", rf""
        if matches!(self.peek(), Some(b'"') | Some(b'\'')) {
            let lower = word.to_lowercase();
            match lower.as_str() {
                "f" | "fr" | "rf" => {
                    let raw = self.lex_string_raw_span()?;
                    self.push(Tok::FStr(raw));
                    return Ok(());
                }
                "r" => {
                    let s = self.lex_string(true)?;
                    self.push(Tok::Str(s));
                    return Ok(());
                }
                "b" | "rb" | "br" => {
                    let s = self.lex_string(lower.contains('r'))?;
                    self.push(Tok::Str(s));
                    return Ok(());
                }
                _ => {}
            }
        }

        if KEYWORDS.contains(&word.as_str()) {
            let kw = KEYWORDS.iter().find(|k| **k == word).unwrap();
            self.push(Tok::Kw(kw));
        } else {
            self.push(Tok::Name(word));
        }
        Ok(())
    }

    fn lex_symbol(&mut self) -> Result<(), InterpreterError> {
        for sym in SYMBOLS {
            let bytes = sym.as_bytes();
            if self.src[self.pos..].starts_with(bytes) {
                for _ in 0..bytes.len() {
                    self.bump();
                }
                match *sym {
                    "(" | "[" | "{" => self.paren_depth += 1,
                    ")" | "]" | "}" => self.paren_depth = self.paren_depth.saturating_sub(1),
                    _ => {}
                }
                self.push(Tok::Sym(sym));
                return Ok(());
            }
        }
        let c = self.peek().unwrap_or(b'?');
        Err(self.err(format!("unexpected character '{}'", c as char)))
    }
}
