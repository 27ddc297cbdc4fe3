use crate::error::{Error, ErrorCode};
use crate::syntax::token::{Token, TokenKind};

pub struct Lexer<'a> {
    source: &'a [u8],
    text: &'a str,
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { source: source.as_bytes(), text: source, pos: 0, line: 1, column: 1 }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, Vec<Error>> {
        let mut tokens = Vec::new();
        let mut errors = Vec::new();

        loop {
            self.skip_whitespace();

            if self.is_at_end() {
                tokens.push(Token::new(TokenKind::Eof, self.line, self.column));
                break;
            }

            match self.next_token() {
                Ok(tok) => tokens.push(tok),
                Err(e) => {
                    errors.push(e);
                    // resync: drop the offending character and carry on so a
                    // single bad input reports every problem it contains
                    if !self.is_at_end() {
                        self.advance();
                    }
                }
            }
        }

        if errors.is_empty() { Ok(tokens) } else { Err(errors) }
    }

    fn next_token(&mut self) -> Result<Token, Error> {
        let line = self.line;
        let col = self.column;
        let ch = self.peek();

        let kind = match ch {
            b'[' => { self.advance(); TokenKind::LBracket }
            b']' => { self.advance(); TokenKind::RBracket }
            b'{' => { self.advance(); TokenKind::LBrace }
            b'}' => { self.advance(); TokenKind::RBrace }
            b':' => { self.advance(); TokenKind::Colon }
            b',' => { self.advance(); TokenKind::Comma }
            b'(' => { self.advance(); TokenKind::LParen }
            b')' => { self.advance(); TokenKind::RParen }
            b'?' => { self.advance(); TokenKind::Question }
            b';' => { self.advance(); TokenKind::Semicolon }

            b'+' => { self.advance(); TokenKind::Plus }
            b'-' => { self.advance(); TokenKind::Minus }
            b'*' => { self.advance(); TokenKind::Star }
            b'/' => { self.advance(); TokenKind::Slash }
            b'%' => { self.advance(); TokenKind::Percent }

            b'=' => {
                self.advance();
                if self.peek() == b'=' {
                    self.advance();
                    if self.peek() == b'=' { self.advance(); TokenKind::EqEqEq }
                    else { TokenKind::EqEq }
                } else {
                    TokenKind::Assign
                }
            }
            b'!' => {
                self.advance();
                if self.peek() == b'=' {
                    self.advance();
                    if self.peek() == b'=' { self.advance(); TokenKind::BangEqEq }
                    else { TokenKind::BangEq }
                } else {
                    TokenKind::Bang
                }
            }
            b'<' => {
                self.advance();
                if self.peek() == b'=' { self.advance(); TokenKind::LtEq } else { TokenKind::Lt }
            }
            b'>' => {
                self.advance();
                if self.peek() == b'=' { self.advance(); TokenKind::GtEq } else { TokenKind::Gt }
            }
            b'&' => {
                self.advance();
                if self.peek() == b'&' { self.advance(); TokenKind::AndAnd }
                else {
                    return Err(Error::new(ErrorCode::L001, line, col,
                        "unexpected character `&`"));
                }
            }
            b'|' => {
                self.advance();
                if self.peek() == b'|' { self.advance(); TokenKind::OrOr } else { TokenKind::Pipe }
            }

            b'\'' | b'"' => TokenKind::Str(self.read_string(line, col)?),
            b'0'..=b'9' => TokenKind::Number(self.read_number(line, col)?),
            b'.' => {
                if self.peek_next().is_ascii_digit() {
                    TokenKind::Number(self.read_number(line, col)?)
                } else {
                    self.advance();
                    TokenKind::Dot
                }
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' | b'$' => TokenKind::Ident(self.read_ident()),

            _ => {
                let offending = self.char_at_pos();
                return Err(Error::new(ErrorCode::L001, line, col,
                    format!("unexpected character `{offending}`")));
            }
        };

        Ok(Token::new(kind, line, col))
    }

    // ─── Primitives ──────────────────────────────────────────────────────────

    fn advance(&mut self) -> u8 {
        let ch = self.source[self.pos];
        self.pos += 1;
        if ch == b'\n' { self.line += 1; self.column = 1; }
        else { self.column += 1; }
        ch
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() { 0 } else { self.source[self.pos] }
    }

    fn peek_next(&self) -> u8 {
        if self.pos + 1 >= self.source.len() { 0 } else { self.source[self.pos + 1] }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.source.len()
    }

    /// Decode the (possibly multi-byte) character at the cursor, for errors.
    fn char_at_pos(&self) -> char {
        self.text
            .get(self.pos..)
            .and_then(|t| t.chars().next())
            .unwrap_or('\u{FFFD}')
    }

    fn skip_whitespace(&mut self) {
        while !self.is_at_end() {
            match self.peek() {
                b' ' | b'\t' | b'\r' | b'\n' | 0x0B => { self.advance(); }
                // U+00A0 no-break space, encoded as C2 A0
                0xC2 if self.peek_next() == 0xA0 => { self.advance(); self.advance(); }
                _ => break,
            }
        }
    }

    // ─── Readers ─────────────────────────────────────────────────────────────

    fn read_string(&mut self, start_line: usize, start_col: usize) -> Result<String, Error> {
        let quote = self.advance();
        let mut s = String::new();
        loop {
            if self.is_at_end() {
                return Err(Error::new(ErrorCode::L002, start_line, start_col,
                    "unterminated string literal"));
            }
            let ch = self.advance();
            if ch == quote { break; }
            if ch == b'\\' {
                let esc_line = self.line;
                let esc_col = self.column;
                if self.is_at_end() {
                    return Err(Error::new(ErrorCode::L002, start_line, start_col,
                        "unterminated string literal"));
                }
                match self.advance() {
                    b'n' => s.push('\n'),
                    b'f' => s.push('\u{000C}'),
                    b'r' => s.push('\r'),
                    b't' => s.push('\t'),
                    b'v' => s.push('\u{000B}'),
                    b'u' => s.push(self.read_unicode_escape(esc_line, esc_col)?),
                    // any other escaped character stands for itself
                    other => self.push_raw(&mut s, other),
                }
            } else {
                self.push_raw(&mut s, ch);
            }
        }
        Ok(s)
    }

    /// Append a byte that begins at `pos - 1`, pulling in the remaining bytes
    /// of a multi-byte UTF-8 sequence so string contents stay intact.
    fn push_raw(&mut self, s: &mut String, first: u8) {
        if first < 0x80 {
            s.push(first as char);
            return;
        }
        let width = if first >= 0xF0 { 4 } else if first >= 0xE0 { 3 } else { 2 };
        let start = self.pos - 1;
        for _ in 1..width {
            if !self.is_at_end() { self.advance(); }
        }
        if let Some(ch) = self.text.get(start..start + width).and_then(|t| t.chars().next()) {
            s.push(ch);
        }
    }

    fn read_unicode_escape(&mut self, line: usize, col: usize) -> Result<char, Error> {
        let mut code: u32 = 0;
        for _ in 0..4 {
            let ch = self.peek();
            if !ch.is_ascii_hexdigit() {
                return Err(Error::new(ErrorCode::L003, line, col,
                    "invalid unicode escape — expected four hex digits after `\\u`"));
            }
            self.advance();
            code = code * 16 + (ch as char).to_digit(16).unwrap_or(0);
        }
        Ok(char::from_u32(code).unwrap_or('\u{FFFD}'))
    }

    fn read_number(&mut self, line: usize, col: usize) -> Result<f64, Error> {
        let mut s = String::new();

        if self.peek() == b'.' {
            // leading-dot form: `.5`
            s.push('0');
            s.push(self.advance() as char);
        } else {
            s.push(self.advance() as char);
        }
        while self.peek().is_ascii_digit() {
            s.push(self.advance() as char);
        }
        if s.as_bytes().last() != Some(&b'.') && self.peek() == b'.' {
            s.push(self.advance() as char);
            while self.peek().is_ascii_digit() {
                s.push(self.advance() as char);
            }
        }
        if matches!(self.peek(), b'e' | b'E') {
            let after = self.peek_next();
            let valid = after.is_ascii_digit()
                || (matches!(after, b'+' | b'-') && self.digit_follows_sign());
            if !valid {
                return Err(Error::new(ErrorCode::L004, line, col, "invalid exponent"));
            }
            self.advance(); // e
            s.push('e');
            if matches!(self.peek(), b'+' | b'-') {
                s.push(self.advance() as char);
            }
            while self.peek().is_ascii_digit() {
                s.push(self.advance() as char);
            }
        }

        Ok(s.parse().unwrap_or(f64::NAN))
    }

    /// True when the byte after an `e±` pair is a digit.
    fn digit_follows_sign(&self) -> bool {
        self.pos + 2 < self.source.len() && self.source[self.pos + 2].is_ascii_digit()
    }

    fn read_ident(&mut self) -> String {
        let mut s = String::new();
        s.push(self.advance() as char);
        while !self.is_at_end() {
            let ch = self.peek();
            if ch.is_ascii_alphanumeric() || ch == b'_' || ch == b'$' {
                s.push(self.advance() as char);
            } else {
                break;
            }
        }
        s
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
