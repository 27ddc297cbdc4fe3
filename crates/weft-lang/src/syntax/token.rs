use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals and names
    Number(f64),
    Str(String),
    Ident(String),

    // Operators
    Plus,        // +
    Minus,       // -
    Star,        // *
    Slash,       // /
    Percent,     // %
    Bang,        // !
    Assign,      // =
    EqEq,        // ==
    BangEq,      // !=
    EqEqEq,      // ===
    BangEqEq,    // !==
    Lt,          // <
    Gt,          // >
    LtEq,        // <=
    GtEq,        // >=
    AndAnd,      // &&
    OrOr,        // ||
    Pipe,        // |

    // Punctuation
    LBracket,    // [
    RBracket,    // ]
    LBrace,      // {
    RBrace,      // }
    Colon,       // :
    Comma,       // ,
    Dot,         // .
    LParen,      // (
    RParen,      // )
    Question,    // ?
    Semicolon,   // ;

    Eof,
}

impl TokenKind {
    pub fn is_identifier(&self) -> bool {
        matches!(self, Self::Ident(_))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Self::Number(_) | Self::Str(_))
    }

    pub fn is_operator(&self) -> bool {
        matches!(
            self,
            Self::Plus | Self::Minus | Self::Star | Self::Slash | Self::Percent
            | Self::Bang | Self::Assign | Self::EqEq | Self::BangEq | Self::EqEqEq
            | Self::BangEqEq | Self::Lt | Self::Gt | Self::LtEq | Self::GtEq
            | Self::AndAnd | Self::OrOr | Self::Pipe
        )
    }

    /// The lexeme this token renders back to. Lex → render → lex is the
    /// identity on token streams.
    pub fn render(&self) -> String {
        match self {
            Self::Number(n) => crate::runtime::value::format_number(*n),
            Self::Str(s) => {
                let mut out = String::with_capacity(s.len() + 2);
                out.push('"');
                for ch in s.chars() {
                    match ch {
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        '\t' => out.push_str("\\t"),
                        '\u{000C}' => out.push_str("\\f"),
                        '\u{000B}' => out.push_str("\\v"),
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        other => out.push(other),
                    }
                }
                out.push('"');
                out
            }
            Self::Ident(name) => name.clone(),
            Self::Plus => "+".into(),
            Self::Minus => "-".into(),
            Self::Star => "*".into(),
            Self::Slash => "/".into(),
            Self::Percent => "%".into(),
            Self::Bang => "!".into(),
            Self::Assign => "=".into(),
            Self::EqEq => "==".into(),
            Self::BangEq => "!=".into(),
            Self::EqEqEq => "===".into(),
            Self::BangEqEq => "!==".into(),
            Self::Lt => "<".into(),
            Self::Gt => ">".into(),
            Self::LtEq => "<=".into(),
            Self::GtEq => ">=".into(),
            Self::AndAnd => "&&".into(),
            Self::OrOr => "||".into(),
            Self::Pipe => "|".into(),
            Self::LBracket => "[".into(),
            Self::RBracket => "]".into(),
            Self::LBrace => "{".into(),
            Self::RBrace => "}".into(),
            Self::Colon => ":".into(),
            Self::Comma => ",".into(),
            Self::Dot => ".".into(),
            Self::LParen => "(".into(),
            Self::RParen => ")".into(),
            Self::Question => "?".into(),
            Self::Semicolon => ";".into(),
            Self::Eof => "".into(),
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, line: usize, column: usize) -> Self {
        Self { kind, line, column }
    }
}
