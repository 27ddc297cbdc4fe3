/// Error codes prefixed by phase: L = lexer, P = parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    // Lexer
    L001, // unexpected character
    L002, // unterminated string literal
    L003, // invalid escape sequence
    L004, // invalid exponent

    // Parser
    P001, // unexpected token
    P002, // missing expected token

    // Semantic / safety
    S001, // disallowed member name
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L001 => "L001",
            Self::L002 => "L002",
            Self::L003 => "L003",
            Self::L004 => "L004",
            Self::P001 => "P001",
            Self::P002 => "P002",
            Self::S001 => "S001",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl Error {
    pub fn new(code: ErrorCode, line: usize, column: usize, message: impl Into<String>) -> Self {
        Self { code, line, column, message: message.into() }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}:{} — {}", self.code.as_str(), self.line, self.column, self.message)
    }
}

impl std::error::Error for Error {}

// ─────────────────────────────────────────────────────────────────────────────

/// Fault raised while evaluating a compiled expression: safety violations,
/// calls of non-functions, unknown filters, host callable failures.
/// Inside a digest these are caught and routed to the root's [`ErrorSink`];
/// from a direct `eval` they surface to the caller.
#[derive(Debug, Clone)]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    pub(crate) fn disallowed_field(name: &str, expr: &str) -> Self {
        Self::msg(format!(
            "attempting to access a disallowed field `{name}` in `{expr}`"
        ))
    }

    pub(crate) fn disallowed_object(what: &str, expr: &str) -> Self {
        Self::msg(format!("referencing a {what} is disallowed in `{expr}`"))
    }

    pub(crate) fn not_a_function(name: &str) -> Self {
        Self::msg(format!("`{name}` is not a function"))
    }

    pub(crate) fn unknown_filter(name: &str) -> Self {
        Self::msg(format!("unknown filter `{name}`"))
    }

    pub(crate) fn non_assignable(expr: &str) -> Self {
        Self::msg(format!("`{expr}` is not assignable"))
    }
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[eval] {}", self.message)
    }
}

impl std::error::Error for EvalError {}

// ─────────────────────────────────────────────────────────────────────────────

/// Scheduler-level failures. Unlike evaluation faults these abort the digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    /// The dirty-check loop did not reach a fixed point within the TTL.
    TtlExceeded { ttl: usize },
    /// `digest`/`apply` entered while another phase was active.
    PhaseInProgress { phase: &'static str },
}

impl std::fmt::Display for DigestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TtlExceeded { ttl } => {
                write!(f, "{ttl} digest iterations reached without settling")
            }
            Self::PhaseInProgress { phase } => write!(f, "{phase} already in progress"),
        }
    }
}

impl std::error::Error for DigestError {}

// ─────────────────────────────────────────────────────────────────────────────

/// Any failure the public scope surface can report.
#[derive(Debug)]
pub enum WeftError {
    Compile(Vec<Error>),
    Eval(EvalError),
    Digest(DigestError),
}

impl std::fmt::Display for WeftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compile(errs) => match errs.first() {
                Some(first) => write!(f, "{first}"),
                None => write!(f, "compile failed"),
            },
            Self::Eval(e) => write!(f, "{e}"),
            Self::Digest(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for WeftError {}

impl From<Vec<Error>> for WeftError {
    fn from(errs: Vec<Error>) -> Self {
        Self::Compile(errs)
    }
}

impl From<EvalError> for WeftError {
    fn from(e: EvalError) -> Self {
        Self::Eval(e)
    }
}

impl From<DigestError> for WeftError {
    fn from(e: DigestError) -> Self {
        Self::Digest(e)
    }
}

// ─────────────────────────────────────────────────────────────────────────────

/// Destination for faults caught during digests: watcher and listener
/// failures, async-queue task failures, event-listener failures.
/// The digest never aborts on these; it reports and moves on.
pub trait ErrorSink {
    fn error(&self, error: &EvalError, context: &str);
}

/// Default sink: forwards to `tracing`.
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn error(&self, error: &EvalError, context: &str) {
        tracing::error!(target: "weft", context, "{error}");
    }
}
