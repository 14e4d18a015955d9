//! Parser error types.
//!
//! Every fault the engine can report carries a stable [`ErrorCode`] the host
//! may switch on, plus the offending token text, the expression and the byte
//! position where classification stopped.

use std::fmt;

use thiserror::Error;

pub type ParseResult<T> = Result<T, ParseError>;

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Stable error codes. Some entries are reserved for hosts and callbacks
/// (`DivByZero`, `DomainError`, `LocaleConflict`, ...) and are never raised
/// by the core itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // expression syntax
    UnexpectedOperator,
    UnassignableToken,
    UnexpectedEof,
    UnexpectedArgSep,
    UnexpectedArg,
    UnexpectedVal,
    UnexpectedVar,
    UnexpectedParens,
    UnexpectedFun,
    ValExpected,

    // expression structure
    MissingParens,
    TooManyParams,
    TooFewParams,

    // definition faults
    InvalidName,
    InvalidInfixIdent,
    InvalidPostfixIdent,
    InvalidFunPtr,
    InvalidVarPtr,
    NameConflict,

    // configuration
    EmptyExpression,
    OptPriority,
    BuiltinOverload,
    LocaleConflict,

    // conditional operator
    UnexpectedConditional,
    MissingElseClause,
    MisplacedColon,

    // numeric (raised by callbacks)
    DivByZero,
    DomainError,
    Generic,

    // invariant violations
    InternalError,
}

impl ErrorCode {
    fn message(self) -> &'static str {
        match self {
            ErrorCode::UnexpectedOperator => "unexpected operator",
            ErrorCode::UnassignableToken => "unexpected token",
            ErrorCode::UnexpectedEof => "unexpected end of expression",
            ErrorCode::UnexpectedArgSep => "unexpected argument separator",
            ErrorCode::UnexpectedArg => "unexpected argument list",
            ErrorCode::UnexpectedVal => "unexpected value",
            ErrorCode::UnexpectedVar => "unexpected variable",
            ErrorCode::UnexpectedParens => "unexpected parenthesis",
            ErrorCode::UnexpectedFun => "unexpected function",
            ErrorCode::ValExpected => "value expected",
            ErrorCode::MissingParens => "missing parenthesis",
            ErrorCode::TooManyParams => "too many parameters passed to function",
            ErrorCode::TooFewParams => "too few parameters passed to function",
            ErrorCode::InvalidName => "invalid name",
            ErrorCode::InvalidInfixIdent => "invalid prefix operator identifier",
            ErrorCode::InvalidPostfixIdent => "invalid postfix operator identifier",
            ErrorCode::InvalidFunPtr => "invalid function callback",
            ErrorCode::InvalidVarPtr => "invalid variable reference",
            ErrorCode::NameConflict => "name conflict",
            ErrorCode::EmptyExpression => "expression is empty",
            ErrorCode::OptPriority => "invalid operator priority",
            ErrorCode::BuiltinOverload => "attempt to overload a builtin operator",
            ErrorCode::LocaleConflict => "conflict with locale settings",
            ErrorCode::UnexpectedConditional => "unexpected conditional operator",
            ErrorCode::MissingElseClause => "conditional without an else branch",
            ErrorCode::MisplacedColon => "misplaced colon",
            ErrorCode::DivByZero => "division by zero",
            ErrorCode::DomainError => "domain error",
            ErrorCode::Generic => "parser error",
            ErrorCode::InternalError => "internal parser error",
        }
    }
}

// ---------------------------------------------------------------------------
// ParseError
// ---------------------------------------------------------------------------

/// A structured compile- or evaluation-time fault.
#[derive(Debug, Clone, Error, PartialEq)]
pub struct ParseError {
    code: ErrorCode,
    token: String,
    expr: String,
    pos: Option<usize>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code.message())?;
        if !self.token.is_empty() {
            write!(f, " \"{}\"", self.token)?;
        }
        if let Some(pos) = self.pos {
            write!(f, " at position {}", pos)?;
        }
        Ok(())
    }
}

impl ParseError {
    pub fn new(
        code: ErrorCode,
        token: impl Into<String>,
        expr: impl Into<String>,
        pos: Option<usize>,
    ) -> Self {
        ParseError {
            code,
            token: token.into(),
            expr: expr.into(),
            pos,
        }
    }

    /// Shorthand for errors without position context (definition faults,
    /// internal invariant violations).
    pub fn of(code: ErrorCode) -> Self {
        ParseError::new(code, "", "", None)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The token text the error refers to; empty if not applicable.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The expression being compiled or evaluated when the error occurred.
    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Byte position in the expression, if known.
    pub fn pos(&self) -> Option<usize> {
        self.pos
    }
}

// ---------------------------------------------------------------------------
// MathError
// ---------------------------------------------------------------------------

/// Fault raised by a numeric callback during evaluation (or during
/// compile-time constant folding, which invokes the same callbacks).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MathError {
    #[error("division by zero")]
    DivByZero,
    #[error("domain error")]
    Domain,
    #[error("too few arguments for function '{0}'")]
    TooFewArgs(&'static str),
    #[error("{0}")]
    Custom(String),
}

impl MathError {
    pub fn code(&self) -> ErrorCode {
        match self {
            MathError::DivByZero => ErrorCode::DivByZero,
            MathError::Domain => ErrorCode::DomainError,
            MathError::TooFewArgs(_) => ErrorCode::TooFewParams,
            MathError::Custom(_) => ErrorCode::Generic,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_carries_token_and_pos() {
        let err = ParseError::new(ErrorCode::UnexpectedOperator, "+", "1++2", Some(2));
        let msg = err.to_string();
        assert!(msg.contains("unexpected operator"));
        assert!(msg.contains("\"+\""));
        assert!(msg.contains("position 2"));
    }

    #[test]
    fn test_math_error_mapping() {
        assert_eq!(MathError::DivByZero.code(), ErrorCode::DivByZero);
        assert_eq!(MathError::TooFewArgs("sum").code(), ErrorCode::TooFewParams);
    }
}
