use std::fmt;

use thiserror::Error;

use crate::object::ObjectError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Strict mode saw a byte that is neither a command nor whitespace/control
    UnknownSymbol,
    NestingTooDeep,
    UnmatchedLoop,
    /// The object container rejected a step of `dump`
    ObjectFormatFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::UnknownSymbol => write!(f, "unknown symbol"),
            ErrorKind::NestingTooDeep => write!(f, "nesting too deep"),
            ErrorKind::UnmatchedLoop => write!(f, "unmatched loop"),
            ErrorKind::ObjectFormatFailure => write!(f, "object format failure"),
        }
    }
}

/// Error reported by a codegen instance.
///
/// `position` is a byte offset into the source stream for errors detected
/// while scanning, and `None` for errors coming from the object container.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct CodegenError {
    pub kind: ErrorKind,
    pub position: Option<usize>,
    pub message: String,
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.position {
            Some(position) => write!(f, "{}: {}", position, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl CodegenError {
    pub(crate) fn at(kind: ErrorKind, position: usize, message: impl Into<String>) -> Self {
        Self {
            kind,
            position: Some(position),
            message: message.into(),
        }
    }

    pub(crate) fn unknown_symbol(position: usize, byte: u8) -> Self {
        Self::at(
            ErrorKind::UnknownSymbol,
            position,
            format!("Unknown symbol {}", byte.escape_ascii()),
        )
    }

    pub(crate) fn nesting_too_deep(position: usize) -> Self {
        Self::at(ErrorKind::NestingTooDeep, position, "Nesting too deep")
    }

    pub(crate) fn unmatched_close(position: usize) -> Self {
        Self::at(
            ErrorKind::UnmatchedLoop,
            position,
            "] found when not in a loop",
        )
    }

    pub(crate) fn unclosed_loop(position: usize) -> Self {
        Self::at(
            ErrorKind::UnmatchedLoop,
            position,
            "reached end of input with unterminated loop",
        )
    }
}

impl From<ObjectError> for CodegenError {
    fn from(err: ObjectError) -> Self {
        Self {
            kind: ErrorKind::ObjectFormatFailure,
            position: None,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_position_when_present() {
        let err = CodegenError::unknown_symbol(7, b'x');
        assert_eq!(err.to_string(), "7: Unknown symbol x");
        assert_eq!(err.kind, ErrorKind::UnknownSymbol);
    }

    #[test]
    fn object_errors_keep_the_container_message() {
        let err = CodegenError::from(ObjectError::new("section `.text' already exists"));
        assert_eq!(err.kind, ErrorKind::ObjectFormatFailure);
        assert_eq!(err.position, None);
        assert_eq!(err.to_string(), "section `.text' already exists");
    }
}
