//! Error types for the policy compiler.

use crate::token::Span;
use thiserror::Error;

/// Result type alias for compiler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], used by callers to pick a response
/// status and by logging to single out suspicious policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The policy document itself is malformed.
    Structure,
    /// A path could not be bound to the schema.
    Resolution,
    /// The policy tries to compare two server-side fields.
    Security,
    /// A schema-binding document is invalid.
    Config,
}

/// Errors raised while decoding, resolving or compiling a policy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed policy document (bad key, arity, empty list, bad literal).
    #[error("invalid policy document: {message}")]
    Structure {
        /// What was wrong with the document.
        message: String,
    },

    /// Syntax error inside a `$field` or fragment path.
    #[error("invalid path `{path}` at {}..{}: {message}", .span.start, .span.end)]
    PathSyntax {
        /// The offending path text.
        path: String,
        /// Byte range of the offending token.
        span: Span,
        /// What the parser expected.
        message: String,
    },

    /// The path names a root with no registered binding.
    #[error("unknown root `{root}`")]
    UnknownRoot {
        /// Root token, e.g. `$aasdesc`.
        root: String,
    },

    /// The path is well-formed but does not bind to a column.
    #[error("cannot resolve `{path}`: {reason}")]
    Unresolvable {
        /// The full path text.
        path: String,
        /// Why resolution failed.
        reason: String,
    },

    /// `[n]` used on a structure without positional storage.
    #[error("fixed index on `{segment}` in `{path}` is not supported: the structure has no positional storage")]
    UnsupportedIndex {
        /// The full path text.
        path: String,
        /// The indexed segment.
        segment: String,
    },

    /// Operands whose types cannot be compared.
    #[error("type mismatch in {operator}: {message}")]
    TypeMismatch {
        /// Grammar operator, e.g. `$gt`.
        operator: String,
        /// Description of the conflicting types.
        message: String,
    },

    /// Both operands of a comparison or string predicate are field references.
    #[error("field-to-field comparison in {operator} between `{left}` and `{right}` is not allowed")]
    FieldToField {
        /// Grammar operator, e.g. `$eq`.
        operator: String,
        /// Left field path.
        left: String,
        /// Right field path.
        right: String,
    },

    /// An `$attribute` the resolver has no value for is still needed to build SQL.
    #[error("attribute {attribute} has no value; the filter cannot be built without it")]
    UnresolvedAttribute {
        /// The attribute, e.g. `CLAIM sub`.
        attribute: String,
    },

    /// Two predicates compiled against different root tables were combined.
    #[error("cannot combine a predicate over `{left}` with one over `{right}`")]
    RootMismatch {
        /// Table and alias of the left predicate.
        left: String,
        /// Table and alias of the right predicate.
        right: String,
    },

    /// Invalid schema-binding document.
    #[error("schema configuration error: {message}")]
    Config {
        /// What was wrong with the configuration.
        message: String,
    },
}

impl Error {
    pub(crate) fn structure(message: impl Into<String>) -> Self {
        Self::Structure {
            message: message.into(),
        }
    }

    pub(crate) fn unresolvable(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unresolvable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn type_mismatch(operator: &str, message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            operator: operator.to_string(),
            message: message.into(),
        }
    }

    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Structure { .. } | Self::PathSyntax { .. } | Self::TypeMismatch { .. } => {
                ErrorKind::Structure
            }
            Self::UnknownRoot { .. }
            | Self::Unresolvable { .. }
            | Self::UnsupportedIndex { .. }
            | Self::UnresolvedAttribute { .. }
            | Self::RootMismatch { .. } => ErrorKind::Resolution,
            Self::FieldToField { .. } => ErrorKind::Security,
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    /// True for errors that hint at an authorization-bypass attempt.
    pub fn is_security_violation(&self) -> bool {
        self.kind() == ErrorKind::Security
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::structure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_to_field_is_security_kind() {
        let err = Error::FieldToField {
            operator: "$eq".to_string(),
            left: "$aasdesc#idShort".to_string(),
            right: "$aasdesc#id".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Security);
        assert!(err.is_security_violation());
        assert_eq!(
            err.to_string(),
            "field-to-field comparison in $eq between `$aasdesc#idShort` and `$aasdesc#id` is not allowed"
        );
    }

    #[test]
    fn test_path_syntax_display() {
        let err = Error::PathSyntax {
            path: "$sm#".to_string(),
            span: Span::new(4, 4),
            message: "expected segment name".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Structure);
        assert_eq!(err.to_string(), "invalid path `$sm#` at 4..4: expected segment name");
    }

    #[test]
    fn test_resolution_kinds() {
        assert_eq!(
            Error::UnknownRoot { root: "$nope".into() }.kind(),
            ErrorKind::Resolution
        );
        let err = Error::UnsupportedIndex {
            path: "$aasdesc#endpoints[0]".into(),
            segment: "endpoints".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Resolution);
        assert!(!err.is_security_violation());

        let err = Error::UnresolvedAttribute {
            attribute: "CLAIM sub".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Resolution);
        assert_eq!(
            err.to_string(),
            "attribute CLAIM sub has no value; the filter cannot be built without it"
        );
    }
}
