use std::{fmt, sync::OnceLock};

use thiserror::Error;

use crate::{Isolate, ObjectId, TokenPosition, Value};

pub type ObjectResult<T> = Result<T, ObjectError>;

/// Allocator level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("out of memory: requested {requested} bytes with {used} of {capacity} in use")]
    OutOfMemory {
        requested: usize,
        used: usize,
        capacity: usize,
    },
    #[error("allocation size {size} is not aligned to {alignment}")]
    Misaligned { size: usize, alignment: usize },
}

/// Errors raised or returned by the object model.
#[derive(Debug, Clone, Error)]
pub enum ObjectError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Language(#[from] LanguageError),
    #[error(transparent)]
    Unhandled(#[from] UnhandledException),
    #[error(transparent)]
    Unwind(#[from] UnwindError),
    #[error("background compilation aborted: {reason}")]
    BackgroundCompilationAborted { reason: String },
}

impl ObjectError {
    pub fn language(message: impl Into<String>) -> Self {
        Self::Language(LanguageError::new(LanguageErrorKind::Error, message))
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::Api(ApiError::new(message))
    }

    pub fn is_language_error(&self) -> bool {
        matches!(self, Self::Language(_))
    }
}

/// A malformed or misused embedding call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("api error: {message}")]
pub struct ApiError {
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LanguageErrorKind {
    Error,
    Syntax,
    Compilation,
    Bailout,
}

impl LanguageErrorKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Error => "Error",
            Self::Syntax => "Syntax error",
            Self::Compilation => "Compilation error",
            Self::Bailout => "Bailout",
        }
    }
}

/// Compile, parse or bound violation, optionally chained to an earlier error.
#[derive(Debug, Clone)]
pub struct LanguageError {
    pub kind: LanguageErrorKind,
    pub message: String,
    pub script: Option<ObjectId>,
    pub token_pos: TokenPosition,
    pub previous: Option<Box<LanguageError>>,
    formatted: OnceLock<String>,
}

impl LanguageError {
    pub fn new(kind: LanguageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            script: None,
            token_pos: TokenPosition::NO_SOURCE,
            previous: None,
            formatted: OnceLock::new(),
        }
    }

    pub fn at(mut self, script: ObjectId, token_pos: TokenPosition) -> Self {
        self.script = Some(script);
        self.token_pos = token_pos;
        self
    }

    pub fn chain(mut self, previous: LanguageError) -> Self {
        self.previous = Some(Box::new(previous));
        self
    }

    /// Full message with source snippet and chained errors.
    /// Computed once, later calls return the cached text.
    pub fn format_message(&self, isolate: &Isolate) -> &str {
        self.formatted.get_or_init(|| {
            let mut result = String::new();
            if let Some(previous) = &self.previous {
                result.push_str(previous.format_message(isolate));
                result.push('\n');
            }
            result.push_str(&self.snippet(isolate));
            result
        })
    }

    fn snippet(&self, isolate: &Isolate) -> String {
        let Some(script) = self.script else {
            return format!("{}: {}", self.kind.prefix(), self.message);
        };
        let url = isolate.script_url(script);
        match isolate.script_location(script, self.token_pos) {
            Some((line, column, text)) => {
                let caret = " ".repeat(column.saturating_sub(1));
                format!(
                    "{url}:{line}:{column}: {}: {}\n{text}\n{caret}^",
                    self.kind.prefix(),
                    self.message
                )
            }
            None => format!("{url}: {}: {}", self.kind.prefix(), self.message),
        }
    }
}

impl fmt::Display for LanguageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(text) = self.formatted.get() {
            return f.write_str(text);
        }
        if let Some(previous) = &self.previous {
            writeln!(f, "{previous}")?;
        }
        write!(f, "{}: {}", self.kind.prefix(), self.message)
    }
}

impl std::error::Error for LanguageError {}

/// A language-level exception travelling up the managed stack.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unhandled exception: {exception}")]
pub struct UnhandledException {
    pub exception: Value,
    pub stacktrace: Value,
}

/// Non-recoverable unwind, e.g. isolate shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unwind: {message}")]
pub struct UnwindError {
    pub message: String,
    pub is_user_initiated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_display_lists_previous_first() {
        let first = LanguageError::new(LanguageErrorKind::Syntax, "unexpected token");
        let second =
            LanguageError::new(LanguageErrorKind::Compilation, "class A failed").chain(first);
        assert_eq!(
            second.to_string(),
            "Syntax error: unexpected token\nCompilation error: class A failed"
        );
    }

    #[test]
    fn object_error_wraps_language_error() {
        let error = ObjectError::language("too many imports");
        assert!(error.is_language_error());
        assert_eq!(error.to_string(), "Error: too many imports");
    }

    #[test]
    fn heap_error_message() {
        let error = HeapError::OutOfMemory {
            requested: 32,
            used: 96,
            capacity: 100,
        };
        assert_eq!(
            error.to_string(),
            "out of memory: requested 32 bytes with 96 of 100 in use"
        );
    }
}
