use std::fmt;

use crate::scalar::Scalar;

/// The binding's error taxonomy.
///
/// `Init` is fatal session-startup failure: the half-built interpreter has
/// already been torn down when the caller sees it. `Runtime` carries the
/// runtime's error value itself, not a rendering of it, so callers can
/// inspect it exactly as script code inspecting `$err` would.
#[derive(Debug)]
pub enum Error {
    Init { stage: &'static str, message: String },
    Runtime(Scalar),
}

impl Error {
    /// A runtime error from plain message text.
    pub fn msg(text: impl Into<String>) -> Self {
        Error::Runtime(Scalar::from(text.into()))
    }

    /// The carried error value, for `Runtime` errors.
    pub fn value(&self) -> Option<&Scalar> {
        match self {
            Error::Runtime(value) => Some(value),
            Error::Init { .. } => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Init { stage, message } => write!(f, "interpreter {} failed: {}", stage, message),
            Error::Runtime(value) => write!(f, "{}", value.as_string()),
        }
    }
}

impl std::error::Error for Error {}
