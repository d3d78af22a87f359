//! Caller-visible channel for degraded-but-successful decoding.

use std::fmt;
use std::sync::Mutex;

/// Something the decoder tolerated instead of failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// An optional filter with no registered codec was skipped.
    OptionalFilterSkipped { filter_id: u16, variable: String },
    /// A message type this decoder does not know was kept as a placeholder.
    UnknownMessage { msg_type: u16, offset: u64 },
    /// A dimension could not be matched unambiguously by length.
    AmbiguousDimension { variable: String, length: u64 },
    /// An attribute could not be decoded and was left out.
    UnsupportedAttribute { name: String, reason: String },
    /// A fill value of the wrong width was replaced by zeros.
    FillValueIgnored {
        variable: String,
        expected: usize,
        actual: usize,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::OptionalFilterSkipped {
                filter_id,
                variable,
            } => write!(f, "skipped optional filter {filter_id} on {variable}"),
            Warning::UnknownMessage { msg_type, offset } => {
                write!(f, "unknown message type {msg_type:#06x} at {offset:#x}")
            }
            Warning::AmbiguousDimension { variable, length } => write!(
                f,
                "no unique dimension of length {length} for {variable}; using anonymous"
            ),
            Warning::UnsupportedAttribute { name, reason } => {
                write!(f, "attribute {name} skipped: {reason}")
            }
            Warning::FillValueIgnored {
                variable,
                expected,
                actual,
            } => write!(
                f,
                "fill value of {variable} is {actual} bytes, element is {expected}; using zeros"
            ),
        }
    }
}

/// Receives warnings from the decoder.
pub trait WarningSink: Send + Sync {
    fn warn(&self, warning: Warning);
}

/// Forwards every warning to `log::warn!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogWarnings;

impl WarningSink for LogWarnings {
    fn warn(&self, warning: Warning) {
        log::warn!("{warning}");
    }
}

/// Logs each warning and keeps it for later inspection.
#[derive(Debug, Default)]
pub struct CollectingWarnings {
    inner: Mutex<Vec<Warning>>,
}

impl CollectingWarnings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything collected so far.
    pub fn drain(&self) -> Vec<Warning> {
        match self.inner.lock() {
            Ok(mut v) => std::mem::take(&mut *v),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl WarningSink for CollectingWarnings {
    fn warn(&self, warning: Warning) {
        log::warn!("{warning}");
        match self.inner.lock() {
            Ok(mut v) => v.push(warning),
            Err(poisoned) => poisoned.into_inner().push(warning),
        }
    }
}
