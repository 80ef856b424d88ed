//! Error type for model construction and forward calls.

use thiserror::Error;

/// Errors raised while building a [`TqModel`](crate::core::model::TqModel) or
/// running a forward pass.
///
/// A failed call never mutates the model, so there is nothing to roll back.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TqError {
    /// A call-time tensor disagrees with the configured shape.
    #[error("shape mismatch on {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// Phase querying is enabled but the caller supplied no cycle indices.
    #[error("phase query is enabled but no cycle index was supplied")]
    MissingCycleIndex,

    /// The configuration cannot produce a working model.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, TqError>;

impl TqError {
    pub(crate) fn shape(what: &'static str, expected: usize, got: usize) -> Self {
        TqError::ShapeMismatch {
            what,
            expected,
            got,
        }
    }
}

/// Fail with [`TqError::ShapeMismatch`] unless `got == expected`.
pub(crate) fn ensure_len(what: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(TqError::shape(what, expected, got))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_len() {
        assert!(ensure_len("seq_len", 4, 4).is_ok());
        let err = ensure_len("seq_len", 4, 5).unwrap_err();
        assert_eq!(
            err,
            TqError::ShapeMismatch {
                what: "seq_len",
                expected: 4,
                got: 5
            }
        );
    }

    #[test]
    fn test_display() {
        let err = TqError::shape("channels", 7, 3);
        assert_eq!(
            err.to_string(),
            "shape mismatch on channels: expected 7, got 3"
        );
        assert!(TqError::MissingCycleIndex.to_string().contains("cycle index"));
    }
}
