//! Error types for the reconciliation engine.
//!
//! The engine is total on well-formed input: every detectable error is a
//! fatal descriptor-table inconsistency that aborts the enclosing compilation
//! before any code is emitted. There are no retriable conditions; the runtime
//! falls back to the baseline tier when compilation aborts.

use thiserror::Error;

/// The unified result type used throughout Refract.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Fatal conditions detected while linking tier-transition exits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// A descriptor table violated its uniqueness or liveness invariants,
    /// e.g. the same logical value claimed by two physical registers.
    #[error("inconsistent exit descriptors: {message}")]
    InconsistentDescriptors {
        /// What the validation pass found.
        message: String,
    },

    /// An exit names a bytecode offset with no baseline machine-code mapping.
    #[error("no baseline machine offset for bytecode offset {bytecode_offset}")]
    UnmappedBytecode {
        /// The offset that failed to resolve.
        bytecode_offset: u32,
    },
}

impl ReconcileError {
    /// Create an inconsistent-descriptor error.
    #[must_use]
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::InconsistentDescriptors {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ReconcileError::inconsistent("id 3 bound twice");
        assert_eq!(
            err.to_string(),
            "inconsistent exit descriptors: id 3 bound twice"
        );

        let err = ReconcileError::UnmappedBytecode {
            bytecode_offset: 17,
        };
        assert!(err.to_string().contains("17"));
    }
}
