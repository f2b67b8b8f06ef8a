use thiserror::Error;

/// Errors reported by [`CbTree`](crate::CbTree).
///
/// A missing key is not an error: lookups and removals report it as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// The node allocator could not provide memory for a new node. The
    /// operation that hit it was rolled back and nothing was published.
    #[error("failed to allocate a tree node of {bytes} bytes")]
    AllocationFailure { bytes: usize },

    /// Reported by [`CbTree::validate`](crate::CbTree::validate) when the
    /// ordering, size or balance invariant does not hold.
    #[error("tree invariant violated: {reason}")]
    InvariantViolation { reason: String },
}

pub type Result<T> = std::result::Result<T, TreeError>;

impl TreeError {
    pub(crate) fn violation(reason: impl Into<String>) -> Self {
        TreeError::InvariantViolation {
            reason: reason.into(),
        }
    }
}
