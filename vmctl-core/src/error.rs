/// Errors produced by the `vmctl-core` crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A VM name failed validation.
    #[error("invalid VM name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },
}
