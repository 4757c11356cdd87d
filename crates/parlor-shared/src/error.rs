use thiserror::Error;

/// Reasons an inbound request is rejected before touching any state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing sender")]
    MissingSender,

    #[error("message needs a recipient or a group")]
    MissingTarget,

    #[error("message cannot have both a recipient and a group")]
    AmbiguousTarget,

    #[error("message has no content or media")]
    EmptyMessage,

    #[error("missing recipient")]
    MissingRecipient,
}
