//! The error taxonomy surfaced to callers of a [`Channel`](crate::Channel).

use crate::transport::TransportError;

/// Every way a call or a channel build can fail.
///
/// Resolution failures never appear here: the channel retains the previous
/// endpoint set and retries on the next probe tick. Only a set that has
/// *never* been populated surfaces as [`ChannelError::NoEndpoints`].
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The channel could not be built, e.g. a malformed target or a failed
    /// eager resolution. Surfaced before any call is attempted.
    #[error("invalid channel configuration: {0}")]
    Configuration(String),

    /// No endpoint is available for the target.
    #[error("no endpoints available for the target")]
    NoEndpoints,

    /// The call was issued on a shutting-down or terminated channel.
    #[error("channel is shutting down")]
    ChannelShutdown,

    /// The call was cancelled, either explicitly or by a forced shutdown.
    #[error("call was cancelled")]
    Cancelled,

    /// The call did not complete within its deadline.
    #[error("call deadline exceeded")]
    DeadlineExceeded,

    /// The transport collaborator failed to execute the call.
    #[error("transport failure")]
    Transport(#[from] TransportError),

    /// An interceptor short-circuited the call before it reached the
    /// transport.
    #[error("call rejected by interceptor: {0}")]
    InterceptorRejected(String),
}

impl ChannelError {
    /// Whether the error is terminal for the channel rather than the call.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, ChannelError::ChannelShutdown)
    }
}
