//! Per-call state: method identity, options, lifecycle events and the
//! cancellation handle.

use crate::{ChannelError, Metadata};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// The shape of a method's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Exactly one response message.
    Unary,
    /// Zero or more response messages.
    ServerStreaming,
}

/// Identifies the remote method a call targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    service: String,
    method: String,
    kind: MethodKind,
}

impl MethodDescriptor {
    /// Describe a unary method, e.g. `("user.UserService", "FetchById")`.
    pub fn unary(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            kind: MethodKind::Unary,
        }
    }

    /// Describe a server-streaming method.
    pub fn server_streaming(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            kind: MethodKind::ServerStreaming,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    /// The `service/method` form used in logs and by transports.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.service, self.method)
    }
}

/// Options applied to a single call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    deadline: Option<Duration>,
    metadata: Metadata,
    compression: Option<String>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the call with [`ChannelError::DeadlineExceeded`] if it has not
    /// completed within `deadline`. Overrides the channel's default.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Initial outgoing metadata for the call.
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Request a compression codec, e.g. `gzip`.
    ///
    /// Accepted and handed to the transport collaborator; the channel core
    /// itself applies no codec.
    pub fn compression(mut self, algorithm: impl Into<String>) -> Self {
        self.compression = Some(algorithm.into());
        self
    }

    pub(crate) fn deadline_value(&self) -> Option<Duration> {
        self.deadline
    }

    pub(crate) fn metadata_value(&self) -> &Metadata {
        &self.metadata
    }

    pub(crate) fn compression_value(&self) -> Option<&String> {
        self.compression.as_ref()
    }
}

/// The terminal outcome of a call as seen by listeners and façades.
pub type CallOutcome = Result<(), ChannelError>;

/// Caller-facing events of one call, in delivery order.
#[derive(Debug)]
pub(crate) enum CallEvent {
    Headers(Metadata),
    Message(Bytes),
    Closed(CallOutcome),
}

/// Handle for cancelling an in-flight call.
///
/// Cancellation fails the call with [`ChannelError::Cancelled`] and
/// instructs the transport to abandon its work. Cancelling a completed
/// call is a no-op.
#[derive(Debug, Clone)]
pub struct CallController {
    inner: Arc<ControllerInner>,
}

#[derive(Debug)]
struct ControllerInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CallController {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Cancel the call. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_one();
        }
    }

    /// Whether [`CallController::cancel`] has been invoked.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the call has been cancelled.
    pub(crate) async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.inner.notify.notified().await;
        }
    }
}

/// A dispatched call: its ordered event queue and cancellation handle.
/// Consumed by exactly one façade.
pub(crate) struct ActiveCall {
    pub(crate) events: mpsc::UnboundedReceiver<CallEvent>,
    pub(crate) controller: CallController,
}
