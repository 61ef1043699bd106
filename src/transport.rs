//! The transport collaborator interface.
//!
//! The channel treats "send a call over a selected endpoint and receive a
//! stream of responses" as a primitive supplied by an implementation of
//! [`Transport`]. Wire framing, connection management and payload encoding
//! all live behind this seam.

use crate::{Endpoint, Metadata, MethodDescriptor};
use bytes::Bytes;
use tokio::sync::mpsc;

/// A failure reported by the transport collaborator.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The selected endpoint could not be reached.
    #[error("failed to connect to `{endpoint}`")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    /// The connection went away before the call produced its terminal
    /// outcome.
    #[error("connection closed before the call completed")]
    ConnectionClosed,

    /// The remote service failed the call.
    #[error("remote error: {message}")]
    Remote { message: String },
}

/// Whether the transport should secure the connection.
///
/// Carried as configuration and handed to the [`Transport`] collaborator
/// untouched; securing the wire is the transport's concern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportSecurity {
    #[default]
    Plaintext,
    Tls,
}

/// Everything a transport needs to execute one call attempt.
#[derive(Debug)]
pub struct TransportCall {
    /// The endpoint selected by the load balancer for this attempt.
    pub endpoint: Endpoint,
    /// The method being invoked.
    pub method: MethodDescriptor,
    /// Outgoing metadata, after the interceptor chain has run.
    pub metadata: Metadata,
    /// The opaque request payload.
    pub request: Bytes,
    /// The channel's transport security flag.
    pub security: TransportSecurity,
    /// Requested compression codec, if any. Transports may ignore it.
    pub compression: Option<String>,
}

/// One event on a call's response path.
#[derive(Debug)]
pub enum DeliveryEvent {
    /// Response headers arrived. At most one per call, before any message.
    Headers(Metadata),
    /// One response message arrived.
    Message(Bytes),
    /// The terminal outcome of the call. Exactly one per call, last.
    Closed(Result<(), TransportError>),
}

/// The receiving half of a call's response path.
///
/// Yields zero-or-more [`DeliveryEvent::Headers`]/[`DeliveryEvent::Message`]
/// events followed by exactly one [`DeliveryEvent::Closed`]. Dropping the
/// delivery abandons the call: the transport observes its sending half
/// close and should stop work for the call.
pub struct ResponseDelivery {
    events: mpsc::Receiver<DeliveryEvent>,
}

impl ResponseDelivery {
    /// Create a bounded event channel for one call. The transport keeps the
    /// sender and pushes events; the channel core consumes the delivery.
    pub fn channel(buffer: usize) -> (mpsc::Sender<DeliveryEvent>, ResponseDelivery) {
        let (sender, events) = mpsc::channel(buffer);
        (sender, ResponseDelivery { events })
    }

    /// The next event, or `None` once the transport dropped the sender.
    pub async fn recv(&mut self) -> Option<DeliveryEvent> {
        self.events.recv().await
    }
}

/// Executes call attempts against concrete endpoints.
///
/// Implementations are shared across all concurrent calls of a channel.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Execute one call attempt against `call.endpoint`.
    ///
    /// A connection-level failure is reported as `Err`; failures after the
    /// call is underway flow through the delivery as
    /// [`DeliveryEvent::Closed`].
    async fn execute(&self, call: TransportCall) -> Result<ResponseDelivery, TransportError>;
}
