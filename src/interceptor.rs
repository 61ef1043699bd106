//! The interceptor chain: composable wrappers observing and rewriting a
//! call's metadata and lifecycle events.

use crate::{CallOutcome, ChannelError, Metadata, MethodDescriptor};
use bytes::Bytes;
use std::sync::Arc;

/// An interceptor's reason for short-circuiting a call.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct InterceptError {
    message: String,
}

impl InterceptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Observes a call's response path.
///
/// Events arrive in delivery order: at most one `on_headers`, zero or more
/// `on_message`, then exactly one `on_close`, always last. A wrapper must
/// forward each event inward at most once, preserving message order.
pub trait CallListener: Send {
    fn on_headers(&mut self, headers: Metadata);
    fn on_message(&mut self, message: Bytes);
    fn on_close(&mut self, outcome: CallOutcome);
}

/// A boxed [`CallListener`], the currency of listener wrapping.
pub type BoxListener = Box<dyn CallListener>;

/// A composable wrapper around a call's lifecycle.
///
/// The outgoing stage runs once per call in configured order, before the
/// transport is contacted, and may rewrite the outgoing metadata or reject
/// the call. The response path is observed by wrapping the listener handed
/// to [`Interceptor::wrap_listener`]; completion events reach wrappers in
/// reverse configured order.
///
/// Interceptors are shared across all concurrent calls of a channel; any
/// state they carry is their own responsibility to synchronize.
pub trait Interceptor: Send + Sync + 'static {
    /// The outgoing stage. Returning an error fails the call with
    /// [`ChannelError::InterceptorRejected`] without contacting the
    /// transport.
    fn on_call(
        &self,
        method: &MethodDescriptor,
        metadata: &mut Metadata,
    ) -> Result<(), InterceptError> {
        let _ = (method, metadata);
        Ok(())
    }

    /// Wrap the listener observing the response path. The default leaves
    /// the listener untouched.
    fn wrap_listener(&self, next: BoxListener) -> BoxListener {
        next
    }
}

/// The ordered interceptors of a channel, composed once at build time.
///
/// Interceptor 0 is outermost: first on the outgoing path, last to observe
/// response events.
#[derive(Clone)]
pub(crate) struct InterceptorChain {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
}

impl InterceptorChain {
    pub(crate) fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            interceptors: interceptors.into(),
        }
    }

    /// Run every outgoing stage in configured order.
    pub(crate) fn apply_outbound(
        &self,
        method: &MethodDescriptor,
        metadata: &mut Metadata,
    ) -> Result<(), ChannelError> {
        for interceptor in self.interceptors.iter() {
            interceptor
                .on_call(method, metadata)
                .map_err(|err| ChannelError::InterceptorRejected(err.to_string()))?;
        }
        Ok(())
    }

    /// Wrap `terminal` so that response events traverse the chain inward,
    /// reaching interceptor 0 last.
    pub(crate) fn wrap(&self, terminal: BoxListener) -> BoxListener {
        let mut listener = terminal;
        for interceptor in self.interceptors.iter() {
            listener = interceptor.wrap_listener(listener);
        }
        listener
    }
}

/// Logs outgoing metadata and received headers at `info` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingInterceptor;

impl Interceptor for TracingInterceptor {
    fn on_call(
        &self,
        method: &MethodDescriptor,
        metadata: &mut Metadata,
    ) -> Result<(), InterceptError> {
        tracing::info!(method = %method.full_name(), ?metadata, "sending call headers");
        Ok(())
    }

    fn wrap_listener(&self, next: BoxListener) -> BoxListener {
        Box::new(TracingListener { inner: next })
    }
}

struct TracingListener {
    inner: BoxListener,
}

impl CallListener for TracingListener {
    fn on_headers(&mut self, headers: Metadata) {
        tracing::info!(?headers, "received call headers");
        self.inner.on_headers(headers);
    }

    fn on_message(&mut self, message: Bytes) {
        self.inner.on_message(message);
    }

    fn on_close(&mut self, outcome: CallOutcome) {
        if let Err(err) = &outcome {
            tracing::debug!(error = %err, "call closed with error");
        }
        self.inner.on_close(outcome);
    }
}
