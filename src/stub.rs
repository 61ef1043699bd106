//! The three call façades over the channel's shared dispatch primitive.
//! They differ only in how the caller is notified of results.

use crate::call::{ActiveCall, CallEvent};
use crate::{
    CallController, CallOptions, Channel, ChannelError, Metadata, MethodDescriptor,
    TransportError,
};
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Calls whose results the caller awaits in place.
#[derive(Debug, Clone)]
pub struct BlockingStub {
    channel: Channel,
}

impl BlockingStub {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    /// Issue a unary call and suspend until its single response arrives.
    pub async fn unary(
        &self,
        method: MethodDescriptor,
        options: CallOptions,
        request: Bytes,
    ) -> Result<Bytes, ChannelError> {
        let mut call = self.channel.dispatch(method, options, request)?;
        let mut response = None;

        while let Some(event) = call.events.recv().await {
            match event {
                CallEvent::Headers(_) => {}
                CallEvent::Message(message) => {
                    if response.is_none() {
                        response = Some(message);
                    }
                }
                CallEvent::Closed(Ok(())) => {
                    return response
                        .ok_or(ChannelError::Transport(TransportError::ConnectionClosed));
                }
                CallEvent::Closed(Err(err)) => return Err(err),
            }
        }

        Err(ChannelError::Transport(TransportError::ConnectionClosed))
    }

    /// Issue a server-streaming call. The returned stream is lazy: the
    /// caller consumes responses by pulling.
    pub fn server_streaming(
        &self,
        method: MethodDescriptor,
        options: CallOptions,
        request: Bytes,
    ) -> Result<ResponseStream, ChannelError> {
        let call = self.channel.dispatch(method, options, request)?;
        Ok(ResponseStream {
            call,
            headers: None,
            finished: false,
        })
    }
}

/// A pull-based sequence of response messages from one streaming call.
///
/// Dropping the stream before its end cancels the call.
pub struct ResponseStream {
    call: ActiveCall,
    headers: Option<Metadata>,
    finished: bool,
}

impl ResponseStream {
    /// The next response message; `Ok(None)` once the stream completed.
    /// After a terminal event has been returned, further polls yield
    /// `Ok(None)`.
    pub async fn message(&mut self) -> Result<Option<Bytes>, ChannelError> {
        if self.finished {
            return Ok(None);
        }

        while let Some(event) = self.call.events.recv().await {
            match event {
                CallEvent::Headers(headers) => self.headers = Some(headers),
                CallEvent::Message(message) => return Ok(Some(message)),
                CallEvent::Closed(Ok(())) => {
                    self.finished = true;
                    return Ok(None);
                }
                CallEvent::Closed(Err(err)) => {
                    self.finished = true;
                    return Err(err);
                }
            }
        }

        self.finished = true;
        Ok(None)
    }

    /// The response headers, once observed.
    pub fn headers(&self) -> Option<&Metadata> {
        self.headers.as_ref()
    }

    /// Cancel the call; pending and future [`ResponseStream::message`]
    /// calls fail with [`ChannelError::Cancelled`].
    pub fn cancel(&self) {
        self.call.controller.cancel();
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        if !self.finished {
            self.call.controller.cancel();
        }
    }
}

/// Caller-supplied handlers for the asynchronous façade.
///
/// For each call the handlers are invoked by the channel's delivery task
/// in strict order: zero-or-more `on_message` calls, then exactly one
/// terminal call to either `on_error` or `on_completed` — never both,
/// never more than once.
pub trait ResponseObserver: Send + 'static {
    /// Invoked before any message flows, exposing the call's controller
    /// for cancellation.
    fn before_start(&mut self, controller: &CallController) {
        let _ = controller;
    }

    fn on_message(&mut self, message: Bytes);

    fn on_error(&mut self, error: ChannelError);

    fn on_completed(&mut self);
}

/// Calls whose results are pushed to a [`ResponseObserver`]; the caller is
/// never suspended.
#[derive(Debug, Clone)]
pub struct AsyncStub {
    channel: Channel,
}

impl AsyncStub {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    /// Issue a call and return immediately. Results are delivered to
    /// `observer` from a separate task; a dispatch failure is delivered as
    /// `on_error` without a preceding `before_start`.
    pub fn call<O: ResponseObserver>(
        &self,
        method: MethodDescriptor,
        options: CallOptions,
        request: Bytes,
        mut observer: O,
    ) {
        let mut call = match self.channel.dispatch(method, options, request) {
            Ok(call) => call,
            Err(err) => {
                observer.on_error(err);
                return;
            }
        };

        observer.before_start(&call.controller);

        tokio::spawn(async move {
            while let Some(event) = call.events.recv().await {
                match event {
                    CallEvent::Headers(_) => {}
                    CallEvent::Message(message) => observer.on_message(message),
                    CallEvent::Closed(Ok(())) => {
                        observer.on_completed();
                        return;
                    }
                    CallEvent::Closed(Err(err)) => {
                        observer.on_error(err);
                        return;
                    }
                }
            }
            observer.on_error(ChannelError::Transport(TransportError::ConnectionClosed));
        });
    }
}

/// Unary calls returning a single-assignment [`ResponseFuture`].
#[derive(Debug, Clone)]
pub struct FutureStub {
    channel: Channel,
}

impl FutureStub {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    /// Issue a unary call and return a future resolving to its single
    /// response. The future resolves or rejects exactly once.
    pub fn unary(
        &self,
        method: MethodDescriptor,
        options: CallOptions,
        request: Bytes,
    ) -> ResponseFuture {
        let (resolve, resolution) = oneshot::channel();

        let controller = match self.channel.dispatch(method, options, request) {
            Ok(mut call) => {
                let controller = call.controller.clone();
                tokio::spawn(async move {
                    let mut response = None;
                    while let Some(event) = call.events.recv().await {
                        match event {
                            CallEvent::Headers(_) => {}
                            CallEvent::Message(message) => {
                                if response.is_none() {
                                    response = Some(message);
                                }
                            }
                            CallEvent::Closed(Ok(())) => {
                                let _ = resolve.send(response.ok_or(ChannelError::Transport(
                                    TransportError::ConnectionClosed,
                                )));
                                return;
                            }
                            CallEvent::Closed(Err(err)) => {
                                let _ = resolve.send(Err(err));
                                return;
                            }
                        }
                    }
                    let _ = resolve
                        .send(Err(ChannelError::Transport(TransportError::ConnectionClosed)));
                });
                controller
            }
            Err(err) => {
                let _ = resolve.send(Err(err));
                CallController::new()
            }
        };

        ResponseFuture {
            resolution,
            controller,
        }
    }
}

/// The pending result of a unary call issued through [`FutureStub`].
///
/// Await it for blocking retrieval; resolution happens at most once.
#[derive(Debug)]
pub struct ResponseFuture {
    resolution: oneshot::Receiver<Result<Bytes, ChannelError>>,
    controller: CallController,
}

impl ResponseFuture {
    /// Cancel the call; the future rejects with
    /// [`ChannelError::Cancelled`].
    pub fn cancel(&self) {
        self.controller.cancel();
    }
}

impl Future for ResponseFuture {
    type Output = Result<Bytes, ChannelError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().resolution)
            .poll(cx)
            .map(|resolved| match resolved {
                Ok(result) => result,
                Err(_) => Err(ChannelError::Cancelled),
            })
    }
}
