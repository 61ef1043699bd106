//! `canale` offers a client-side channel to a named service, using a
//! pluggable service discovery to periodically update the active set of
//! endpoints and a load balancing policy to spread calls across them.
//!
//! Calls pass through a composable interceptor chain and reach the wire
//! via a [`Transport`] collaborator supplied at channel construction; the
//! crate itself carries no wire protocol. Three façades consume the same
//! dispatch pipeline: [`BlockingStub`] suspends the caller, [`AsyncStub`]
//! pushes events to an observer, and [`FutureStub`] returns a
//! single-assignment [`ResponseFuture`].
//!
//! # Simple example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use bytes::Bytes;
//! use canale::{
//!     CallOptions, Channel, DeliveryEvent, MethodDescriptor, ResponseDelivery, Transport,
//!     TransportCall, TransportError,
//! };
//!
//! // A transport that answers every call with its own request payload.
//! struct EchoTransport;
//!
//! #[async_trait]
//! impl Transport for EchoTransport {
//!     async fn execute(&self, call: TransportCall) -> Result<ResponseDelivery, TransportError> {
//!         let (events, delivery) = ResponseDelivery::channel(4);
//!         tokio::spawn(async move {
//!             let _ = events.send(DeliveryEvent::Message(call.request)).await;
//!             let _ = events.send(DeliveryEvent::Closed(Ok(()))).await;
//!         });
//!         Ok(delivery)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     // `dns:///` targets are re-resolved periodically and calls are
//!     // spread round-robin over the resolved endpoints.
//!     let channel = Channel::builder("dns:///my.service:5000")
//!         .connect(EchoTransport)
//!         .await
//!         .expect("failed to construct channel");
//!
//!     let response = channel
//!         .blocking_stub()
//!         .unary(
//!             MethodDescriptor::unary("user.UserService", "FetchById"),
//!             CallOptions::new(),
//!             Bytes::from_static(b"5"),
//!         )
//!         .await;
//! }
//! ```
//!
//! # Interceptors, deadlines and shutdown
//!
//! ```rust,no_run
//! # use async_trait::async_trait;
//! # use bytes::Bytes;
//! # use canale::{
//! #     CallOptions, Channel, DeliveryEvent, MethodDescriptor, ResponseDelivery, Transport,
//! #     TransportCall, TransportError,
//! # };
//! # struct EchoTransport;
//! # #[async_trait]
//! # impl Transport for EchoTransport {
//! #     async fn execute(&self, call: TransportCall) -> Result<ResponseDelivery, TransportError> {
//! #         let (events, delivery) = ResponseDelivery::channel(4);
//! #         tokio::spawn(async move {
//! #             let _ = events.send(DeliveryEvent::Message(call.request)).await;
//! #             let _ = events.send(DeliveryEvent::Closed(Ok(()))).await;
//! #         });
//! #         Ok(delivery)
//! #     }
//! # }
//! use canale::{ResolutionStrategy, TracingInterceptor};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let channel = Channel::builder(("localhost", 5000))
//!         .intercept(TracingInterceptor)
//!         .default_deadline(Duration::from_secs(5))
//!         .resolution_strategy(ResolutionStrategy::Eager {
//!             timeout: Duration::from_secs(10),
//!         })
//!         .connect(EchoTransport)
//!         .await
//!         .expect("failed to construct channel");
//!
//!     // Let in-flight calls finish, then observe termination.
//!     channel.shutdown();
//!     channel.closed().await;
//! }
//! ```
//!
//! # Internals
//!
//! The channel owns a background resolution probe which is the only writer
//! of the endpoint set; it publishes immutable snapshots through a watch
//! channel that pick paths read without blocking. A failed re-resolution
//! keeps the previous snapshot, so a reachable set never disappears
//! because of a flaky lookup.

mod balance;
mod call;
mod channel;
mod endpoint;
mod error;
mod interceptor;
mod metadata;
mod probe;
mod resolver;
mod stub;
mod target;
mod transport;

pub use balance::*;
pub use call::{CallController, CallOptions, CallOutcome, MethodDescriptor, MethodKind};
pub use channel::*;
pub use endpoint::*;
pub use error::*;
pub use interceptor::{
    BoxListener, CallListener, InterceptError, Interceptor, TracingInterceptor,
};
pub use metadata::*;
pub use resolver::*;
pub use stub::*;
pub use target::*;
pub use transport::*;
