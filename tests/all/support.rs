//! In-memory resolver and transport used to drive a channel in tests.

use async_trait::async_trait;
use bytes::Bytes;
use canale::{
    DeliveryEvent, Endpoint, Metadata, MethodDescriptor, Resolve, ResponseDelivery, Target,
    Transport, TransportCall, TransportError,
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// A resolver whose address set tests mutate directly.
#[derive(Clone, Default)]
pub struct TestResolver {
    state: Arc<Mutex<ResolverState>>,
}

#[derive(Default)]
struct ResolverState {
    addresses: HashSet<SocketAddr>,
    failing: bool,
    hanging: bool,
}

impl TestResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_address(&self, address: SocketAddr) {
        self.state.lock().unwrap().addresses.insert(address);
    }

    pub fn set_addresses(&self, addresses: impl IntoIterator<Item = SocketAddr>) {
        self.state.lock().unwrap().addresses = addresses.into_iter().collect();
    }

    /// Make every subsequent lookup fail until called again with `false`.
    pub fn fail_lookups(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    /// Make every subsequent lookup hang forever.
    pub fn hang_lookups(&self) {
        self.state.lock().unwrap().hanging = true;
    }
}

#[async_trait]
impl Resolve for TestResolver {
    async fn resolve(&self, _target: &Target) -> Result<HashSet<SocketAddr>, anyhow::Error> {
        let (addresses, failing, hanging) = {
            let state = self.state.lock().unwrap();
            (state.addresses.clone(), state.failing, state.hanging)
        };

        if hanging {
            std::future::pending::<()>().await;
        }
        anyhow::ensure!(!failing, "lookup failed");
        Ok(addresses)
    }
}

/// What a [`ScriptedTransport`] does with each call it receives.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Send headers, `messages` copies of the endpoint address as payload,
    /// then complete.
    Reply { messages: usize },
    /// Keep the call open until [`ScriptedTransport::release_one`], then
    /// reply once and complete.
    Hold,
    /// Fail at connect time.
    FailConnect,
}

#[derive(Debug, Clone)]
pub struct CallRecord {
    pub endpoint: Endpoint,
    pub method: MethodDescriptor,
    pub metadata: Metadata,
}

/// A transport that records every call and answers according to its
/// configured [`Behavior`].
#[derive(Clone)]
pub struct ScriptedTransport {
    behavior: Behavior,
    calls: Arc<Mutex<Vec<CallRecord>>>,
    started: Arc<Notify>,
    release: Arc<Notify>,
}

impl ScriptedTransport {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(Mutex::new(Vec::new())),
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }

    pub fn replying(messages: usize) -> Self {
        Self::new(Behavior::Reply { messages })
    }

    pub fn holding() -> Self {
        Self::new(Behavior::Hold)
    }

    pub fn failing() -> Self {
        Self::new(Behavior::FailConnect)
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().unwrap().clone()
    }

    pub fn picked_endpoints(&self) -> Vec<Endpoint> {
        self.calls().into_iter().map(|call| call.endpoint).collect()
    }

    /// Wait until the transport has received a call.
    pub async fn wait_for_call(&self) {
        self.started.notified().await;
    }

    /// Let one held call reply and complete.
    pub fn release_one(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, call: TransportCall) -> Result<ResponseDelivery, TransportError> {
        self.calls.lock().unwrap().push(CallRecord {
            endpoint: call.endpoint,
            method: call.method.clone(),
            metadata: call.metadata.clone(),
        });
        self.started.notify_one();

        match self.behavior {
            Behavior::FailConnect => Err(TransportError::Connect {
                endpoint: call.endpoint,
                source: std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                ),
            }),
            Behavior::Reply { messages } => {
                let (events, delivery) = ResponseDelivery::channel(8);
                let payload = Bytes::from(call.endpoint.to_string());
                tokio::spawn(async move {
                    let mut headers = Metadata::new();
                    headers.insert("server", call.endpoint.to_string());
                    let _ = events.send(DeliveryEvent::Headers(headers)).await;
                    for _ in 0..messages {
                        let _ = events.send(DeliveryEvent::Message(payload.clone())).await;
                    }
                    let _ = events.send(DeliveryEvent::Closed(Ok(()))).await;
                });
                Ok(delivery)
            }
            Behavior::Hold => {
                let (events, delivery) = ResponseDelivery::channel(8);
                let release = Arc::clone(&self.release);
                let payload = Bytes::from(call.endpoint.to_string());
                tokio::spawn(async move {
                    release.notified().await;
                    let _ = events.send(DeliveryEvent::Message(payload)).await;
                    let _ = events.send(DeliveryEvent::Closed(Ok(()))).await;
                });
                Ok(delivery)
            }
        }
    }
}
