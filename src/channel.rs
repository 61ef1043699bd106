//! Provides the builder and implementation of [`Channel`]: target
//! resolution, endpoint selection, the interceptor chain and call dispatch
//! over one shared transport.

use crate::probe::{ProbeSchedule, ResolutionProbe};
use crate::stub::{AsyncStub, BlockingStub, FutureStub, ResponseFuture};
use crate::{
    BalancePolicy, CallController, CallOptions, ChannelError, DnsResolver, EndpointSet,
    Interceptor, LoadBalance, Metadata, MethodDescriptor, Resolve, ResolutionKind, StaticResolver,
    Target, Transport, TransportCall, TransportError, TransportSecurity,
};
use crate::call::{ActiveCall, CallEvent, CallOutcome};
use crate::interceptor::{BoxListener, CallListener, InterceptorChain};
use crate::transport::DeliveryEvent;
use bytes::Bytes;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

// Default interval between endpoint re-resolutions for dynamic targets.
const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// The lifecycle state of a [`Channel`]. Transitions are one-directional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Accepting new calls.
    Active,
    /// A graceful shutdown was requested; in-flight calls may complete, new
    /// calls fail fast.
    ShuttingDown,
    /// No in-flight calls remain; the resolution probe is stopped and no
    /// further calls are issued.
    Terminated,
}

/// Enumerates the different resolution timings the [`ChannelBuilder`]
/// supports.
pub enum ResolutionStrategy {
    /// Creates the channel without attempting to resolve a set of initial
    /// endpoints.
    Lazy,
    /// Tries to resolve the target before creating the channel in order to
    /// start with a non-empty set of endpoints. If resolution does not
    /// complete within `timeout`, channel creation fails.
    Eager { timeout: Duration },
}

struct Lifecycle {
    state: ChannelState,
    in_flight: usize,
}

struct ChannelCore {
    target: Target,
    balancer: Arc<dyn LoadBalance>,
    chain: InterceptorChain,
    transport: Arc<dyn Transport>,
    endpoints: watch::Receiver<EndpointSet>,
    security: TransportSecurity,
    default_deadline: Option<Duration>,
    lifecycle: Mutex<Lifecycle>,
    /// Flips to `true` exactly once, on forced shutdown.
    forced: watch::Sender<bool>,
    closed: Notify,
    probe_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelCore {
    fn finish_termination(&self) {
        if let Some(handle) = self.probe_task.lock().unwrap().take() {
            handle.abort();
        }
        self.closed.notify_waiters();
    }
}

/// A logical, load balanced connection to a [`Target`], abstracting over
/// its changing physical endpoints.
///
/// Cloning a `Channel` is cheap; clones share the endpoint set, the
/// interceptor chain and the lifecycle state.
#[derive(Clone)]
pub struct Channel {
    core: Arc<ChannelCore>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("target", &self.core.target)
            .field("state", &self.state())
            .finish()
    }
}

impl Channel {
    /// Start configuring a `Channel` by passing in the target of the
    /// service you want to call, e.g. `"dns:///my.service:5000"` or
    /// `("localhost", 5000)`.
    pub fn builder<S>(target: S) -> ChannelBuilder<DnsResolver, S>
    where
        S: TryInto<Target> + Send + Sync + 'static,
        S::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send + Sync,
    {
        ChannelBuilder::new(target)
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.core.lifecycle.lock().unwrap().state
    }

    /// The latest published endpoint set snapshot.
    pub fn endpoints(&self) -> EndpointSet {
        self.core.endpoints.borrow().clone()
    }

    /// Request a graceful shutdown: in-flight calls may complete, new calls
    /// fail fast with [`ChannelError::ChannelShutdown`]. The channel
    /// reaches [`ChannelState::Terminated`] once the last in-flight call
    /// completes.
    pub fn shutdown(&self) {
        let mut lifecycle = self.core.lifecycle.lock().unwrap();
        if lifecycle.state != ChannelState::Active {
            return;
        }
        if lifecycle.in_flight == 0 {
            lifecycle.state = ChannelState::Terminated;
            drop(lifecycle);
            self.core.finish_termination();
        } else {
            lifecycle.state = ChannelState::ShuttingDown;
        }
    }

    /// Shut down immediately, cancelling in-flight calls with
    /// [`ChannelError::Cancelled`].
    pub fn shutdown_now(&self) {
        {
            let mut lifecycle = self.core.lifecycle.lock().unwrap();
            if lifecycle.state == ChannelState::Terminated {
                return;
            }
            lifecycle.state = ChannelState::Terminated;
        }
        // send_replace updates the flag even when no call is subscribed
        // yet; a dispatch racing the shutdown still observes it.
        self.core.forced.send_replace(true);
        self.core.finish_termination();
    }

    /// Resolves once the channel has reached [`ChannelState::Terminated`].
    pub async fn closed(&self) {
        loop {
            let notified = self.core.closed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state() == ChannelState::Terminated {
                return;
            }
            notified.await;
        }
    }

    /// The blocking call façade: the caller suspends until results arrive.
    pub fn blocking_stub(&self) -> BlockingStub {
        BlockingStub::new(self.clone())
    }

    /// The asynchronous call façade: results are pushed to an observer.
    pub fn async_stub(&self) -> AsyncStub {
        AsyncStub::new(self.clone())
    }

    /// The future-based call façade for unary calls.
    pub fn future_stub(&self) -> FutureStub {
        FutureStub::new(self.clone())
    }

    /// The shared dispatch primitive underneath all three façades.
    ///
    /// Fails fast with [`ChannelError::ChannelShutdown`] on a shutting-down
    /// channel. All other failures are delivered through the returned
    /// call's event queue, after traversing the interceptor listeners.
    pub(crate) fn dispatch(
        &self,
        method: MethodDescriptor,
        options: CallOptions,
        request: Bytes,
    ) -> Result<ActiveCall, ChannelError> {
        let permit = self.try_admit()?;

        let controller = CallController::new();
        let (events, queue) = mpsc::unbounded_channel();
        let mut listener = self.core.chain.wrap(Box::new(DispatchListener { events }));
        let active = ActiveCall {
            events: queue,
            controller: controller.clone(),
        };

        let mut metadata = options.metadata_value().clone();
        if let Err(err) = self.core.chain.apply_outbound(&method, &mut metadata) {
            listener.on_close(Err(err));
            drop(permit);
            return Ok(active);
        }

        let endpoint = {
            let snapshot = self.core.endpoints.borrow().clone();
            match self.core.balancer.pick(&snapshot) {
                Ok(endpoint) => endpoint,
                Err(err) => {
                    listener.on_close(Err(err));
                    drop(permit);
                    return Ok(active);
                }
            }
        };
        tracing::debug!(method = %method.full_name(), %endpoint, "dispatching call");

        let call = TransportCall {
            endpoint,
            method,
            metadata,
            request,
            security: self.core.security,
            compression: options.compression_value().cloned(),
        };
        let deadline = options.deadline_value().or(self.core.default_deadline);
        let transport = Arc::clone(&self.core.transport);
        let forced = self.core.forced.subscribe();

        tokio::spawn(async move {
            // Held until the terminal event has been delivered; releasing
            // it may complete a graceful shutdown.
            let _permit = permit;
            let outcome = drive(transport, call, &mut listener, deadline, forced, &controller).await;
            listener.on_close(outcome);
        });

        Ok(active)
    }

    fn try_admit(&self) -> Result<CallPermit, ChannelError> {
        let mut lifecycle = self.core.lifecycle.lock().unwrap();
        if lifecycle.state != ChannelState::Active {
            return Err(ChannelError::ChannelShutdown);
        }
        lifecycle.in_flight += 1;
        Ok(CallPermit {
            core: Arc::clone(&self.core),
        })
    }
}

/// Counts one in-flight call; released when its terminal event has been
/// delivered. The last release during a graceful shutdown terminates the
/// channel.
struct CallPermit {
    core: Arc<ChannelCore>,
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        let mut lifecycle = self.core.lifecycle.lock().unwrap();
        lifecycle.in_flight -= 1;
        if lifecycle.state == ChannelState::ShuttingDown && lifecycle.in_flight == 0 {
            lifecycle.state = ChannelState::Terminated;
            drop(lifecycle);
            self.core.finish_termination();
        }
    }
}

/// The innermost listener: hands events to the façade consuming the call.
struct DispatchListener {
    events: mpsc::UnboundedSender<CallEvent>,
}

impl CallListener for DispatchListener {
    fn on_headers(&mut self, headers: Metadata) {
        let _ = self.events.send(CallEvent::Headers(headers));
    }

    fn on_message(&mut self, message: Bytes) {
        let _ = self.events.send(CallEvent::Message(message));
    }

    fn on_close(&mut self, outcome: CallOutcome) {
        let _ = self.events.send(CallEvent::Closed(outcome));
    }
}

/// Execute the transport call and forward delivery events through the
/// interceptor listeners, enforcing deadline, cancellation and forced
/// shutdown. Returns the call's terminal outcome, exactly once.
async fn drive(
    transport: Arc<dyn Transport>,
    call: TransportCall,
    listener: &mut BoxListener,
    deadline: Option<Duration>,
    mut forced: watch::Receiver<bool>,
    controller: &CallController,
) -> CallOutcome {
    if *forced.borrow() {
        return Err(ChannelError::Cancelled);
    }

    let deadline_expired = async {
        match deadline {
            Some(deadline) => tokio::time::sleep(deadline).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline_expired);

    let execute = transport.execute(call);
    tokio::pin!(execute);

    let mut delivery = tokio::select! {
        _ = controller.cancelled() => return Err(ChannelError::Cancelled),
        _ = forced.changed() => return Err(ChannelError::Cancelled),
        _ = &mut deadline_expired => return Err(ChannelError::DeadlineExceeded),
        result = &mut execute => match result {
            Ok(delivery) => delivery,
            Err(err) => return Err(ChannelError::Transport(err)),
        },
    };

    loop {
        tokio::select! {
            _ = controller.cancelled() => return Err(ChannelError::Cancelled),
            _ = forced.changed() => return Err(ChannelError::Cancelled),
            _ = &mut deadline_expired => return Err(ChannelError::DeadlineExceeded),
            event = delivery.recv() => match event {
                Some(DeliveryEvent::Headers(headers)) => listener.on_headers(headers),
                Some(DeliveryEvent::Message(message)) => listener.on_message(message),
                Some(DeliveryEvent::Closed(Ok(()))) => return Ok(()),
                Some(DeliveryEvent::Closed(Err(err))) => return Err(ChannelError::Transport(err)),
                // The transport dropped its sender without a terminal event.
                None => return Err(ChannelError::Transport(TransportError::ConnectionClosed)),
            },
        }
    }
}

/// A unary call expressed as a [`tower_service::Service`] request.
#[derive(Debug)]
pub struct UnaryRequest {
    pub method: MethodDescriptor,
    pub options: CallOptions,
    pub payload: Bytes,
}

impl tower_service::Service<UnaryRequest> for Channel {
    type Response = Bytes;
    type Error = ChannelError;
    type Future = ResponseFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match self.state() {
            ChannelState::Active => Poll::Ready(Ok(())),
            _ => Poll::Ready(Err(ChannelError::ChannelShutdown)),
        }
    }

    fn call(&mut self, request: UnaryRequest) -> Self::Future {
        self.future_stub()
            .unary(request.method, request.options, request.payload)
    }
}

/// Builder to configure and create a [`Channel`].
pub struct ChannelBuilder<T, S> {
    target: S,
    resolver: Option<T>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    balance_policy: Option<BalancePolicy>,
    balancer_override: Option<Arc<dyn LoadBalance>>,
    probe_interval: Option<Duration>,
    resolution_strategy: ResolutionStrategy,
    default_deadline: Option<Duration>,
    security: TransportSecurity,
}

impl<S> ChannelBuilder<DnsResolver, S>
where
    S: TryInto<Target> + 'static,
    S::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send + Sync,
{
    /// Set the [`Target`] of the service the channel connects to.
    pub fn new(target: S) -> ChannelBuilder<DnsResolver, S> {
        Self {
            target,
            resolver: None,
            interceptors: Vec::new(),
            balance_policy: None,
            balancer_override: None,
            probe_interval: None,
            resolution_strategy: ResolutionStrategy::Lazy,
            default_deadline: None,
            security: TransportSecurity::Plaintext,
        }
    }

    /// Set a custom [`Resolve`] implementation.
    pub fn resolver<T: Resolve + Send + Sync + 'static>(
        self,
        resolver: T,
    ) -> ChannelBuilder<T, S> {
        ChannelBuilder {
            target: self.target,
            resolver: Some(resolver),
            interceptors: self.interceptors,
            balance_policy: self.balance_policy,
            balancer_override: self.balancer_override,
            probe_interval: self.probe_interval,
            resolution_strategy: self.resolution_strategy,
            default_deadline: self.default_deadline,
            security: self.security,
        }
    }
}

impl<T: Resolve + Send + Sync + 'static, S> ChannelBuilder<T, S>
where
    S: TryInto<Target> + 'static,
    S::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send + Sync,
{
    /// Append an interceptor to the chain. Interceptors run in the order
    /// they were added; the chain is fixed once the channel is built.
    pub fn intercept<I: Interceptor>(mut self, interceptor: I) -> ChannelBuilder<T, S> {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Select a built-in load balancing policy.
    ///
    /// Defaults to [`BalancePolicy::SingleEndpoint`] for static targets and
    /// [`BalancePolicy::RoundRobin`] for dynamic ones.
    pub fn balance_policy(self, policy: BalancePolicy) -> ChannelBuilder<T, S> {
        Self {
            balance_policy: Some(policy),
            ..self
        }
    }

    /// Plug in a custom [`LoadBalance`] implementation, overriding
    /// [`ChannelBuilder::balance_policy`].
    pub fn load_balance<L: LoadBalance>(self, balancer: L) -> ChannelBuilder<T, S> {
        Self {
            balancer_override: Some(Arc::new(balancer)),
            ..self
        }
    }

    /// Set how often the channel should probe for changes to the resolved
    /// endpoints. Default interval in seconds is 10.
    pub fn probe_interval(self, interval: Duration) -> ChannelBuilder<T, S> {
        Self {
            probe_interval: Some(interval),
            ..self
        }
    }

    /// Set the [`ResolutionStrategy`].
    ///
    /// Default set to [`ResolutionStrategy::Lazy`].
    pub fn resolution_strategy(
        self,
        resolution_strategy: ResolutionStrategy,
    ) -> ChannelBuilder<T, S> {
        Self {
            resolution_strategy,
            ..self
        }
    }

    /// Set a deadline applied to every call that does not carry its own.
    pub fn default_deadline(self, deadline: Duration) -> ChannelBuilder<T, S> {
        Self {
            default_deadline: Some(deadline),
            ..self
        }
    }

    /// Set the transport security flag handed to the transport
    /// collaborator. Defaults to [`TransportSecurity::Plaintext`].
    pub fn transport_security(self, security: TransportSecurity) -> ChannelBuilder<T, S> {
        Self { security, ..self }
    }

    /// Validate the configuration, start the resolution probe and
    /// construct a [`Channel`] dispatching over `transport`.
    pub async fn connect<X: Transport>(self, transport: X) -> Result<Channel, ChannelError> {
        let target: Target = self
            .target
            .try_into()
            .map_err(|err| ChannelError::Configuration(err.into().to_string()))?;

        let resolver: Box<dyn Resolve> = match self.resolver {
            Some(resolver) => Box::new(resolver),
            None => match target.kind() {
                ResolutionKind::Static => Box::new(StaticResolver),
                ResolutionKind::Dynamic => {
                    Box::new(DnsResolver::from_system_config().await.map_err(|err| {
                        ChannelError::Configuration(format!(
                            "failed to initialize dns resolver: {err:#}"
                        ))
                    })?)
                }
            },
        };

        let balancer = match self.balancer_override {
            Some(balancer) => balancer,
            None => self
                .balance_policy
                .unwrap_or(match target.kind() {
                    ResolutionKind::Static => BalancePolicy::SingleEndpoint,
                    ResolutionKind::Dynamic => BalancePolicy::RoundRobin,
                })
                .build(),
        };

        let schedule = match target.kind() {
            ResolutionKind::Static => ProbeSchedule::Once,
            ResolutionKind::Dynamic => ProbeSchedule::Periodic(
                self.probe_interval.unwrap_or(DEFAULT_PROBE_INTERVAL),
            ),
        };

        let (reporter, endpoints) = watch::channel(EndpointSet::empty());
        let mut probe = ResolutionProbe::new(target.clone(), resolver, schedule, reporter);

        if let ResolutionStrategy::Eager { timeout } = self.resolution_strategy {
            // Make sure we resolve the target once before we create the
            // channel.
            tokio::time::timeout(timeout, probe.probe_once())
                .await
                .map_err(|_| {
                    ChannelError::Configuration(
                        "timed out while attempting to resolve initial endpoints".into(),
                    )
                })?
                .map_err(|err| {
                    ChannelError::Configuration(format!(
                        "failed to resolve initial endpoints: {err:#}"
                    ))
                })?;
        }

        let probe_task = tokio::spawn(probe.probe());
        let (forced, _) = watch::channel(false);

        Ok(Channel {
            core: Arc::new(ChannelCore {
                target,
                balancer,
                chain: InterceptorChain::new(self.interceptors),
                transport: Arc::new(transport),
                endpoints,
                security: self.security,
                default_deadline: self.default_deadline,
                lifecycle: Mutex::new(Lifecycle {
                    state: ChannelState::Active,
                    in_flight: 0,
                }),
                forced,
                closed: Notify::new(),
                probe_task: Mutex::new(Some(probe_task)),
            }),
        })
    }
}

const _: () = {
    const fn assert_is_send<T: Send>() {}
    assert_is_send::<Channel>();
    assert_is_send::<ChannelBuilder<DnsResolver, Target>>();
};
