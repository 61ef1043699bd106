use crate::support::{addr, ScriptedTransport, TestResolver};
use bytes::Bytes;
use canale::{
    BoxListener, CallListener, CallOptions, CallOutcome, Channel, ChannelError, InterceptError,
    Interceptor, Metadata, MethodDescriptor, ResolutionStrategy, Transport,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn ping() -> MethodDescriptor {
    MethodDescriptor::unary("test.Tester", "Ping")
}

/// Appends a line to a shared log for its outgoing stage and every
/// response event it observes.
struct Recording {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Recording {
    fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name,
            log: Arc::clone(log),
        }
    }
}

impl Interceptor for Recording {
    fn on_call(
        &self,
        _method: &MethodDescriptor,
        _metadata: &mut Metadata,
    ) -> Result<(), InterceptError> {
        self.log.lock().unwrap().push(format!("out:{}", self.name));
        Ok(())
    }

    fn wrap_listener(&self, next: BoxListener) -> BoxListener {
        Box::new(RecordingListener {
            name: self.name,
            log: Arc::clone(&self.log),
            inner: next,
        })
    }
}

struct RecordingListener {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    inner: BoxListener,
}

impl CallListener for RecordingListener {
    fn on_headers(&mut self, headers: Metadata) {
        self.log
            .lock()
            .unwrap()
            .push(format!("headers:{}", self.name));
        self.inner.on_headers(headers);
    }

    fn on_message(&mut self, message: Bytes) {
        self.inner.on_message(message);
    }

    fn on_close(&mut self, outcome: CallOutcome) {
        let verdict = if outcome.is_ok() { "ok" } else { "err" };
        self.log
            .lock()
            .unwrap()
            .push(format!("close:{}:{}", self.name, verdict));
        self.inner.on_close(outcome);
    }
}

async fn channel_with_interceptors(
    transport: impl Transport,
    interceptors: Vec<Recording>,
) -> Channel {
    let resolver = TestResolver::new();
    resolver.add_address(addr(8001));

    let mut builder = Channel::builder("dns:///test.service:5000")
        .resolver(resolver)
        .resolution_strategy(ResolutionStrategy::Eager {
            timeout: Duration::from_secs(1),
        });
    for interceptor in interceptors {
        builder = builder.intercept(interceptor);
    }
    builder
        .connect(transport)
        .await
        .expect("failed to construct channel")
}

#[tokio::test]
async fn chain_stages_run_in_configured_order_and_reverse() {
    // What we want to test:
    //  For a chain of three interceptors, one completed call runs each
    //  outgoing stage exactly once in configured order, and each
    //  completion stage exactly once in reverse order.
    let log = Arc::new(Mutex::new(Vec::new()));
    let channel = channel_with_interceptors(
        ScriptedTransport::replying(1),
        vec![
            Recording::new("a", &log),
            Recording::new("b", &log),
            Recording::new("c", &log),
        ],
    )
    .await;

    channel
        .blocking_stub()
        .unary(ping(), CallOptions::new(), Bytes::new())
        .await
        .expect("failed to call server");

    assert_eq!(
        log.lock().unwrap().as_slice(),
        &[
            "out:a", "out:b", "out:c",
            "headers:c", "headers:b", "headers:a",
            "close:c:ok", "close:b:ok", "close:a:ok",
        ]
    );
}

#[tokio::test]
async fn single_interceptor_sees_each_stage_once() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let channel = channel_with_interceptors(
        ScriptedTransport::replying(1),
        vec![Recording::new("only", &log)],
    )
    .await;

    channel
        .blocking_stub()
        .unary(ping(), CallOptions::new(), Bytes::new())
        .await
        .expect("failed to call server");

    assert_eq!(
        log.lock().unwrap().as_slice(),
        &["out:only", "headers:only", "close:only:ok"]
    );
}

#[tokio::test]
async fn empty_chain_dispatches_normally() {
    let channel = channel_with_interceptors(ScriptedTransport::replying(1), Vec::new()).await;

    channel
        .blocking_stub()
        .unary(ping(), CallOptions::new(), Bytes::new())
        .await
        .expect("failed to call server");
}

#[tokio::test]
async fn interceptors_can_rewrite_outgoing_metadata() {
    struct Authenticate;

    impl Interceptor for Authenticate {
        fn on_call(
            &self,
            _method: &MethodDescriptor,
            metadata: &mut Metadata,
        ) -> Result<(), InterceptError> {
            metadata.insert("X-Auth-Token", "secret");
            Ok(())
        }
    }

    let resolver = TestResolver::new();
    resolver.add_address(addr(8001));
    let transport = ScriptedTransport::replying(1);

    let channel = Channel::builder("dns:///test.service:5000")
        .resolver(resolver)
        .resolution_strategy(ResolutionStrategy::Eager {
            timeout: Duration::from_secs(1),
        })
        .intercept(Authenticate)
        .connect(transport.clone())
        .await
        .expect("failed to construct channel");

    channel
        .blocking_stub()
        .unary(ping(), CallOptions::new(), Bytes::new())
        .await
        .expect("failed to call server");

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].metadata.get("x-auth-token"), Some("secret"));
}

#[tokio::test]
async fn rejection_short_circuits_before_the_transport() {
    struct Deny;

    impl Interceptor for Deny {
        fn on_call(
            &self,
            _method: &MethodDescriptor,
            _metadata: &mut Metadata,
        ) -> Result<(), InterceptError> {
            Err(InterceptError::new("missing credentials"))
        }
    }

    let resolver = TestResolver::new();
    resolver.add_address(addr(8001));
    let transport = ScriptedTransport::replying(1);
    let log = Arc::new(Mutex::new(Vec::new()));

    let channel = Channel::builder("dns:///test.service:5000")
        .resolver(resolver)
        .resolution_strategy(ResolutionStrategy::Eager {
            timeout: Duration::from_secs(1),
        })
        .intercept(Recording::new("outer", &log))
        .intercept(Deny)
        .connect(transport.clone())
        .await
        .expect("failed to construct channel");

    let err = channel
        .blocking_stub()
        .unary(ping(), CallOptions::new(), Bytes::new())
        .await
        .expect_err("the interceptor rejects the call");

    assert!(matches!(err, ChannelError::InterceptorRejected(_)));
    assert!(transport.calls().is_empty());
    // The chain still observes the completion error.
    assert_eq!(
        log.lock().unwrap().as_slice(),
        &["out:outer", "close:outer:err"]
    );
}

#[tokio::test]
async fn no_endpoints_still_completes_through_the_chain() {
    // The outgoing stages have already run when the pick fails; the error
    // must still reach the chain's completion stage.
    let resolver = TestResolver::new();
    resolver.fail_lookups(true);
    let transport = ScriptedTransport::replying(1);
    let log = Arc::new(Mutex::new(Vec::new()));

    let channel = Channel::builder("dns:///test.service:5000")
        .resolver(resolver)
        .probe_interval(Duration::from_millis(3))
        .intercept(Recording::new("only", &log))
        .connect(transport.clone())
        .await
        .expect("failed to construct channel");

    let err = channel
        .blocking_stub()
        .unary(ping(), CallOptions::new(), Bytes::new())
        .await
        .expect_err("no endpoints were resolved");

    assert!(matches!(err, ChannelError::NoEndpoints));
    assert!(transport.calls().is_empty());
    assert_eq!(
        log.lock().unwrap().as_slice(),
        &["out:only", "close:only:err"]
    );
}
