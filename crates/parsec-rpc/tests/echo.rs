//! End-to-end calls over a real TCP server on an ephemeral port.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use parsec_core::config::{ClientConfig, ServerConfig};
use parsec_core::{FrameworkError, Message};
use parsec_proto::envelope::CALL_TYPE_ONEWAY;
use parsec_proto::serialize::SERIALIZATION_JSON;
use parsec_proto::Body;
use parsec_rpc::{Client, FnMethod, Method, Server, Service};
use parsec_selector::{Node, Selector, StaticDiscovery};

const SERVICE: &str = "parsec.demo.echo.basic";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Sleeps well past any configured handler budget before replying.
struct Linger(Duration);

#[async_trait]
impl Method for Linger {
    async fn invoke(&self, _msg: &mut Message, body: Body) -> Result<Body, FrameworkError> {
        tokio::time::sleep(self.0).await;
        Ok(body)
    }
}

fn echo_service() -> Service {
    Service::new(SERVICE)
        .with_method(
            "echo",
            Arc::new(FnMethod(|_msg: &mut Message, body: Body| Ok(body))),
        )
        .with_method("linger", Arc::new(Linger(Duration::from_millis(300))))
        .with_method(
            "reject",
            Arc::new(FnMethod(|_msg: &mut Message, _body: Body| {
                Err(FrameworkError::Business {
                    code: 10_001,
                    msg: "order rejected".into(),
                })
            })),
        )
        .with_method(
            "explode",
            Arc::new(FnMethod(|_msg: &mut Message, _body: Body| {
                panic!("boom");
            })),
        )
        .with_method(
            "whoami",
            Arc::new(FnMethod(|msg: &mut Message, _body: Body| {
                Ok(Body::Raw(Bytes::from(format!(
                    "{}|{}",
                    msg.caller().full(),
                    msg.dyeing_key()
                ))))
            })),
        )
}

async fn start_server(config: ServerConfig) -> (Server, String) {
    init_tracing();
    let server = Server::new(config);
    server.register_service(echo_service());
    let addr = server.serve().await.unwrap();
    (server, addr.to_string())
}

fn client_for(addr: &str, config: ClientConfig) -> Client {
    let discovery = Arc::new(StaticDiscovery::new());
    discovery.add_node(Node::new(SERVICE, addr));
    Client::new(config, Arc::new(Selector::new(discovery)))
}

fn call_message(client: &Client, method: &str) -> Message {
    let mut msg = client.new_message();
    msg.set_caller_service_name("parsec.demo.frontend.web");
    msg.set_callee_service_name(SERVICE);
    msg.set_rpc_name(&format!("/{SERVICE}/{method}"));
    msg
}

#[tokio::test]
async fn unary_echo_round_trip() {
    let (server, addr) = start_server(ServerConfig::default()).await;
    let client = client_for(&addr, ClientConfig::default());

    let mut msg = call_message(&client, "echo");
    let rsp = client
        .invoke(&mut msg, &Body::Raw(Bytes::from_static(b"ping")))
        .await
        .unwrap();
    assert_eq!(rsp, Body::Raw(Bytes::from_static(b"ping")));
    assert_ne!(msg.request_id(), 0);
    assert!(msg.elapsed() < Duration::from_secs(1));

    server.shutdown();
}

#[tokio::test]
async fn json_body_round_trip() {
    let (server, addr) = start_server(ServerConfig::default()).await;
    let config = ClientConfig {
        serialization: SERIALIZATION_JSON,
        ..ClientConfig::default()
    };
    let client = client_for(&addr, config);

    let mut msg = call_message(&client, "echo");
    let body = Body::Json(serde_json::json!({"item": "widget", "count": 3}));
    let rsp = client.invoke(&mut msg, &body).await.unwrap();
    assert_eq!(rsp, body);

    server.shutdown();
}

#[tokio::test]
async fn compressed_body_round_trip() {
    let (server, addr) = start_server(ServerConfig::default()).await;
    let config = ClientConfig {
        compression: 1, // gzip
        ..ClientConfig::default()
    };
    let client = client_for(&addr, config);

    let payload = Bytes::from(vec![7u8; 4096]);
    let mut msg = call_message(&client, "echo");
    let rsp = client.invoke(&mut msg, &Body::Raw(payload.clone())).await.unwrap();
    assert_eq!(rsp, Body::Raw(payload));

    server.shutdown();
}

#[tokio::test]
async fn business_error_comes_back_typed() {
    let (server, addr) = start_server(ServerConfig::default()).await;
    let client = client_for(&addr, ClientConfig::default());

    let mut msg = call_message(&client, "reject");
    let err = client
        .invoke(&mut msg, &Body::Raw(Bytes::from_static(b"x")))
        .await
        .unwrap_err();
    match err {
        FrameworkError::Business { code, msg } => {
            assert_eq!(code, 10_001);
            assert_eq!(msg, "order rejected");
        }
        other => panic!("unexpected {other:?}"),
    }

    server.shutdown();
}

#[tokio::test]
async fn unknown_method_is_callee_framework_error() {
    let (server, addr) = start_server(ServerConfig::default()).await;
    let client = client_for(&addr, ClientConfig::default());

    let mut msg = call_message(&client, "missing");
    let err = client.invoke(&mut msg, &Body::Empty).await.unwrap_err();
    match err {
        FrameworkError::CalleeFramework { code, .. } => {
            assert_eq!(code, FrameworkError::NoFunc(String::new()).code());
        }
        other => panic!("unexpected {other:?}"),
    }

    server.shutdown();
}

#[tokio::test]
async fn unknown_service_is_callee_framework_error() {
    let (server, addr) = start_server(ServerConfig::default()).await;

    let discovery = Arc::new(StaticDiscovery::new());
    discovery.add_node(Node::new("parsec.demo.ghost.basic", &addr));
    let client = Client::new(
        ClientConfig::default(),
        Arc::new(Selector::new(discovery)),
    );

    let mut msg = client.new_message();
    msg.set_callee_service_name("parsec.demo.ghost.basic");
    msg.set_rpc_name("/parsec.demo.ghost.basic/echo");
    let err = client.invoke(&mut msg, &Body::Empty).await.unwrap_err();
    match err {
        FrameworkError::CalleeFramework { code, .. } => {
            assert_eq!(code, FrameworkError::NoService(String::new()).code());
        }
        other => panic!("unexpected {other:?}"),
    }

    server.shutdown();
}

#[tokio::test]
async fn handler_panic_is_contained_as_system_error() {
    let (server, addr) = start_server(ServerConfig::default()).await;
    let client = client_for(&addr, ClientConfig::default());

    let mut msg = call_message(&client, "explode");
    let err = client
        .invoke(&mut msg, &Body::Raw(Bytes::from_static(b"x")))
        .await
        .unwrap_err();
    match err {
        FrameworkError::CalleeFramework { code, .. } => {
            assert_eq!(code, FrameworkError::System(String::new()).code());
        }
        other => panic!("unexpected {other:?}"),
    }

    // The connection survived the panic.
    let mut msg = call_message(&client, "echo");
    let rsp = client
        .invoke(&mut msg, &Body::Raw(Bytes::from_static(b"still alive")))
        .await
        .unwrap();
    assert_eq!(rsp, Body::Raw(Bytes::from_static(b"still alive")));

    server.shutdown();
}

#[tokio::test]
async fn server_budget_clamps_a_generous_caller_deadline() {
    let config = ServerConfig {
        timeout: Duration::from_millis(50),
        ..ServerConfig::default()
    };
    let (server, addr) = start_server(config).await;
    let client = client_for(&addr, ClientConfig::default());

    // The caller's one-second budget alone would let the handler finish;
    // the server's own 50 ms budget must cut it off first.
    let mut msg = call_message(&client, "linger");
    let err = client
        .invoke(&mut msg, &Body::Raw(Bytes::from_static(b"x")))
        .await
        .unwrap_err();
    match err {
        FrameworkError::CalleeFramework { code, .. } => {
            assert_eq!(code, FrameworkError::Timeout.code());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(msg.elapsed() < Duration::from_millis(300));

    server.shutdown();
}

#[tokio::test]
async fn one_way_call_returns_without_response() {
    let (server, addr) = start_server(ServerConfig::default()).await;
    let client = client_for(&addr, ClientConfig::default());

    let mut msg = call_message(&client, "echo");
    msg.set_call_type(CALL_TYPE_ONEWAY);
    let rsp = client
        .invoke(&mut msg, &Body::Raw(Bytes::from_static(b"fire")))
        .await
        .unwrap();
    assert_eq!(rsp, Body::Empty);

    server.shutdown();
}

#[tokio::test]
async fn context_fields_reach_the_handler() {
    let (server, addr) = start_server(ServerConfig::default()).await;
    let client = client_for(&addr, ClientConfig::default());

    let mut msg = call_message(&client, "whoami");
    msg.set_dyeing_key("blue");
    let rsp = client.invoke(&mut msg, &Body::Empty).await.unwrap();
    assert_eq!(
        rsp,
        Body::Raw(Bytes::from_static(b"parsec.demo.frontend.web|blue"))
    );

    server.shutdown();
}

#[tokio::test]
async fn filters_wrap_both_sides() {
    use parsec_core::filter::{Filter, Next};

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl Filter for Counter {
        async fn handle(
            &self,
            msg: &mut Message,
            req: Bytes,
            next: Next<'_>,
        ) -> Result<Bytes, FrameworkError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            next.run(msg, req).await
        }
    }

    let server_hits = Arc::new(AtomicUsize::new(0));
    let mut server = Server::new(ServerConfig::default());
    server.add_filter(Arc::new(Counter(Arc::clone(&server_hits))));
    server.register_service(echo_service());
    let addr = server.serve().await.unwrap().to_string();

    let client_hits = Arc::new(AtomicUsize::new(0));
    let discovery = Arc::new(StaticDiscovery::new());
    discovery.add_node(Node::new(SERVICE, &addr));
    let client = Client::new(
        ClientConfig::default(),
        Arc::new(Selector::new(discovery)),
    )
    .with_filter(Arc::new(Counter(Arc::clone(&client_hits))));

    let mut msg = call_message(&client, "echo");
    client
        .invoke(&mut msg, &Body::Raw(Bytes::from_static(b"ping")))
        .await
        .unwrap();

    assert_eq!(client_hits.load(Ordering::Relaxed), 1);
    assert_eq!(server_hits.load(Ordering::Relaxed), 1);

    server.shutdown();
}

#[tokio::test]
async fn udp_echo_round_trip() {
    let server_config = ServerConfig {
        network: "udp".into(),
        ..ServerConfig::default()
    };
    let (server, addr) = start_server(server_config).await;

    let client_config = ClientConfig {
        network: "udp".into(),
        ..ClientConfig::default()
    };
    let client = client_for(&addr, client_config);

    let mut msg = call_message(&client, "echo");
    let rsp = client
        .invoke(&mut msg, &Body::Raw(Bytes::from_static(b"dgram")))
        .await
        .unwrap();
    assert_eq!(rsp, Body::Raw(Bytes::from_static(b"dgram")));

    server.shutdown();
}
