//! Client against Server over real TCP and UDP.

use std::sync::Arc;
use std::time::{Duration, Instant};

use mprpc_transport::{
    Client, ClientConfig, MethodMap, RpcError, Server, ServerConfig, ServerHandle, Socket,
    SocketConfig, TransportState, UdpServer, UdpSocket, Value, ValueMap,
};
use parking_lot::Mutex;
use tokio::runtime::Runtime;

/// Register `<prefix>0` returning `zero`, `<prefix>1` echoing its first
/// argument and `<prefix>2` echoing its second.
fn family(methods: MethodMap, prefix: &str, zero: Value) -> MethodMap {
    methods
        .method(format!("{}0", prefix), move |_| Ok(zero.clone()))
        .method(format!("{}1", prefix), |params| nth(params, 0))
        .method(format!("{}2", prefix), |params| nth(params, 1))
}

fn nth(params: Vec<Value>, index: usize) -> Result<Value, Value> {
    params
        .into_iter()
        .nth(index)
        .ok_or_else(|| Value::from(format!("ArgumentError: missing argument {}", index)))
}

fn test_methods(recorded: Arc<Mutex<Vec<Value>>>) -> MethodMap {
    let methods = MethodMap::new();
    let methods = family(methods, "intFunc", Value::from(0));
    let methods = family(methods, "floatFunc", Value::Float32(0.0));
    let methods = family(methods, "doubleFunc", Value::Float64(0.0));
    let methods = family(methods, "nilFunc", Value::Nil);
    let methods = family(methods, "boolFunc", Value::from(false));
    let methods = family(methods, "strFunc", Value::from("0"));
    let methods = family(methods, "arrayFunc", Value::Array(vec![]));
    let methods = family(methods, "mapFunc", Value::Map(ValueMap::new()));
    methods
        .method("fail", |_| Err(Value::from("requested failure")))
        .method("record", move |params| {
            recorded.lock().extend(params);
            Ok(Value::Nil)
        })
}

struct Fixture {
    runtime: Runtime,
    handle: Option<ServerHandle>,
    recorded: Arc<Mutex<Vec<Value>>>,
}

impl Fixture {
    fn start() -> Self {
        Self::start_with(ServerConfig::default())
    }

    fn start_with(config: ServerConfig) -> Self {
        let runtime = Runtime::new().expect("server runtime");
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let methods = test_methods(recorded.clone());
        let handle = runtime.block_on(async {
            let server = Server::bind("127.0.0.1:0", config).await.expect("bind");
            server.serve(methods).expect("serve")
        });
        Self {
            runtime,
            handle: Some(handle),
            recorded,
        }
    }

    fn start_udp() -> Self {
        let runtime = Runtime::new().expect("server runtime");
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let methods = test_methods(recorded.clone());
        let handle = runtime.block_on(async {
            let server = UdpServer::bind("127.0.0.1:0").await.expect("bind");
            server.serve(methods).expect("serve")
        });
        Self {
            runtime,
            handle: Some(handle),
            recorded,
        }
    }

    fn address(&self) -> String {
        self.handle
            .as_ref()
            .expect("server running")
            .local_addr()
            .to_string()
    }

    fn client(&self) -> Client {
        Client::connect(self.address()).expect("client")
    }

    fn udp_client(&self) -> Client<UdpSocket> {
        Client::udp_with_config(
            self.address(),
            ClientConfig::default().with_call_timeout(Duration::from_secs(5)),
        )
        .expect("client")
    }

    /// Wait for the server to have recorded `count` values.
    fn recorded(&self, count: usize) -> Vec<Value> {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let recorded = self.recorded.lock().clone();
            if recorded.len() >= count {
                return recorded;
            }
            assert!(Instant::now() < deadline, "server recorded only {:?}", recorded);
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.runtime.block_on(handle.shutdown());
        }
    }
}

fn bytes_array(items: &[u8]) -> Value {
    items.iter().map(|&b| Value::from(b)).collect()
}

fn bytes_map(pairs: &[(u8, u8)]) -> Value {
    Value::Map(
        pairs
            .iter()
            .map(|&(k, v)| (Value::from(k), Value::from(v)))
            .collect(),
    )
}

fn check_int_calls<S: Socket>(client: &Client<S>) {

    assert_eq!(client.call("intFunc0", vec![]), Ok(Value::from(0)));
    assert_eq!(client.call("intFunc1", vec![Value::from(1)]), Ok(Value::from(1)));
    assert_eq!(
        client.call("intFunc2", vec![Value::from(1), Value::from(2)]),
        Ok(Value::Integer(2))
    );
}

fn check_float_and_double_width<S: Socket>(client: &Client<S>) {

    assert_eq!(client.call("floatFunc0", vec![]), Ok(Value::Float32(0.0)));
    assert_eq!(
        client.call("floatFunc1", vec![Value::Float32(1.0)]),
        Ok(Value::Float32(1.0))
    );
    assert_eq!(
        client.call("floatFunc2", vec![Value::Float32(1.0), Value::Float32(2.0)]),
        Ok(Value::Float32(2.0))
    );

    assert_eq!(client.call("doubleFunc0", vec![]), Ok(Value::Float64(0.0)));
    assert_eq!(
        client.call("doubleFunc1", vec![Value::Float64(1.0)]),
        Ok(Value::Float64(1.0))
    );
    assert_eq!(
        client.call("doubleFunc2", vec![Value::Float64(1.0), Value::Float64(2.0)]),
        Ok(Value::Float64(2.0))
    );
}

fn check_nil_and_bool_calls<S: Socket>(client: &Client<S>) {

    assert_eq!(client.call("nilFunc0", vec![]), Ok(Value::Nil));
    assert_eq!(client.call("nilFunc1", vec![Value::Nil]), Ok(Value::Nil));
    assert_eq!(client.call("nilFunc2", vec![Value::Nil, Value::Nil]), Ok(Value::Nil));

    assert_eq!(client.call("boolFunc0", vec![]), Ok(Value::from(false)));
    assert_eq!(client.call("boolFunc1", vec![Value::from(false)]), Ok(Value::from(false)));
    assert_eq!(
        client.call("boolFunc2", vec![Value::from(false), Value::from(true)]),
        Ok(Value::from(true))
    );
}

fn check_string_calls<S: Socket>(client: &Client<S>) {

    assert_eq!(client.call("strFunc0", vec![]), Ok(Value::from("0")));
    let one = client.call("strFunc1", vec![Value::from("1")]).expect("strFunc1");
    assert_eq!(one, Value::Raw(b"1".to_vec()));
    assert_eq!(one.as_str(), Some("1"));
    assert_eq!(
        client.call("strFunc2", vec![Value::from("1"), Value::from("2")]),
        Ok(Value::from("2"))
    );

    let binary = Value::from(vec![0xffu8, 0x00, 0xfe]);
    assert_eq!(client.call("strFunc1", vec![binary.clone()]), Ok(binary));
}

fn check_array_calls<S: Socket>(client: &Client<S>) {

    assert_eq!(client.call("arrayFunc0", vec![]), Ok(Value::Array(vec![])));
    let a1 = bytes_array(&[1, 2, 3]);
    let a2 = bytes_array(&[11, 12, 13]);
    assert_eq!(client.call("arrayFunc1", vec![a1.clone()]), Ok(a1.clone()));
    assert_eq!(client.call("arrayFunc2", vec![a1, a2.clone()]), Ok(a2));
}

fn check_map_calls<S: Socket>(client: &Client<S>) {

    assert_eq!(client.call("mapFunc0", vec![]), Ok(Value::Map(ValueMap::new())));

    let m1 = bytes_map(&[(1, 1), (2, 2), (3, 3)]);
    assert_eq!(client.call("mapFunc1", vec![m1.clone()]), Ok(m1.clone()));

    // Equality ignores entry order.
    let reordered = bytes_map(&[(3, 3), (1, 1), (2, 2)]);
    assert_eq!(client.call("mapFunc1", vec![m1.clone()]), Ok(reordered));

    let m2 = bytes_map(&[(11, 11), (12, 12), (13, 13)]);
    assert_eq!(client.call("mapFunc2", vec![m1, m2.clone()]), Ok(m2));
}

fn check_remote_errors<S: Socket>(client: &Client<S>) {

    assert_eq!(
        client.call("fail", vec![]),
        Err(RpcError::RemoteError(Value::from("requested failure")))
    );
    assert_eq!(
        client.call("noSuchMethod", vec![]),
        Err(RpcError::RemoteError(Value::from("NoMethodError: noSuchMethod")))
    );
    assert_eq!(
        client.call("intFunc2", vec![Value::from(1)]),
        Err(RpcError::RemoteError(Value::from(
            "ArgumentError: missing argument 1"
        )))
    );

    // Application errors leave the connection usable.
    assert_eq!(client.call("intFunc0", vec![]), Ok(Value::from(0)));
}

fn check_concurrent_callers<S: Socket>(client: &Client<S>) {

    std::thread::scope(|scope| {
        for n in 0..8i64 {
            scope.spawn(move || {
                for _ in 0..25 {
                    assert_eq!(
                        client.call("intFunc1", vec![Value::from(n)]),
                        Ok(Value::from(n))
                    );
                }
            });
        }
    });

    let metrics = client.session().transport().metrics();
    assert_eq!(metrics.connect_attempts, 1);
    assert_eq!(metrics.total_sent(), 200);
}

#[test]
fn test_tcp_method_families() {
    let fixture = Fixture::start();
    let client = fixture.client();
    check_int_calls(&client);
    check_float_and_double_width(&client);
    check_nil_and_bool_calls(&client);
    check_string_calls(&client);
    check_array_calls(&client);
    check_map_calls(&client);
}

#[test]
fn test_udp_method_families() {
    let fixture = Fixture::start_udp();
    let client = fixture.udp_client();
    check_int_calls(&client);
    check_float_and_double_width(&client);
    check_nil_and_bool_calls(&client);
    check_string_calls(&client);
    check_array_calls(&client);
    check_map_calls(&client);
}

#[test]
fn test_tcp_remote_errors() {
    let fixture = Fixture::start();
    check_remote_errors(&fixture.client());
}

#[test]
fn test_udp_remote_errors() {
    let fixture = Fixture::start_udp();
    check_remote_errors(&fixture.udp_client());
}

#[test]
fn test_tcp_concurrent_callers() {
    let fixture = Fixture::start();
    check_concurrent_callers(&fixture.client());
}

#[test]
fn test_udp_concurrent_callers() {
    let fixture = Fixture::start_udp();
    check_concurrent_callers(&fixture.udp_client());
}

fn check_notify_then_call<S: Socket>(fixture: &Fixture, client: &Client<S>) {
    client
        .notify("record", vec![Value::from(1)])
        .expect("notify");
    assert_eq!(client.call("intFunc0", vec![]), Ok(Value::from(0)));
    assert_eq!(client.session().outstanding(), 0);
    assert_eq!(fixture.recorded(1), vec![Value::from(1)]);
}

#[test]
fn test_tcp_notify_then_call() {
    let fixture = Fixture::start();
    check_notify_then_call(&fixture, &fixture.client());
}

#[test]
fn test_udp_notify_then_call() {
    let fixture = Fixture::start_udp();
    check_notify_then_call(&fixture, &fixture.udp_client());
}

/// A notification followed by `flush` reaches the server even though the
/// client is dropped right away.
fn check_notify_flush_then_drop<S: Socket>(fixture: &Fixture, client: Client<S>) {
    client
        .notify("record", vec![Value::from("last words")])
        .expect("notify");
    client.flush(Duration::from_secs(5)).expect("flush");
    assert_eq!(client.session().transport().metrics().total_sent(), 1);
    drop(client);

    assert_eq!(fixture.recorded(1), vec![Value::from("last words")]);
}

#[test]
fn test_tcp_notify_flush_then_drop() {
    let fixture = Fixture::start();
    check_notify_flush_then_drop(&fixture, fixture.client());
}

#[test]
fn test_udp_notify_flush_then_drop() {
    let fixture = Fixture::start_udp();
    check_notify_flush_then_drop(&fixture, fixture.udp_client());
}

#[test]
fn test_connect_refused() {
    // Bind then release a port so nothing listens on it.
    let address = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("local addr").to_string()
    };
    let client = Client::with_config(
        address,
        ClientConfig::default().with_socket(SocketConfig::local_network()),
    )
    .expect("client");

    assert_eq!(client.call("intFunc0", vec![]), Err(RpcError::ConnectFailed));
    let failed = client.session();
    assert_eq!(failed.transport().state(), TransportState::Closed);

    // The next call makes a fresh attempt on a new transport.
    assert_eq!(client.call("intFunc0", vec![]), Err(RpcError::ConnectFailed));
    let retried = client.session();
    assert!(!Arc::ptr_eq(&failed, &retried));
    assert_eq!(retried.transport().metrics().connect_attempts, 1);
    assert_eq!(failed.transport().metrics().connect_attempts, 1);
}

#[test]
fn test_server_shutdown_fails_outstanding_calls() {
    let mut fixture = Fixture::start();
    let client = Client::with_config(
        fixture.address(),
        ClientConfig::default().with_call_timeout(Duration::from_secs(5)),
    )
    .expect("client");
    assert_eq!(client.call("intFunc0", vec![]), Ok(Value::from(0)));

    fixture.stop();

    let deadline = Instant::now() + Duration::from_secs(2);
    while client.session().transport().state() != TransportState::Closed {
        assert!(Instant::now() < deadline, "client never saw the close");
        std::thread::sleep(Duration::from_millis(5));
    }
    // Nothing listens any more, so the reconnect attempt is refused.
    assert_eq!(client.call("intFunc0", vec![]), Err(RpcError::ConnectFailed));
}

#[test]
fn test_client_reconnects_after_peer_drop() {
    // The server drops connections that send a value over 1 KiB.
    let fixture = Fixture::start_with(ServerConfig {
        max_frame_size: 1024,
    });
    let client = Client::with_config(
        fixture.address(),
        ClientConfig::default().with_call_timeout(Duration::from_secs(5)),
    )
    .expect("client");
    assert_eq!(client.call("intFunc0", vec![]), Ok(Value::from(0)));
    let first = client.session();

    let oversized = Value::from("x".repeat(4096));
    let error = client
        .call("strFunc1", vec![oversized])
        .expect_err("server drops the connection");
    assert!(error.is_transport(), "unexpected error {:?}", error);
    assert_eq!(first.transport().state(), TransportState::Closed);

    assert_eq!(client.call("intFunc1", vec![Value::from(7)]), Ok(Value::from(7)));
    let second = client.session();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.transport().state(), TransportState::Connected);
}

#[test]
fn test_udp_without_server_fails_calls() {
    let address = {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").expect("bind");
        socket.local_addr().expect("local addr").to_string()
    };
    let client = Client::udp_with_config(
        address,
        ClientConfig::default().with_call_timeout(Duration::from_millis(500)),
    )
    .expect("client");

    // Port unreachable surfaces as a transport failure where the platform
    // reports it, otherwise the call times out.
    match client.call("intFunc0", vec![]) {
        Err(RpcError::TransportFailure(_)) | Err(RpcError::Timeout) => {}
        other => panic!("expected failure, got {:?}", other),
    }
}

#[test]
fn test_client_close() {
    let fixture = Fixture::start();
    let client = fixture.client();

    assert_eq!(client.call("intFunc0", vec![]), Ok(Value::from(0)));
    client.close();
    assert_eq!(client.call("intFunc0", vec![]), Err(RpcError::SendRejected));
}
