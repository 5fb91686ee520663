//! Blocking client façade.
//!
//! A [`Client`] wires a [`Session`] to a [`TcpSocket`] or [`UdpSocket`] and
//! supplies the reactor: either a Tokio runtime it owns or a handle to an
//! existing one.
//!
//! A transport is single use. When the connection fails or the peer closes
//! it, the next call through the client builds a fresh session and socket.
//! Only [`Client::close`] is final.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mprpc_core::{MsgpackCodec, RpcResult, Value};
use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};

use crate::config::{ClientConfig, SessionConfig};
use crate::session::Session;
use crate::socket::{Socket, TcpSocket, UdpSocket};
use crate::transport::TransportState;

type SocketFactory<S> = Box<dyn Fn() -> S + Send + Sync>;

/// Synchronous MessagePack-RPC client for one server.
///
/// Connects lazily on the first call and reconnects on the first call after
/// a connection loss. Dropping the client closes the connection and fails
/// any calls still outstanding on other threads.
///
/// ```rust,ignore
/// let client = Client::connect("127.0.0.1:18800")?;
/// let two = client.call("intFunc2", vec![Value::from(1), Value::from(2)])?;
/// ```
pub struct Client<S: Socket = TcpSocket> {
    session: Mutex<Arc<Session<S>>>,
    new_socket: SocketFactory<S>,
    session_config: SessionConfig,
    closed: AtomicBool,
    runtime: Option<Runtime>,
}

impl Client<TcpSocket> {
    /// Create a TCP client for `address` with default configuration.
    ///
    /// # Errors
    ///
    /// Fails only if the client runtime cannot be started.
    pub fn connect(address: impl Into<String>) -> io::Result<Self> {
        Self::with_config(address, ClientConfig::default())
    }

    /// Create a TCP client for `address` running on its own runtime.
    ///
    /// # Errors
    ///
    /// Fails only if the client runtime cannot be started.
    pub fn with_config(address: impl Into<String>, config: ClientConfig) -> io::Result<Self> {
        let runtime = client_runtime(&config)?;
        let handle = runtime.handle().clone();
        Ok(Self::tcp(address.into(), config, handle, Some(runtime)))
    }

    /// Create a TCP client whose socket runs on an existing runtime.
    ///
    /// Calls still block the calling thread, so they must not be made from
    /// that runtime's worker threads.
    pub fn with_handle(address: impl Into<String>, config: ClientConfig, handle: Handle) -> Self {
        Self::tcp(address.into(), config, handle, None)
    }

    fn tcp(
        address: String,
        config: ClientConfig,
        handle: Handle,
        runtime: Option<Runtime>,
    ) -> Self {
        tracing::debug!(%address, "Client created");
        let socket_config = config.socket.clone();
        let new_socket = Box::new(move || {
            TcpSocket::new(
                address.clone(),
                handle.clone(),
                MsgpackCodec,
                socket_config.clone(),
            )
        });
        Self::from_factory(new_socket, config.session, runtime)
    }
}

impl Client<UdpSocket> {
    /// Create a UDP client for `address` with default configuration.
    ///
    /// # Errors
    ///
    /// Fails only if the client runtime cannot be started.
    pub fn connect_udp(address: impl Into<String>) -> io::Result<Self> {
        Self::udp_with_config(address, ClientConfig::default())
    }

    /// Create a UDP client for `address` running on its own runtime.
    ///
    /// Datagrams are not retransmitted; set a call timeout so a lost request
    /// or reply does not block forever.
    ///
    /// # Errors
    ///
    /// Fails only if the client runtime cannot be started.
    pub fn udp_with_config(address: impl Into<String>, config: ClientConfig) -> io::Result<Self> {
        let runtime = client_runtime(&config)?;
        let handle = runtime.handle().clone();
        let address = address.into();
        tracing::debug!(%address, "Client created (udp)");
        let socket_config = config.socket.clone();
        let new_socket = Box::new(move || {
            UdpSocket::new(
                address.clone(),
                handle.clone(),
                MsgpackCodec,
                socket_config.clone(),
            )
        });
        Ok(Self::from_factory(new_socket, config.session, Some(runtime)))
    }
}

impl<S: Socket> Client<S> {
    fn from_factory(
        new_socket: SocketFactory<S>,
        session_config: SessionConfig,
        runtime: Option<Runtime>,
    ) -> Self {
        let session = Session::new(new_socket(), MsgpackCodec, session_config.clone());
        Self {
            session: Mutex::new(session),
            new_socket,
            session_config,
            closed: AtomicBool::new(false),
            runtime,
        }
    }

    /// Call `method` and block until the reply arrives.
    ///
    /// # Errors
    ///
    /// See [`Session::call`]. After [`Client::close`] every call fails with
    /// `SendRejected`.
    pub fn call(&self, method: &str, args: Vec<Value>) -> RpcResult<Value> {
        self.current().call(method, args)
    }

    /// Send a notification.
    ///
    /// # Errors
    ///
    /// See [`Session::notify`].
    pub fn notify(&self, method: &str, args: Vec<Value>) -> RpcResult<()> {
        self.current().notify(method, args)
    }

    /// Block until everything sent so far has been written to the network.
    ///
    /// Useful before exiting after a notification, which has no reply to
    /// wait for.
    ///
    /// # Errors
    ///
    /// See [`Session::flush`].
    pub fn flush(&self, timeout: Duration) -> RpcResult<()> {
        self.session().flush(timeout)
    }

    /// Close the connection for good. Later calls fail with `SendRejected`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.session.lock().close();
    }

    /// The current session. After a connection loss this is the closed
    /// session until the next call replaces it.
    pub fn session(&self) -> Arc<Session<S>> {
        self.session.lock().clone()
    }

    /// The session to use for a new call, replacing a closed one unless the
    /// client itself was closed.
    fn current(&self) -> Arc<Session<S>> {
        let mut session = self.session.lock();
        if session.transport().state() == TransportState::Closed
            && !self.closed.load(Ordering::SeqCst)
        {
            tracing::debug!("Client replacing closed session");
            *session = Session::new(
                (self.new_socket)(),
                MsgpackCodec,
                self.session_config.clone(),
            );
        }
        session.clone()
    }
}

impl<S: Socket> Drop for Client<S> {
    fn drop(&mut self) {
        self.close();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn client_runtime(config: &ClientConfig) -> io::Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(config.worker_threads.max(1))
        .thread_name("mprpc-client")
        .enable_all()
        .build()
}
