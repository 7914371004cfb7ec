//! TCP server implementation.

use crate::config::NetworkConfig;
use crate::error::ServerError;
use hibye_protocol::{default_endpoint, Command, MessageBuffer, LISTEN_BACKLOG};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Listen backlog.
    pub backlog: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_endpoint(),
            backlog: LISTEN_BACKLOG,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Sets the listen backlog.
    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }
}

impl From<&NetworkConfig> for ServerConfig {
    fn from(network: &NetworkConfig) -> Self {
        Self {
            bind_addr: network.bind_addr,
            backlog: network.backlog,
        }
    }
}

/// Why the accept loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A client sent `BYE`.
    Bye,
    /// [`Server::shutdown`] was called.
    Shutdown,
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub replies_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server for hibye.
///
/// Connections are served strictly one at a time: the next connection is not
/// accepted until the current one has been read, answered and closed. Clients
/// arriving meanwhile wait in the OS listen backlog.
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    stats: ServerStats,
    shutdown: watch::Sender<bool>,
    running: AtomicBool,
    output: Mutex<Box<dyn Write + Send>>,
}

/// Pause after a failed accept, so a persistent error such as `EMFILE`
/// does not turn the loop into a busy spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

impl Server {
    /// Creates the listening socket.
    ///
    /// Fails with [`ServerError::Bind`] or [`ServerError::Listen`]; both are
    /// fatal to the server process.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let addr = config.bind_addr;
        let bind_err = |source| ServerError::Bind { addr, source };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_err)?;
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(addr).map_err(bind_err)?;

        let listener = socket.listen(config.backlog).map_err(ServerError::Listen)?;
        let local_addr = listener.local_addr()?;

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config,
            listener,
            local_addr,
            stats: ServerStats::default(),
            shutdown,
            running: AtomicBool::new(false),
            output: Mutex::new(Box::new(io::stdout())),
        })
    }

    /// Sends the echoed request lines to `output` instead of stdout.
    pub fn with_output(self, output: impl Write + Send + 'static) -> Self {
        Self {
            output: Mutex::new(Box::new(output)),
            ..self
        }
    }

    /// Runs the accept loop until a `BYE` request or a shutdown.
    pub async fn run(&self) -> Result<StopReason, ServerError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            "Server listening on {} (backlog {})",
            self.local_addr,
            self.config.backlog
        );

        let mut shutdown_rx = self.shutdown.subscribe();

        let reason = loop {
            if *shutdown_rx.borrow_and_update() {
                tracing::info!("Server shutting down");
                break StopReason::Shutdown;
            }

            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);

                            match self.handle_connection(stream, addr).await {
                                Ok(command) if command.is_terminal() => {
                                    tracing::info!("[{}] {} received, stopping", addr, command);
                                    break StopReason::Bye;
                                }
                                Ok(_) => {}
                                Err(e) => {
                                    tracing::warn!("[{}] Connection error: {}", addr, e);
                                    self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                            self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    tracing::info!("Server shutting down");
                    break StopReason::Shutdown;
                }
            }
        };

        self.running.store(false, Ordering::SeqCst);
        Ok(reason)
    }

    /// Serves one connection: a single read, an echo to the output, an
    /// optional reply, then close.
    ///
    /// A failed echo is logged and counted but never stops the reply or the
    /// `BYE` check.
    async fn handle_connection(
        &self,
        mut stream: TcpStream,
        addr: SocketAddr,
    ) -> Result<Command, ServerError> {
        tracing::info!("Client connected: {}", addr);

        let mut request = MessageBuffer::new();
        let n = stream.read(request.as_mut_bytes()).await?;
        request.terminate();
        tracing::debug!("[{}] Received {} bytes", addr, n);

        if let Err(e) = self.echo(&request) {
            tracing::warn!("[{}] Failed to echo request: {}", addr, e);
            self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
        }

        let command = request.command();
        if let Some(reply) = command.reply() {
            stream.write_all(reply.as_bytes()).await?;
            self.stats.replies_total.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("[{}] Wrote {} bytes", addr, reply.as_bytes().len());
        }

        drop(stream);
        tracing::info!("Client disconnected: {} ({})", addr, command);
        Ok(command)
    }

    fn echo(&self, request: &MessageBuffer) -> io::Result<()> {
        let mut output = self.output.lock().unwrap_or_else(|e| e.into_inner());
        echo(&mut *output, request)
    }

    /// Stops the accept loop. A connection already being served finishes first.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns whether the accept loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}

/// Writes the request text as one line.
fn echo<W: Write + ?Sized>(out: &mut W, request: &MessageBuffer) -> io::Result<()> {
    out.write_all(request.text_bytes())?;
    out.write_all(b"\n")?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hibye_client::{Client, ClientConfig};
    use hibye_protocol::{encode_request, BUFFER_SIZE};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    type RunHandle = JoinHandle<Result<StopReason, ServerError>>;

    /// Output sink the test can read back after the server wrote to it.
    #[derive(Clone, Default)]
    struct SharedOutput(Arc<Mutex<Vec<u8>>>);

    impl SharedOutput {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedOutput {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Output sink that always fails, like a closed stdout.
    struct BrokenOutput;

    impl Write for BrokenOutput {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    async fn start_server() -> (Arc<Server>, SocketAddr, RunHandle) {
        start_server_with_output(SharedOutput::default()).await
    }

    async fn start_server_with_output(
        output: impl Write + Send + 'static,
    ) -> (Arc<Server>, SocketAddr, RunHandle) {
        // Use a random port
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        let server = Arc::new(Server::bind(config).await.unwrap().with_output(output));
        let addr = server.local_addr();

        let handle = {
            let server = server.clone();
            tokio::spawn(async move { server.run().await })
        };

        (server, addr, handle)
    }

    async fn exchange(addr: SocketAddr, message: &str) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(&encode_request(message).unwrap())
            .await
            .unwrap();

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn test_hello_gets_full_buffer_reply() {
        let (server, addr, handle) = start_server().await;

        let reply = exchange(addr, "HELLO").await;
        assert_eq!(reply.len(), BUFFER_SIZE);
        assert_eq!(&reply[..3], b"HI\n");
        assert!(reply[3..].iter().all(|&b| b == 0));

        assert!(server.is_running());
        assert_eq!(server.stats().replies_total.load(Ordering::Relaxed), 1);

        server.shutdown();
        assert_eq!(handle.await.unwrap().unwrap(), StopReason::Shutdown);
    }

    #[tokio::test]
    async fn test_other_message_gets_no_reply() {
        let (server, addr, handle) = start_server().await;

        let reply = exchange(addr, "PING").await;
        assert!(reply.is_empty());

        // Still serving after an ordinary message
        let reply = exchange(addr, "HELLO").await;
        assert_eq!(&reply[..3], b"HI\n");

        server.shutdown();
        handle.await.unwrap().unwrap();
        assert_eq!(server.stats().connections_total.load(Ordering::Relaxed), 2);
        assert_eq!(server.stats().replies_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_bye_stops_server_without_reply() {
        let (server, addr, handle) = start_server().await;

        let reply = exchange(addr, "HELLO").await;
        assert_eq!(&reply[..3], b"HI\n");

        let reply = exchange(addr, "BYE").await;
        assert!(reply.is_empty());

        let reason = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("server should stop after BYE")
            .unwrap()
            .unwrap();
        assert_eq!(reason, StopReason::Bye);
        assert!(!server.is_running());
        assert_eq!(server.stats().connections_total.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_near_matches_do_not_stop_server() {
        let (server, addr, handle) = start_server().await;

        for message in ["bye", "BYE ", "BYEBYE", "HELLO BYE", ""] {
            let reply = exchange(addr, message).await;
            assert!(reply.is_empty(), "unexpected reply to {:?}", message);
        }
        assert!(server.is_running());

        exchange(addr, "BYE").await;
        assert_eq!(handle.await.unwrap().unwrap(), StopReason::Bye);
        assert_eq!(server.stats().connections_total.load(Ordering::Relaxed), 6);
    }

    #[tokio::test]
    async fn test_connections_are_served_serially() {
        let (server, addr, handle) = start_server().await;

        // First client connects and stays silent, holding the server
        let mut silent = TcpStream::connect(addr).await.unwrap();

        // Second client waits in the backlog
        let mut queued = tokio::spawn(async move { exchange(addr, "HELLO").await });
        let waited = tokio::time::timeout(Duration::from_millis(200), &mut queued).await;
        assert!(waited.is_err(), "queued client was served too early");

        // Releasing the first client lets the second through
        silent.write_all(b"PING\0").await.unwrap();
        let mut rest = Vec::new();
        silent.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        let reply = queued.await.unwrap();
        assert_eq!(&reply[..3], b"HI\n");

        server.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_oversized_request_is_truncated() {
        let (server, addr, handle) = start_server().await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let long = "A".repeat(BUFFER_SIZE + 44);
        stream
            .write_all(&encode_request(&long).unwrap())
            .await
            .unwrap();
        // Closing with unread bytes may reset the connection
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest).await;
        assert!(rest.is_empty());

        let reply = exchange(addr, "HELLO").await;
        assert_eq!(&reply[..3], b"HI\n");

        server.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_request_is_echoed_as_line() {
        let output = SharedOutput::default();
        let (server, addr, handle) = start_server_with_output(output.clone()).await;

        exchange(addr, "HELLO").await;
        assert_eq!(output.contents(), b"HELLO\n");

        exchange(addr, "PING").await;
        assert_eq!(output.contents(), b"HELLO\nPING\n");

        server.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_oversized_request_echo_is_truncated() {
        let output = SharedOutput::default();
        let (server, addr, handle) = start_server_with_output(output.clone()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let long = "A".repeat(BUFFER_SIZE + 44);
        stream
            .write_all(&encode_request(&long).unwrap())
            .await
            .unwrap();
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest).await;

        // Serving the next client means the first echo is complete
        exchange(addr, "HELLO").await;

        let mut expected = vec![b'A'; BUFFER_SIZE - 1];
        expected.extend_from_slice(b"\nHELLO\n");
        assert_eq!(output.contents(), expected);

        server.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_echo_failure_does_not_block_reply_or_bye() {
        let (server, addr, handle) = start_server_with_output(BrokenOutput).await;

        let reply = exchange(addr, "HELLO").await;
        assert_eq!(reply.len(), BUFFER_SIZE);
        assert_eq!(&reply[..3], b"HI\n");

        exchange(addr, "BYE").await;
        let reason = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("server should stop after BYE")
            .unwrap()
            .unwrap();
        assert_eq!(reason, StopReason::Bye);
        assert_eq!(server.stats().replies_total.load(Ordering::Relaxed), 1);
        assert_eq!(server.stats().errors_total.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_echo_writes_text_and_newline() {
        let mut out = Vec::new();
        echo(&mut out, &MessageBuffer::with_text(b"HELLO")).unwrap();
        assert_eq!(out, b"HELLO\n");

        let mut out = Vec::new();
        echo(&mut out, &MessageBuffer::new()).unwrap();
        assert_eq!(out, b"\n");
    }

    #[tokio::test]
    async fn test_round_trip_with_client() {
        let (_server, addr, handle) = start_server().await;
        let client = Client::new(ClientConfig::new(addr));

        let reply = client.send("HELLO").await.unwrap();
        assert!(reply.text().starts_with("HI"));
        assert_eq!(reply.as_bytes().len(), BUFFER_SIZE);

        let reply = client.send("PING").await.unwrap();
        assert!(reply.is_empty());

        let reply = client.send("BYE").await.unwrap();
        assert!(reply.is_empty());
        assert_eq!(handle.await.unwrap().unwrap(), StopReason::Bye);
    }

    #[tokio::test]
    async fn test_shutdown_before_run() {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        let server = Server::bind(config).await.unwrap();
        assert!(!server.is_running());

        server.shutdown();
        assert_eq!(server.run().await.unwrap(), StopReason::Shutdown);
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_fatal() {
        let (server, addr, handle) = start_server().await;

        let err = match Server::bind(ServerConfig::new(addr)).await {
            Ok(_) => panic!("second bind to {} should fail", addr),
            Err(e) => e,
        };
        assert!(err.is_fatal());

        server.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[test]
    fn test_config_from_network() {
        let network = NetworkConfig {
            bind_addr: "0.0.0.0:9000".parse().unwrap(),
            backlog: 12,
        };
        let config = ServerConfig::from(&network);
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.backlog, 12);

        let config = ServerConfig::default().with_backlog(1);
        assert_eq!(config.bind_addr, default_endpoint());
        assert_eq!(config.backlog, 1);
    }
}
