//! OCPP WebSocket client
//!
//! Holds the charge point's single link to the central system. After the
//! first successful connect a supervisor task keeps the link up, reconnecting
//! with backoff until [`WsClient::stop`] is called.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

use super::backoff::Backoff;
use super::negotiator::OCPP16;
use super::transport::{run_link, ChannelInfo, ConnectionHandler, DisconnectCause, Liveness};
use crate::application::ports::OutboundTransport;
use crate::support::errors::TransportError;
use crate::support::shutdown::ShutdownSignal;

const SUBPROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone)]
pub struct ClientConfig {
    pub subprotocol: String,
    pub liveness: Liveness,
    pub backoff: Backoff,
    /// Root certificates and optional client certificate chain, ready to use.
    pub tls: Option<Arc<rustls::ClientConfig>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            subprotocol: OCPP16.to_string(),
            liveness: Liveness::default(),
            backoff: Backoff::default(),
            tls: None,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("subprotocol", &self.subprotocol)
            .field("liveness", &self.liveness)
            .field("backoff", &self.backoff)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

pub struct WsClient {
    config: ClientConfig,
    state: Arc<ClientState>,
}

#[derive(Default)]
struct ClientState {
    started: AtomicBool,
    connected: AtomicBool,
    sender: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    shutdown: Mutex<Option<ShutdownSignal>>,
}

impl ClientState {
    fn sender(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Message>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn shutdown(&self) -> MutexGuard<'_, Option<ShutdownSignal>> {
        self.shutdown.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WsClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: Arc::new(ClientState::default()),
        }
    }

    /// Connect to `url` (`<base>/<clientId>`). Fails when the first connect
    /// fails; later drops are retried in the background.
    pub async fn start(
        &self,
        url: &str,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<(), TransportError> {
        if self.state.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }

        let channel = match client_id(url) {
            Some(id) => id,
            None => {
                self.state.started.store(false, Ordering::SeqCst);
                return Err(TransportError::InvalidUrl(url.to_string()));
            }
        };

        let socket = match connect(url, &self.config).await {
            Ok(socket) => socket,
            Err(e) => {
                self.state.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let shutdown = ShutdownSignal::new();
        *self.state.shutdown() = Some(shutdown.clone());

        let supervisor = Supervisor {
            url: url.to_string(),
            channel,
            config: self.config.clone(),
            state: self.state.clone(),
            handler,
            shutdown,
        };
        let outbound = supervisor.attach();
        tokio::spawn(supervisor.run(socket, outbound));
        Ok(())
    }

    /// Close the link and stop reconnecting. The handler sees a final
    /// `on_disconnect` with [`DisconnectCause::Shutdown`].
    pub fn stop(&self) {
        if !self.state.started.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping WebSocket client");
        self.state.sender().take();
        if let Some(shutdown) = self.state.shutdown().take() {
            shutdown.trigger();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }
}

impl OutboundTransport for WsClient {
    fn write(&self, channel: &str, frame: String) -> Result<(), TransportError> {
        let sender = self.state.sender();
        let Some(sender) = sender.as_ref() else {
            return Err(TransportError::NotConnected(channel.to_string()));
        };
        sender
            .send(Message::Text(frame))
            .map_err(|_| TransportError::ChannelClosed(channel.to_string()))
    }
}

/// Last path segment of a connection URL.
fn client_id(url: &str) -> Option<String> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let (_host, path) = rest.split_once('/')?;
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let id = path.trim_end_matches('/').rsplit('/').next()?;
    (!id.is_empty()).then(|| id.to_string())
}

async fn connect(url: &str, config: &ClientConfig) -> Result<Socket, TransportError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", url, e)))?;
    let subprotocol = HeaderValue::from_str(&config.subprotocol)
        .map_err(|e| TransportError::Handshake(e.to_string()))?;
    request.headers_mut().insert(SUBPROTOCOL_HEADER, subprotocol);

    let connector = config.tls.clone().map(Connector::Rustls);
    let (socket, response) =
        tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector).await?;

    let negotiated = response
        .headers()
        .get(SUBPROTOCOL_HEADER)
        .and_then(|v| v.to_str().ok());
    if negotiated != Some(config.subprotocol.as_str()) {
        return Err(TransportError::Handshake(format!(
            "server did not accept subprotocol {} (got {:?})",
            config.subprotocol, negotiated
        )));
    }
    Ok(socket)
}

struct Supervisor {
    url: String,
    channel: String,
    config: ClientConfig,
    state: Arc<ClientState>,
    handler: Arc<dyn ConnectionHandler>,
    shutdown: ShutdownSignal,
}

impl Supervisor {
    /// Install a fresh writer for a new link and report it connected.
    fn attach(&self) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.state.sender() = Some(tx);
        self.state.connected.store(true, Ordering::SeqCst);
        info!(url = %self.url, "Connected to central system");
        self.handler.on_connect(&ChannelInfo {
            id: self.channel.clone(),
            subprotocol: self.config.subprotocol.clone(),
            remote_addr: None,
        });
        rx
    }

    fn detach(&self, cause: DisconnectCause) {
        self.state.sender().take();
        self.state.connected.store(false, Ordering::SeqCst);
        info!(url = %self.url, %cause, "Disconnected from central system");
        self.handler.on_disconnect(&self.channel, cause);
    }

    fn running(&self) -> bool {
        self.state.started.load(Ordering::SeqCst) && !self.shutdown.is_triggered()
    }

    async fn run(self, socket: Socket, outbound: mpsc::UnboundedReceiver<Message>) {
        let mut link = Some((socket, outbound));

        while let Some((socket, outbound)) = link.take() {
            let cause = run_link(
                socket,
                &self.channel,
                outbound,
                self.handler.as_ref(),
                self.config.liveness,
                &self.shutdown,
                || {},
            )
            .await;
            self.detach(cause);

            if let Some(socket) = self.reconnect().await {
                let outbound = self.attach();
                link = Some((socket, outbound));
            }
        }
        info!(url = %self.url, "Reconnect supervisor finished");
    }

    async fn reconnect(&self) -> Option<Socket> {
        let mut attempt = 0u32;
        while self.running() {
            let delay = self.config.backoff.delay(attempt);
            info!(url = %self.url, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.notified().wait() => return None,
            }
            if !self.running() {
                return None;
            }

            match connect(&self.url, &self.config).await {
                Ok(socket) => return Some(socket),
                Err(e) => {
                    warn!(url = %self.url, attempt = attempt + 1, error = %e, "Reconnect failed");
                    attempt = attempt.saturating_add(1);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    struct Recorder(mpsc::UnboundedSender<String>);

    impl ConnectionHandler for Recorder {
        fn on_connect(&self, channel: &ChannelInfo) {
            let _ = self.0.send(format!("connect {}", channel.id));
        }
        fn on_message(&self, _: &str, _: &str) {}
        fn on_disconnect(&self, _: &str, cause: DisconnectCause) {
            let _ = self.0.send(format!("disconnect {}", cause));
        }
    }

    async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
        let (stream, _) = listener.accept().await.unwrap();
        tokio_tungstenite::accept_hdr_async(
            stream,
            |_: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
                response
                    .headers_mut()
                    .insert(SUBPROTOCOL_HEADER, HeaderValue::from_static(OCPP16));
                Ok(response)
            },
        )
        .await
        .unwrap()
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no lifecycle event in time")
            .unwrap()
    }

    #[test]
    fn client_id_is_the_last_path_segment() {
        assert_eq!(client_id("ws://localhost:8887/ocpp/CP001"), Some("CP001".into()));
        assert_eq!(client_id("wss://cs.example.com/CP-7/"), Some("CP-7".into()));
        assert_eq!(client_id("ws://localhost:8887/CP001?token=x"), Some("CP001".into()));
        assert_eq!(client_id("ws://localhost:8887"), None);
    }

    #[tokio::test]
    async fn writes_fail_before_connecting() {
        let client = WsClient::new(ClientConfig::default());
        assert!(!client.is_connected());
        assert!(matches!(
            client.write("CP001", "[]".into()),
            Err(TransportError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn failed_first_connect_is_returned() {
        struct Silent;
        impl ConnectionHandler for Silent {
            fn on_connect(&self, _: &ChannelInfo) {}
            fn on_message(&self, _: &str, _: &str) {}
            fn on_disconnect(&self, _: &str, _: DisconnectCause) {}
        }

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = WsClient::new(ClientConfig::default());
        let url = format!("ws://{}/CP001", addr);
        assert!(client.start(&url, Arc::new(Silent)).await.is_err());
        // a failed start leaves the client startable
        assert!(!matches!(
            client.start(&url, Arc::new(Silent)).await,
            Err(TransportError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn dropped_link_is_reestablished() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/CP001", listener.local_addr().unwrap());
        let client = WsClient::new(ClientConfig {
            backoff: Backoff {
                initial_delay: Duration::from_millis(20),
                max_delay: Duration::from_millis(100),
                multiplier: 1.0,
                jitter: 0.0,
            },
            ..ClientConfig::default()
        });
        let (tx, mut events) = mpsc::unbounded_channel();

        let (started, mut first) =
            tokio::join!(client.start(&url, Arc::new(Recorder(tx))), accept(&listener));
        started.unwrap();
        assert_eq!(next_event(&mut events).await, "connect CP001");

        first.close(None).await.unwrap();
        assert_eq!(next_event(&mut events).await, "disconnect closed by peer");

        let _second = accept(&listener).await;
        assert_eq!(next_event(&mut events).await, "connect CP001");
        assert!(client.is_connected());
        assert!(client.write("CP001", "[]".into()).is_ok());

        client.stop();
        assert_eq!(next_event(&mut events).await, "disconnect shutdown");
        assert!(!client.is_connected());
    }
}
