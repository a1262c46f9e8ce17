//! OCPP WebSocket server
//!
//! Accepts charge-point connections at `ws[s]://<host>:<port><base_path>/<id>`.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tracing::{error, info, warn};

use super::negotiator::{ProtocolNegotiator, OCPP16};
use super::session::{SessionRegistry, SharedSessionRegistry};
use super::transport::{run_link, ChannelInfo, ConnectionHandler, Liveness};
use crate::support::errors::TransportError;
use crate::support::shutdown::ShutdownSignal;

const SUBPROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

#[derive(Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Path prefix before the charge point id, e.g. `/ocpp`.
    pub base_path: String,
    /// Accepted subprotocols in preference order.
    pub subprotocols: Vec<String>,
    pub liveness: Liveness,
    pub tls: Option<Arc<rustls::ServerConfig>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8887".to_string(),
            base_path: String::new(),
            subprotocols: vec![OCPP16.to_string()],
            liveness: Liveness::default(),
            tls: None,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen_addr", &self.listen_addr)
            .field("base_path", &self.base_path)
            .field("subprotocols", &self.subprotocols)
            .field("liveness", &self.liveness)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

/// OCPP WebSocket server
pub struct OcppServer {
    config: ServerConfig,
    negotiator: ProtocolNegotiator,
    sessions: SharedSessionRegistry,
    shutdown: Mutex<Option<ShutdownSignal>>,
}

impl OcppServer {
    pub fn new(config: ServerConfig) -> Self {
        let negotiator = ProtocolNegotiator::new(config.subprotocols.clone());
        Self {
            config,
            negotiator,
            sessions: SessionRegistry::shared(),
            shutdown: Mutex::new(None),
        }
    }

    /// The connection set; doubles as the outbound transport of the server.
    pub fn sessions(&self) -> SharedSessionRegistry {
        self.sessions.clone()
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_slot().is_some()
    }

    fn shutdown_slot(&self) -> std::sync::MutexGuard<'_, Option<ShutdownSignal>> {
        self.shutdown.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind and start accepting connections in the background.
    /// Returns the bound address.
    pub async fn start(
        &self,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<SocketAddr, TransportError> {
        if self.is_running() {
            return Err(TransportError::AlreadyStarted);
        }

        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: self.config.listen_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| TransportError::Bind {
            addr: self.config.listen_addr.clone(),
            source,
        })?;

        let shutdown = ShutdownSignal::new();
        {
            let mut slot = self.shutdown_slot();
            if slot.is_some() {
                return Err(TransportError::AlreadyStarted);
            }
            *slot = Some(shutdown.clone());
        }

        let scheme = if self.config.tls.is_some() { "wss" } else { "ws" };
        info!(
            "🔌 OCPP Central System listening on {}://{}{}/{{charge_point_id}}",
            scheme, local_addr, self.config.base_path
        );
        info!(subprotocols = ?self.negotiator.supported_subprotocols(), "Accepted subprotocols");

        let acceptor = Acceptor {
            base_path: normalize_base_path(&self.config.base_path),
            negotiator: self.negotiator.clone(),
            sessions: self.sessions.clone(),
            liveness: self.config.liveness,
            tls: self.config.tls.clone().map(TlsAcceptor::from),
            handler,
            shutdown: shutdown.clone(),
        };
        tokio::spawn(acceptor.run(listener));

        Ok(local_addr)
    }

    /// Stop accepting and close every connection. Each closed connection
    /// still reports its disconnect to the handler.
    pub async fn stop(&self) {
        let Some(shutdown) = self.shutdown_slot().take() else {
            return;
        };
        let connected = self.sessions.count();
        info!(connected, "📢 Closing charge point connections");
        shutdown.trigger();

        // give connection loops a moment to send their close frames
        for _ in 0..50 {
            if self.sessions.count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        info!("✅ WebSocket server shutdown complete");
    }
}

fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

/// Extract the charge point id from a request path `<base_path>/<id>`.
fn extract_charge_point_id(base_path: &str, path: &str) -> Option<String> {
    let rest = path.strip_prefix(base_path)?;
    let id = rest.strip_prefix('/')?;
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id.to_string())
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Everything one accepted connection needs.
#[derive(Clone)]
struct Acceptor {
    base_path: String,
    negotiator: ProtocolNegotiator,
    sessions: SharedSessionRegistry,
    liveness: Liveness,
    tls: Option<TlsAcceptor>,
    handler: Arc<dyn ConnectionHandler>,
    shutdown: ShutdownSignal,
}

impl Acceptor {
    async fn run(self, listener: TcpListener) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let acceptor = self.clone();
                            tokio::spawn(async move {
                                acceptor.accept(stream, addr).await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = self.shutdown.notified().wait() => {
                    info!("🛑 WebSocket server received shutdown signal");
                    return;
                }
            }
        }
    }

    async fn accept(self, stream: TcpStream, addr: SocketAddr) {
        match self.tls.clone() {
            Some(tls) => match tls.accept(stream).await {
                Ok(stream) => self.serve(stream, addr).await,
                Err(e) => warn!(%addr, error = %e, "TLS handshake failed"),
            },
            None => self.serve(stream, addr).await,
        }
    }

    async fn serve<S>(self, stream: S, addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut accepted: Option<(String, String)> = None;

        let handshake = tokio_tungstenite::accept_hdr_async(
            stream,
            |req: &Request, mut response: Response| {
                let path = req.uri().path();
                info!(%addr, path, "WebSocket handshake");

                let Some(id) = extract_charge_point_id(&self.base_path, path) else {
                    warn!(%addr, path, "Rejected handshake: no charge point id in path");
                    return Err(reject(StatusCode::NOT_FOUND, "unknown path"));
                };

                let requested = req
                    .headers()
                    .get(SUBPROTOCOL_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                let Some(subprotocol) = self.negotiator.negotiate(requested) else {
                    warn!(%addr, charge_point_id = %id, requested, "Rejected handshake: no supported subprotocol");
                    return Err(reject(StatusCode::BAD_REQUEST, "unsupported subprotocol"));
                };

                if self.sessions.is_connected(&id) {
                    warn!(%addr, charge_point_id = %id, "Rejected handshake: already connected");
                    return Err(reject(StatusCode::CONFLICT, "charge point already connected"));
                }

                let Ok(value) = HeaderValue::from_str(subprotocol) else {
                    return Err(reject(StatusCode::BAD_REQUEST, "unsupported subprotocol"));
                };
                response.headers_mut().insert(SUBPROTOCOL_HEADER, value);
                accepted = Some((id, subprotocol.to_string()));
                Ok(response)
            },
        )
        .await;

        let ws = match handshake {
            Ok(ws) => ws,
            Err(e) => {
                warn!(%addr, error = %e, "WebSocket handshake failed");
                return;
            }
        };
        let Some((charge_point_id, subprotocol)) = accepted else {
            return;
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = match self.sessions.register(&charge_point_id, &subprotocol, tx) {
            Ok(connection_id) => connection_id,
            Err(e) => {
                // lost a race with a concurrent handshake for the same id
                warn!(%addr, charge_point_id = %charge_point_id, error = %e, "Dropping connection");
                return;
            }
        };
        info!(%addr, charge_point_id = %charge_point_id, subprotocol = %subprotocol, "Charge point connected");

        self.handler.on_connect(&ChannelInfo {
            id: charge_point_id.clone(),
            subprotocol,
            remote_addr: Some(addr),
        });

        let sessions = self.sessions.clone();
        let touch_id = charge_point_id.clone();
        let cause = run_link(
            ws,
            &charge_point_id,
            rx,
            self.handler.as_ref(),
            self.liveness,
            &self.shutdown,
            move || sessions.touch(&touch_id),
        )
        .await;

        // The id stays taken until its requests are drained, so a reconnect
        // cannot admit work that this drain would cancel.
        info!(charge_point_id = %charge_point_id, %cause, "Charge point disconnected");
        self.handler.on_disconnect(&charge_point_id, cause);
        self.sessions.unregister(&charge_point_id, connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_point_id_is_the_segment_after_the_base_path() {
        assert_eq!(extract_charge_point_id("/ocpp", "/ocpp/CP001"), Some("CP001".into()));
        assert_eq!(extract_charge_point_id("", "/CP001"), Some("CP001".into()));
        assert_eq!(extract_charge_point_id("/ocpp", "/ocpp/"), None);
        assert_eq!(extract_charge_point_id("/ocpp", "/other/CP001"), None);
        assert_eq!(extract_charge_point_id("/ocpp", "/ocpp/a/b"), None);
        assert_eq!(extract_charge_point_id("", "/"), None);
    }

    #[test]
    fn base_paths_are_normalized() {
        assert_eq!(normalize_base_path(""), "");
        assert_eq!(normalize_base_path("/"), "");
        assert_eq!(normalize_base_path("ocpp/"), "/ocpp");
        assert_eq!(normalize_base_path("/ocpp"), "/ocpp");
    }
}
