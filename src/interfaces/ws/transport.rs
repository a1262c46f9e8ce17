//! Transport lifecycle upcalls and the per-connection loop
//!
//! Server and client share [`run_link`]: one task per WebSocket that writes
//! queued frames, reads inbound frames, pings the peer, and exits on close,
//! error, missed pongs or shutdown.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::support::shutdown::ShutdownSignal;

/// Connection metadata passed to [`ConnectionHandler::on_connect`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    /// Client id: the last path segment of the connection URL.
    pub id: String,
    pub subprotocol: String,
    pub remote_addr: Option<SocketAddr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectCause {
    /// The peer sent a close frame or the stream ended.
    Closed,
    /// No pong came back for this many consecutive pings.
    MissedPongs(u32),
    Error(String),
    /// The local endpoint is stopping.
    Shutdown,
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectCause::Closed => write!(f, "closed by peer"),
            DisconnectCause::MissedPongs(n) => write!(f, "{} pings unanswered", n),
            DisconnectCause::Error(e) => write!(f, "transport error: {}", e),
            DisconnectCause::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Upcalls from a transport to the endpoint above it.
///
/// Called from the connection loop: implementations must not block.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn on_connect(&self, channel: &ChannelInfo);

    fn on_message(&self, channel: &str, text: &str);

    /// Called once per connection, after the link is gone and can no longer
    /// be written to.
    fn on_disconnect(&self, channel: &str, cause: DisconnectCause);
}

/// Ping settings of a link. A zero interval disables pings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Liveness {
    pub ping_interval: Duration,
    pub max_missed_pongs: u32,
}

impl Default for Liveness {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            max_missed_pongs: 2,
        }
    }
}

/// Drive one WebSocket until it ends. Frames queued on `outbound` are the
/// only writes to the socket besides pings and the final close.
pub(crate) async fn run_link<S>(
    ws: WebSocketStream<S>,
    channel: &str,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    handler: &dyn ConnectionHandler,
    liveness: Liveness,
    shutdown: &ShutdownSignal,
    on_activity: impl Fn() + Send + Sync,
) -> DisconnectCause
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut ws_sender, mut ws_receiver) = ws.split();

    let pinging = !liveness.ping_interval.is_zero();
    let period = if pinging {
        liveness.ping_interval
    } else {
        Duration::from_secs(3600)
    };
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let mut missed_pongs = 0u32;

    let cause = loop {
        tokio::select! {
            outgoing = outbound.recv() => {
                let Some(message) = outgoing else {
                    break DisconnectCause::Shutdown;
                };
                if let Message::Text(text) = &message {
                    debug!(channel, frame = %text, "-> frame");
                }
                if let Err(e) = ws_sender.send(message).await {
                    warn!(channel, error = %e, "Send error");
                    break DisconnectCause::Error(e.to_string());
                }
            }
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        debug!(channel, frame = %text, "<- frame");
                        on_activity();
                        handler.on_message(channel, &text);
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite queues the pong and flushes it with the next write
                        debug!(channel, "Ping received");
                        on_activity();
                        if let Err(e) = ws_sender.flush().await {
                            break DisconnectCause::Error(e.to_string());
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        debug!(channel, "Pong received");
                        missed_pongs = 0;
                        on_activity();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(channel, ?frame, "Close frame received");
                        break DisconnectCause::Closed;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        warn!(channel, bytes = data.len(), "Binary message received, ignoring");
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        warn!(channel, error = %e, "WebSocket error");
                        break DisconnectCause::Error(e.to_string());
                    }
                    None => break DisconnectCause::Closed,
                }
            }
            _ = ticker.tick(), if pinging => {
                if missed_pongs >= liveness.max_missed_pongs {
                    warn!(channel, missed_pongs, "Peer stopped answering pings");
                    break DisconnectCause::MissedPongs(missed_pongs);
                }
                missed_pongs += 1;
                if let Err(e) = ws_sender.send(Message::Ping(Vec::new())).await {
                    break DisconnectCause::Error(e.to_string());
                }
            }
            _ = shutdown.notified().wait() => {
                break DisconnectCause::Shutdown;
            }
        }
    };

    if matches!(cause, DisconnectCause::Shutdown | DisconnectCause::MissedPongs(_)) {
        let _ = ws_sender.send(Message::Close(None)).await;
    }
    let _ = ws_sender.close().await;
    cause
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    struct Quiet;

    impl ConnectionHandler for Quiet {
        fn on_connect(&self, _: &ChannelInfo) {}
        fn on_message(&self, _: &str, _: &str) {}
        fn on_disconnect(&self, _: &str, _: DisconnectCause) {}
    }

    async fn socket_pair() -> (WebSocketStream<TcpStream>, WebSocketStream<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::join!(
            async {
                let (stream, _) = listener.accept().await.unwrap();
                tokio_tungstenite::accept_async(stream).await.unwrap()
            },
            async {
                let stream = TcpStream::connect(addr).await.unwrap();
                tokio_tungstenite::client_async(format!("ws://{}/CP001", addr), stream)
                    .await
                    .unwrap()
                    .0
            },
        )
    }

    fn fast_pings() -> Liveness {
        Liveness {
            ping_interval: Duration::from_millis(50),
            max_missed_pongs: 2,
        }
    }

    #[tokio::test]
    async fn silent_peer_is_dropped_after_missed_pongs() {
        // The peer is never polled, so it never answers a ping.
        let (local, _peer) = socket_pair().await;
        let (_tx, rx) = mpsc::unbounded_channel::<Message>();

        let cause = tokio::time::timeout(
            Duration::from_secs(2),
            run_link(local, "CP001", rx, &Quiet, fast_pings(), &ShutdownSignal::new(), || {}),
        )
        .await
        .expect("link outlived its missed pongs");
        assert_eq!(cause, DisconnectCause::MissedPongs(2));
    }

    #[tokio::test]
    async fn answering_peer_keeps_the_link_up() {
        let (local, mut peer) = socket_pair().await;
        let reader = tokio::spawn(async move { while let Some(Ok(_)) = peer.next().await {} });
        let (_tx, rx) = mpsc::unbounded_channel::<Message>();
        let shutdown = ShutdownSignal::new();
        let stop = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            stop.trigger();
        });

        let cause = tokio::time::timeout(
            Duration::from_secs(2),
            run_link(local, "CP001", rx, &Quiet, fast_pings(), &shutdown, || {}),
        )
        .await
        .expect("shutdown did not end the link");
        assert_eq!(cause, DisconnectCause::Shutdown);
        reader.abort();
    }
}
