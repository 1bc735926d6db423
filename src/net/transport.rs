//! WebTransport server implementation
//!
//! One bidirectional stream per session. The first frame must be a Join;
//! after that a reader loop feeds requests into the match queue while a
//! writer task drains the session's outbound queue onto the stream.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::game::request_queue::{RequestQueueError, RequestSender};
use crate::lobby::session::SessionId;
use crate::metrics::Metrics;
use crate::net::framing::{read_frame, write_frame, write_message, FramingError};
use crate::net::match_server::{MatchServer, Outbound, SessionRouter, Target};
use crate::net::protocol::{decode, ClientMessage, ServerMessage};
use crate::net::tls::TlsConfig;

pub struct WebTransportServer {
    config: ServerConfig,
    tls_config: TlsConfig,
    match_server: Arc<RwLock<MatchServer>>,
    router: Arc<SessionRouter>,
    metrics: Arc<Metrics>,
}

impl WebTransportServer {
    pub async fn new(
        config: ServerConfig,
        match_server: Arc<RwLock<MatchServer>>,
        router: Arc<SessionRouter>,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        let tls_config = TlsConfig::load(&config).await?;
        Ok(Self {
            config,
            tls_config,
            match_server,
            router,
            metrics,
        })
    }

    pub fn cert_hash(&self) -> &str {
        self.tls_config.cert_hash()
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.config.bind_address, self.config.port)
    }

    /// Accept connections until the endpoint fails
    pub async fn run(self) -> anyhow::Result<()> {
        use wtransport::Endpoint;

        let addr = self.bind_addr();
        let server_config = wtransport::ServerConfig::builder()
            .with_bind_address(addr)
            .with_identity(self.tls_config.identity)
            .build();
        let endpoint = Endpoint::server(server_config)?;
        info!("WebTransport server listening on {}", addr);

        loop {
            let incoming = endpoint.accept().await;
            let match_server = self.match_server.clone();
            let router = self.router.clone();
            let metrics = self.metrics.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(incoming, match_server, router, metrics).await {
                    warn!("Connection error: {}", e);
                }
            });
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

async fn handle_connection(
    incoming: wtransport::endpoint::IncomingSession,
    match_server: Arc<RwLock<MatchServer>>,
    router: Arc<SessionRouter>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<()> {
    let session_request = incoming.await?;
    debug!(
        "New connection from {:?}, path {}",
        session_request.authority(),
        session_request.path()
    );
    let connection = session_request.accept().await?;
    let (mut send, mut recv) = connection.accept_bi().await?;

    metrics.connections_active.fetch_add(1, Ordering::Relaxed);
    let result = serve_session(&mut send, &mut recv, &match_server, &router, &metrics).await;
    metrics.connections_active.fetch_sub(1, Ordering::Relaxed);

    if let Ok(Some(session)) = result {
        router.unregister(session);
        match_server.write().await.disconnect(session);
        debug!("Session {} cleaned up", session);
    }
    result.map(|_| ())
}

/// Run one session to completion. Returns the session id if the join
/// succeeded, so the caller can tear it down.
async fn serve_session(
    send: &mut wtransport::SendStream,
    recv: &mut wtransport::RecvStream,
    match_server: &Arc<RwLock<MatchServer>>,
    router: &Arc<SessionRouter>,
    metrics: &Arc<Metrics>,
) -> anyhow::Result<Option<SessionId>> {
    let name = match read_client_message(recv, metrics).await? {
        Some(ClientMessage::Join { name }) => name,
        Some(other) => {
            debug!("Expected Join, got {:?}", other);
            return Ok(None);
        }
        None => return Ok(None),
    };

    // Register the outbound queue under the same lock as connect, so the
    // JoinAccepted queued by connect cannot be dispatched before it exists
    let (session, mut outbound, requests) = {
        let mut server = match_server.write().await;
        match server.connect(&name) {
            Ok(session) => (session, router.register(session), server.request_sender()),
            Err(e) => {
                drop(server);
                info!("Rejected join from '{}': {}", name, e);
                let reply = ServerMessage::JoinRejected { reason: e.to_string() };
                write_message(send, &reply).await?;
                return Ok(None);
            }
        }
    };

    let writer = async {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = write_frame(send, &frame).await {
                debug!("Session {} write failed: {}", session, e);
                break;
            }
        }
    };
    let reader = read_loop(session, recv, &requests, router, metrics);

    // Whichever side finishes first ends the session
    tokio::select! {
        _ = writer => debug!("Session {} outbound closed", session),
        _ = reader => debug!("Session {} inbound closed", session),
    }
    Ok(Some(session))
}

/// Read one client message. `Ok(None)` on a clean close.
async fn read_client_message(
    recv: &mut wtransport::RecvStream,
    metrics: &Metrics,
) -> Result<Option<ClientMessage>, FramingError> {
    loop {
        let frame = match read_frame(recv).await {
            Ok(frame) => frame,
            Err(FramingError::ConnectionClosed) => return Ok(None),
            Err(e) => return Err(e),
        };
        metrics.messages_received.fetch_add(1, Ordering::Relaxed);
        metrics
            .bytes_received
            .fetch_add(frame.len() as u64 + 4, Ordering::Relaxed);

        match decode::<ClientMessage>(&frame) {
            Ok(message) => return Ok(Some(message)),
            // The frame is consumed, the stream is still aligned
            Err(e) => warn!("Failed to decode client message: {}", e),
        }
    }
}

async fn read_loop(
    session: SessionId,
    recv: &mut wtransport::RecvStream,
    requests: &RequestSender,
    router: &SessionRouter,
    metrics: &Metrics,
) {
    loop {
        let message = match read_client_message(recv, metrics).await {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(e) => {
                debug!("Session {} read failed: {}", session, e);
                break;
            }
        };

        match message {
            ClientMessage::Request(kind) => match requests.try_send(session, kind) {
                Ok(()) => {}
                Err(RequestQueueError::Full) => {
                    warn!("Request queue full, dropping request from session {}", session);
                }
                Err(RequestQueueError::Disconnected) => break,
            },
            ClientMessage::Ping { timestamp } => {
                let pong = ServerMessage::Pong {
                    client_timestamp: timestamp,
                    server_timestamp: now_millis(),
                };
                router.dispatch(
                    vec![Outbound {
                        target: Target::To(session),
                        message: pong,
                    }],
                    metrics,
                );
            }
            ClientMessage::Leave => {
                debug!("Session {} left", session);
                break;
            }
            ClientMessage::Join { .. } => debug!("Session {} sent a second Join, ignored", session),
        }
    }
}
