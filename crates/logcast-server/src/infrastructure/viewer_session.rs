//! Per-viewer connection handler.
//!
//! One task per browser tab.  The task owns the upgraded WebSocket and walks
//! the viewer through its lifecycle:
//!
//! ```text
//! Accepted ──upgrade──► Registered ──► Active ──► Closing ──► Closed
//! ```
//!
//! While `Active` it does three things at once:
//!
//! - drains its outbound channel (filled by the broadcaster) into text frames,
//!   each bounded by the configured write timeout;
//! - reads and discards whatever the browser sends, watching for a close;
//! - waits for the session close signal, which the server raises only after
//!   the hand-off queue has been closed.
//!
//! Whichever finishes first ends the session.  Outbound frames are never
//! logged here: every log line would become another broadcast, and the viewer
//! would keep itself busy forever.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use logcast_core::{Registration, ViewerHandle, ViewerRegistry, ViewerState};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::domain::ServerConfig;

/// Buffer size and write timeout a session needs from the server
/// configuration.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub viewer_buffer: usize,
    pub write_timeout: Duration,
}

impl SessionLimits {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            viewer_buffer: config.viewer_buffer,
            write_timeout: config.write_timeout,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The browser sent a close frame.
    PeerClosed,
    /// The stream ended without a close frame.
    StreamEnded,
    /// The server is shutting down.
    Shutdown,
    /// An outbound frame did not go out within the write timeout.
    WriteTimeout,
    /// Writing an outbound frame failed.
    WriteFailed(String),
    /// Reading from the browser failed.
    ReadFailed(String),
    /// The outbound channel closed under us.
    Unregistered,
}

impl CloseReason {
    /// `true` when the session ended because something went wrong.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            CloseReason::WriteTimeout | CloseReason::WriteFailed(_) | CloseReason::ReadFailed(_)
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => f.write_str("closed by viewer"),
            CloseReason::StreamEnded => f.write_str("connection dropped"),
            CloseReason::Shutdown => f.write_str("server shutting down"),
            CloseReason::WriteTimeout => f.write_str("write timed out"),
            CloseReason::WriteFailed(e) => write!(f, "write failed: {e}"),
            CloseReason::ReadFailed(e) => write!(f, "read failed: {e}"),
            CloseReason::Unregistered => f.write_str("outbound channel closed"),
        }
    }
}

/// Runs one upgraded viewer socket until it closes.
///
/// The viewer is in `registry` from the moment the session starts until it
/// begins closing.  If the task is dropped mid-session, the registration
/// guard still removes it.
pub async fn handle_viewer<S>(
    socket: S,
    peer: SocketAddr,
    registry: ViewerRegistry,
    limits: SessionLimits,
    close: CancellationToken,
) -> CloseReason
where
    S: Stream<Item = Result<Message, axum::Error>> + Sink<Message, Error = axum::Error>,
{
    let mut state = ViewerState::Accepted;
    let (mut sink, mut source) = socket.split();

    let (handle, mut outbound) = ViewerHandle::channel(peer.to_string(), limits.viewer_buffer);
    let registration = registry.register(handle);
    let viewer = registration.id();
    transition(&mut state, ViewerState::Registered, peer);
    info!(viewer = %viewer, peer = %peer, viewers = registry.len(), "viewer connected");

    transition(&mut state, ViewerState::Active, peer);
    let reason = loop {
        tokio::select! {
            _ = close.cancelled() => break CloseReason::Shutdown,
            payload = outbound.recv() => {
                let Some(payload) = payload else {
                    break CloseReason::Unregistered;
                };
                let frame = Message::Text(Utf8Bytes::from(payload.to_string()));
                match timeout(limits.write_timeout, sink.send(frame)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => break CloseReason::WriteFailed(e.to_string()),
                    Err(_) => break CloseReason::WriteTimeout,
                }
            }
            inbound = source.next() => match inbound {
                Some(Ok(Message::Close(_))) => break CloseReason::PeerClosed,
                Some(Ok(msg)) => {
                    debug!(viewer = %viewer, kind = frame_kind(&msg), "inbound frame discarded");
                }
                Some(Err(e)) => break CloseReason::ReadFailed(e.to_string()),
                None => break CloseReason::StreamEnded,
            },
        }
    };

    transition(&mut state, ViewerState::Closing, peer);
    finish(registration, &registry, &reason);
    close_sink(&mut sink, &reason, limits.write_timeout).await;
    transition(&mut state, ViewerState::Closed, peer);

    if reason.is_error() {
        warn!(viewer = %viewer, peer = %peer, "viewer disconnected: {reason}");
    } else {
        info!(viewer = %viewer, peer = %peer, "viewer disconnected: {reason}");
    }
    reason
}

/// The live viewer sessions of one server.
///
/// Sessions get two signals.  `close` asks them to send their close frame
/// and finish; the server raises it only after the hand-off queue is closed.
/// `abort` drops whatever is still running once the grace period is over.
#[derive(Debug, Clone, Default)]
pub struct SessionSet {
    tracker: TaskTracker,
    close: CancellationToken,
    abort: CancellationToken,
}

impl SessionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps one upgraded socket in a tracked session future.
    pub fn session<S>(
        &self,
        socket: S,
        peer: SocketAddr,
        registry: ViewerRegistry,
        limits: SessionLimits,
    ) -> impl Future<Output = ()> + Send + 'static
    where
        S: Stream<Item = Result<Message, axum::Error>>
            + Sink<Message, Error = axum::Error>
            + Send
            + 'static,
    {
        let close = self.close.clone();
        let abort = self.abort.clone();
        self.tracker.track_future(async move {
            tokio::select! {
                reason = handle_viewer(socket, peer, registry, limits, close) => {
                    debug!(peer = %peer, %reason, "viewer session finished");
                }
                _ = abort.cancelled() => warn!(peer = %peer, "viewer session aborted"),
            }
        })
    }

    /// Number of sessions still running.
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Tells every session, current and future, to close.
    pub fn close(&self) {
        self.tracker.close();
        self.close.cancel();
    }

    /// Waits up to `grace` for the sessions to finish after [`close`], then
    /// aborts the rest.
    ///
    /// [`close`]: SessionSet::close
    pub async fn drain(&self, grace: Duration) {
        if self.tracker.is_empty() {
            return;
        }
        debug!(sessions = self.tracker.len(), grace = ?grace, "waiting for viewer sessions to close");

        if timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                remaining = self.tracker.len(),
                "viewer sessions did not close within the grace period; aborting"
            );
            self.abort.cancel();
            self.tracker.wait().await;
        }
    }
}

fn finish(registration: Registration, registry: &ViewerRegistry, reason: &CloseReason) {
    let id = registration.id();
    if registration.release() {
        trace!(viewer = %id, remaining = registry.len(), %reason, "viewer unregistered");
    }
}

/// Best-effort close handshake.  Errors are ignored; the socket is dropped
/// right after either way.
async fn close_sink<K>(sink: &mut K, reason: &CloseReason, write_timeout: Duration)
where
    K: Sink<Message, Error = axum::Error> + Unpin,
{
    match reason {
        CloseReason::Shutdown => {
            let frame = CloseFrame {
                code: close_code::AWAY,
                reason: Utf8Bytes::from_static("server shutting down"),
            };
            let _ = timeout(write_timeout, sink.send(Message::Close(Some(frame)))).await;
        }
        // Flushes the reply queued for the viewer's close frame.
        CloseReason::PeerClosed | CloseReason::Unregistered => {
            let _ = timeout(write_timeout, sink.close()).await;
        }
        // The transport is already broken or stuck.
        _ => {}
    }
}

fn frame_kind(msg: &Message) -> &'static str {
    match msg {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
    }
}

fn transition(state: &mut ViewerState, next: ViewerState, peer: SocketAddr) {
    match state.advance(next) {
        Ok(()) => trace!(peer = %peer, state = %next, "viewer state changed"),
        Err(e) => warn!(peer = %peer, "{e}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::task::{Context, Poll};

    use axum::extract::ws::{WebSocket, WebSocketUpgrade};
    use axum::routing::get;
    use axum::Router;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::Message as ClientMessage;
    use tokio_tungstenite::connect_async;

    fn limits() -> SessionLimits {
        SessionLimits {
            viewer_buffer: 16,
            write_timeout: Duration::from_secs(2),
        }
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    /// Serves `/ws` with `handle_viewer` and reports each session's reason.
    async fn serve(
        registry: ViewerRegistry,
        close: CancellationToken,
    ) -> (SocketAddr, mpsc::UnboundedReceiver<CloseReason>) {
        let (reasons_tx, reasons_rx) = mpsc::unbounded_channel();
        let app = Router::new().route(
            "/ws",
            get(move |ws: WebSocketUpgrade| {
                let registry = registry.clone();
                let close = close.clone();
                let reasons_tx = reasons_tx.clone();
                async move {
                    ws.on_upgrade(move |socket| async move {
                        let reason = handle_viewer(socket, peer(), registry, limits(), close).await;
                        let _ = reasons_tx.send(reason);
                    })
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        (addr, reasons_rx)
    }

    async fn wait_for_viewers(registry: &ViewerRegistry, n: usize) {
        for _ in 0..400 {
            if registry.len() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("registry never reached {n} viewers (has {})", registry.len());
    }

    async fn next_reason(rx: &mut mpsc::UnboundedReceiver<CloseReason>) -> CloseReason {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("session did not finish")
            .expect("reason channel closed")
    }

    #[test]
    fn test_session_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        fn check(socket: WebSocket, registry: ViewerRegistry, close: CancellationToken) {
            assert_send(&handle_viewer(socket, peer(), registry, limits(), close));
        }
        let _ = check;
    }

    #[test]
    fn test_close_reason_error_classification() {
        assert!(!CloseReason::PeerClosed.is_error());
        assert!(!CloseReason::Shutdown.is_error());
        assert!(!CloseReason::StreamEnded.is_error());
        assert!(CloseReason::WriteTimeout.is_error());
        assert!(CloseReason::ReadFailed("x".into()).is_error());
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::Shutdown.to_string(), "server shutting down");
        assert_eq!(
            CloseReason::WriteFailed("broken pipe".into()).to_string(),
            "write failed: broken pipe"
        );
    }

    #[test]
    fn test_limits_from_config() {
        let config = ServerConfig {
            viewer_buffer: 7,
            write_timeout: Duration::from_secs(3),
            ..ServerConfig::default()
        };
        let limits = SessionLimits::from_config(&config);
        assert_eq!(limits.viewer_buffer, 7);
        assert_eq!(limits.write_timeout, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_session_delivers_and_unregisters_on_peer_close() {
        // Arrange
        let registry = ViewerRegistry::new();
        let (addr, mut reasons) = serve(registry.clone(), CancellationToken::new()).await;
        let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        wait_for_viewers(&registry, 1).await;

        // Act
        for viewer in registry.snapshot() {
            viewer.try_deliver(Arc::from("hello")).unwrap();
        }
        let frame = client.next().await.unwrap().unwrap();
        client.close(None).await.unwrap();

        // Assert
        assert_eq!(frame, ClientMessage::Text("hello".to_string()));
        assert_eq!(next_reason(&mut reasons).await, CloseReason::PeerClosed);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_session_ignores_inbound_text() {
        let registry = ViewerRegistry::new();
        let (addr, mut reasons) = serve(registry.clone(), CancellationToken::new()).await;
        let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        wait_for_viewers(&registry, 1).await;

        client.send(ClientMessage::Text("ignored".to_string())).await.unwrap();
        for viewer in registry.snapshot() {
            viewer.try_deliver(Arc::from("still here")).unwrap();
        }

        assert_eq!(
            client.next().await.unwrap().unwrap(),
            ClientMessage::Text("still here".to_string())
        );
        client.close(None).await.unwrap();
        assert_eq!(next_reason(&mut reasons).await, CloseReason::PeerClosed);
    }

    #[tokio::test]
    async fn test_close_signal_sends_going_away() {
        // Arrange
        let registry = ViewerRegistry::new();
        let close = CancellationToken::new();
        let (addr, mut reasons) = serve(registry.clone(), close.clone()).await;
        let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        wait_for_viewers(&registry, 1).await;

        // Act
        close.cancel();

        // Assert
        match client.next().await.unwrap().unwrap() {
            ClientMessage::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Away),
            other => panic!("expected close frame, got {other:?}"),
        }
        assert_eq!(next_reason(&mut reasons).await, CloseReason::Shutdown);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_transport_ends_session() {
        let registry = ViewerRegistry::new();
        let (addr, mut reasons) = serve(registry.clone(), CancellationToken::new()).await;
        let (client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        wait_for_viewers(&registry, 1).await;

        drop(client);

        let reason = next_reason(&mut reasons).await;
        assert!(
            matches!(reason, CloseReason::StreamEnded | CloseReason::ReadFailed(_)),
            "{reason:?}"
        );
        assert!(registry.is_empty());
    }

    /// A socket that never yields a frame and never finishes a write.
    struct Stalled;

    impl Stream for Stalled {
        type Item = Result<Message, axum::Error>;

        fn poll_next(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Pending
        }
    }

    impl Sink<Message> for Stalled {
        type Error = axum::Error;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _: Message) -> Result<(), Self::Error> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }
    }

    #[tokio::test]
    async fn test_drain_with_no_sessions_returns_at_once() {
        let sessions = SessionSet::new();
        sessions.close();

        timeout(Duration::from_millis(100), sessions.drain(Duration::from_secs(60)))
            .await
            .expect("drain waited on an empty set");
    }

    #[tokio::test]
    async fn test_closed_sessions_drain_within_grace() {
        // Arrange
        let registry = ViewerRegistry::new();
        let sessions = SessionSet::new();
        let app = Router::new().route(
            "/ws",
            get({
                let registry = registry.clone();
                let sessions = sessions.clone();
                move |ws: WebSocketUpgrade| {
                    let registry = registry.clone();
                    let sessions = sessions.clone();
                    async move {
                        ws.on_upgrade(move |socket| sessions.session(socket, peer(), registry, limits()))
                    }
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        wait_for_viewers(&registry, 1).await;
        assert_eq!(sessions.len(), 1);

        // Act
        sessions.close();
        timeout(Duration::from_secs(2), sessions.drain(Duration::from_secs(1)))
            .await
            .expect("sessions did not drain");

        // Assert
        assert!(sessions.is_empty());
        assert!(registry.is_empty());
        match client.next().await.unwrap().unwrap() {
            ClientMessage::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Away),
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stalled_session_is_aborted_after_grace() {
        // Arrange
        let registry = ViewerRegistry::new();
        let sessions = SessionSet::new();
        let slow = SessionLimits {
            viewer_buffer: 4,
            write_timeout: Duration::from_secs(60),
        };
        tokio::spawn(sessions.session(Stalled, peer(), registry.clone(), slow));
        wait_for_viewers(&registry, 1).await;

        // Act
        sessions.close();
        timeout(Duration::from_secs(2), sessions.drain(Duration::from_millis(50)))
            .await
            .expect("stalled session was not aborted");

        // Assert
        assert!(sessions.is_empty());
        assert!(registry.is_empty());
    }
}
