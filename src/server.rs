//! WebSocket transport
//!
//! Accepts browser connections on one path and ties each socket to a
//! session: inbound text and binary messages go to
//! [`SessionManager::dispatch`], device output comes back as binary frames.
//! Everything runs on the current `LocalSet`.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::core::{SessionManager, TerminalApp, WireMessage};

/// How long connections get to send their close frame on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Accept connections until `cancel` fires, then close every live session
pub async fn serve<A>(
    listener: TcpListener,
    path: &str,
    manager: Rc<RefCell<SessionManager<A>>>,
    cancel: CancellationToken,
) -> anyhow::Result<()>
where
    A: TerminalApp + 'static,
{
    let addr = listener.local_addr().context("listener has no local address")?;
    info!("Listening on ws://{}{}", addr, path);
    let path: Rc<str> = Rc::from(path);
    let connections = TaskTracker::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("Connection accepted from {}", peer);
                    let path = Rc::clone(&path);
                    let manager = Rc::clone(&manager);
                    let cancel = cancel.clone();
                    connections.spawn_local(async move {
                        if let Err(e) = handle_connection(stream, path, manager, cancel).await {
                            warn!("Connection from {}: {:#}", peer, e);
                        }
                        info!("Connection from {} closed", peer);
                    });
                }
                Err(e) => warn!("Accept failed: {}", e),
            }
        }
    }

    // Let each connection send its close frame before the runtime goes away
    connections.close();
    if tokio::time::timeout(SHUTDOWN_GRACE, connections.wait()).await.is_err() {
        warn!("{} connections still open after {:?}", connections.len(), SHUTDOWN_GRACE);
    }

    let mut manager = manager.borrow_mut();
    let live = manager.count();
    manager.close_all();
    info!("Server stopped ({} sessions left open)", live);
    Ok(())
}

/// Reject upgrade requests for any other path
#[allow(clippy::result_large_err)]
fn check_path(request: &Request, path: &str) -> Result<(), ErrorResponse> {
    if request.uri().path() == path {
        return Ok(());
    }
    let mut response = ErrorResponse::new(Some("Not found".to_string()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    Err(response)
}

async fn handle_connection<A>(
    stream: TcpStream,
    path: Rc<str>,
    manager: Rc<RefCell<SessionManager<A>>>,
    cancel: CancellationToken,
) -> anyhow::Result<()>
where
    A: TerminalApp + 'static,
{
    stream.set_nodelay(true)?;
    let ws = tokio_tungstenite::accept_hdr_async(stream, move |request: &Request, response: Response| {
        check_path(request, &path)?;
        Ok(response)
    })
    .await
    .context("WebSocket handshake failed")?;

    let (mut writer, mut reader) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = manager.borrow_mut().open(tx);

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = writer.send(Message::Close(None)).await;
                break Ok(());
            }
            Some(bytes) = rx.recv() => {
                if let Err(e) = writer.send(Message::Binary(bytes.to_vec())).await {
                    break Err(anyhow::Error::new(e).context("send failed"));
                }
            }
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    manager.borrow_mut().dispatch(id, WireMessage::Text(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    manager.borrow_mut().dispatch(id, WireMessage::Binary(data));
                }
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = writer.send(Message::Pong(payload)).await {
                        break Err(anyhow::Error::new(e).context("send failed"));
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    // Flushes the close reply tungstenite queued on receipt
                    let _ = writer.close().await;
                    break Ok(());
                }
                None => break Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(anyhow::Error::new(e).context("receive failed")),
            }
        }
    };

    if let Some(session) = manager.borrow().get(id) {
        let stats = session.stats();
        debug!(
            session = id,
            "{} resizes, {} frames dropped, {} bytes in",
            stats.resizes,
            stats.frames_dropped,
            stats.bytes_in
        );
    }
    if !manager.borrow_mut().close(id) {
        debug!(session = id, "session already closed");
    }
    result
}

/// Address a listener bound to `bind` should be reached at, for the banner
pub fn display_addr(bind: SocketAddr) -> SocketAddr {
    if bind.ip().is_unspecified() {
        SocketAddr::from(([127, 0, 0, 1], bind.port()))
    } else {
        bind
    }
}
