//! IPC Server
//!
//! Accepts local client connections and forwards their requests to the
//! engine task. Each connection gets its own notification sink; a writer
//! task interleaves responses and notifications on the socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};

use super::{is_disconnect, read_frame, write_frame};
use crate::error::{Error, Result};
use crate::protocol::{Notification, Request, Response, ServerFrame};
use crate::quorum::ConnectionId;

/// Events raised by client connections
#[derive(Debug)]
pub enum IpcEvent {
    /// A client connected; notifications for it go to `sink`
    Connected {
        conn: ConnectionId,
        sink: mpsc::UnboundedSender<Notification>,
    },
    /// A request awaiting its response
    Request {
        conn: ConnectionId,
        request: Request,
        reply: oneshot::Sender<Response>,
    },
    /// The client went away
    Disconnected { conn: ConnectionId },
}

/// IPC server for local clients
pub struct IpcServer {
    /// Bind address
    bind_address: String,
    /// Channel to the engine task
    events: mpsc::UnboundedSender<IpcEvent>,
    /// Next connection id
    next_conn: Arc<AtomicU64>,
    /// Shutdown signal
    shutdown: watch::Sender<bool>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(bind_address: String, events: mpsc::UnboundedSender<IpcEvent>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            bind_address,
            events,
            next_conn: Arc::new(AtomicU64::new(1)),
            shutdown,
        }
    }

    /// Bind and serve until stopped
    pub async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_address).await?;
        tracing::info!("IPC server listening on {}", self.bind_address);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let conn = self.next_conn.fetch_add(1, Ordering::Relaxed);
                            let events = self.events.clone();
                            tracing::debug!("Client {} connected from {}", conn, addr);

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(socket, conn, events.clone()).await {
                                    tracing::warn!("Connection {} error: {}", conn, e);
                                }
                                let _ = events.send(IpcEvent::Disconnected { conn });
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("IPC server stopped");
        Ok(())
    }

    /// Stop the server
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Handle a single client connection
async fn handle_connection(
    socket: TcpStream,
    conn: ConnectionId,
    events: mpsc::UnboundedSender<IpcEvent>,
) -> Result<()> {
    socket.set_nodelay(true)?;
    let (mut reader, mut writer) = socket.into_split();

    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    let (response_tx, mut response_rx) = mpsc::unbounded_channel::<Response>();

    events
        .send(IpcEvent::Connected {
            conn,
            sink: notify_tx,
        })
        .map_err(|_| Error::ShuttingDown)?;

    let writer_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                Some(response) = response_rx.recv() => ServerFrame::Response(response),
                Some(notification) = notify_rx.recv() => ServerFrame::Notification(notification),
                else => break,
            };
            if let Err(e) = write_frame(&mut writer, &frame).await {
                tracing::debug!("Connection {} write failed: {}", conn, e);
                break;
            }
        }
    });

    let result = loop {
        let request: Request = match read_frame(&mut reader).await {
            Ok(request) => request,
            Err(e) if is_disconnect(&e) => break Ok(()),
            Err(e) => break Err(e),
        };
        tracing::trace!("Received {} from connection {}", request.type_name(), conn);

        let (reply_tx, reply_rx) = oneshot::channel();
        if events
            .send(IpcEvent::Request {
                conn,
                request,
                reply: reply_tx,
            })
            .is_err()
        {
            break Err(Error::ShuttingDown);
        }
        let response = match reply_rx.await {
            Ok(response) => response,
            Err(_) => break Err(Error::ShuttingDown),
        };
        if response_tx.send(response).is_err() {
            break Ok(());
        }
    };

    // The engine drops the notification sink on disconnect
    drop(response_tx);
    writer_task.abort();
    result
}
