//! IPC Client
//!
//! One connection to the daemon. Requests are answered in order;
//! notifications that arrive while waiting for a response are queued.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{read_frame, write_frame};
use crate::error::{Error, Result};
use crate::protocol::{Notification, Request, Response, ServerFrame};

/// Client connection to a quorum daemon
pub struct IpcClient {
    address: String,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    /// Notifications received ahead of a response
    pending: VecDeque<Notification>,
    /// Request timeout
    request_timeout: Duration,
}

impl IpcClient {
    /// Connect to `address`
    pub async fn connect(address: &str, request_timeout: Duration) -> Result<Self> {
        let stream = match timeout(request_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(Error::Network(format!(
                    "Failed to connect to {}: {}",
                    address, e
                )))
            }
            Err(_) => return Err(Error::ConnectionTimeout(address.to_string())),
        };
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            address: address.to_string(),
            reader,
            writer,
            pending: VecDeque::new(),
            request_timeout,
        })
    }

    /// Send a request and wait for its response
    pub async fn request(&mut self, request: Request) -> Result<Response> {
        let limit = self.request_timeout;
        match timeout(limit, self.request_inner(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionTimeout(self.address.clone())),
        }
    }

    async fn request_inner(&mut self, request: Request) -> Result<Response> {
        write_frame(&mut self.writer, &request).await?;
        loop {
            match read_frame(&mut self.reader).await? {
                ServerFrame::Response(response) => return Ok(response),
                ServerFrame::Notification(notification) => self.pending.push_back(notification),
            }
        }
    }

    /// Wait for the next notification
    pub async fn next_notification(&mut self) -> Result<Notification> {
        if let Some(notification) = self.pending.pop_front() {
            return Ok(notification);
        }
        loop {
            match read_frame(&mut self.reader).await? {
                ServerFrame::Notification(notification) => return Ok(notification),
                ServerFrame::Response(response) => {
                    tracing::warn!("Discarding unsolicited response: {:?}", response);
                }
            }
        }
    }
}
