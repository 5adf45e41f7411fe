//! UDP datagram sink

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use super::{Sink, SINK_WRITE_BUDGET};
use crate::error::{BridgeError, Result};

/// One datagram per sentence or frame to a fixed target
#[derive(Debug)]
pub struct UdpSink {
    target: SocketAddr,
    socket: Option<UdpSocket>,
}

impl UdpSink {
    /// Bind an ephemeral port and connect it to `target`
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SinkUnavailable`] if the target does not parse
    /// or the socket cannot be bound or connected
    pub async fn connect(target: &str) -> Result<Self> {
        let target: SocketAddr = target
            .parse()
            .map_err(|e| BridgeError::SinkUnavailable(format!("bad UDP target {:?}: {}", target, e)))?;

        let bind = if target.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };

        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| BridgeError::SinkUnavailable(format!("cannot bind UDP socket: {}", e)))?;
        socket
            .connect(target)
            .await
            .map_err(|e| BridgeError::SinkUnavailable(format!("cannot connect to {}: {}", target, e)))?;

        Ok(Self {
            target,
            socket: Some(socket),
        })
    }
}

#[async_trait]
impl Sink for UdpSink {
    async fn write(&mut self, frame: &[u8]) -> Result<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| BridgeError::SinkWriteFailed("UDP sink closed".to_string()))?;

        let result = match timeout(SINK_WRITE_BUDGET, socket.writable()).await {
            Ok(Ok(())) => socket.try_send(frame),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::ErrorKind::WouldBlock.into()),
        };

        match result {
            Ok(sent) if sent == frame.len() => Ok(()),
            Ok(sent) => Err(BridgeError::SinkWriteFailed(format!(
                "short datagram to {}: {} of {} bytes",
                self.target,
                sent,
                frame.len()
            ))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(BridgeError::SinkWriteFailed(
                format!("socket buffer full for {}", self.target),
            )),
            // Includes ECONNREFUSED reported from an earlier datagram
            Err(e) => Err(BridgeError::SinkWriteFailed(format!("send to {}: {}", self.target, e))),
        }
    }

    async fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!("Closed UDP sink to {}", self.target);
        }
    }

    fn describe(&self) -> String {
        format!("udp://{}", self.target)
    }
}
