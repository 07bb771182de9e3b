//! UDP transport
//!
//! The client sends `Packet_<n>_Time_<ms>` datagrams to the receiver, where
//! `ms` counts from transport creation. The server side only needs to know
//! that a datagram arrived.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use super::{SentUnit, Transport, TransportError};
use crate::link::ReadinessLevel;

const RECV_BUFFER_LEN: usize = 1500;

pub fn format_payload(index: u32, elapsed_ms: u128) -> String {
    format!("Packet_{}_Time_{}", index, elapsed_ms)
}

/// Packet index and timestamp of a well-formed payload
pub fn parse_payload(payload: &[u8]) -> Option<(u32, u64)> {
    let text = std::str::from_utf8(payload).ok()?;
    let rest = text.strip_prefix("Packet_")?;
    let (index, time) = rest.split_once("_Time_")?;
    Some((index.parse().ok()?, time.parse().ok()?))
}

pub struct UdpClient {
    target: SocketAddr,
    socket: Option<UdpSocket>,
    sent: u32,
    epoch: Instant,
}

impl UdpClient {
    pub fn new(target: SocketAddr) -> Self {
        Self {
            target,
            socket: None,
            sent: 0,
            epoch: Instant::now(),
        }
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn sent(&self) -> u32 {
        self.sent
    }
}

#[async_trait]
impl Transport for UdpClient {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn readiness(&self) -> ReadinessLevel {
        ReadinessLevel::AddressBound
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        let bind: SocketAddr = if self.target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| TransportError::NotInitialized(format!("udp bind: {}", e)))?;
        info!("UDP client ready, sending to {}", self.target);
        self.socket = Some(socket);
        Ok(())
    }

    async fn send_unit(&mut self) -> Result<SentUnit, TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::Closed)?;

        let index = self.sent + 1;
        let payload = format_payload(index, self.epoch.elapsed().as_millis());
        let len = socket
            .send_to(payload.as_bytes(), self.target)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        self.sent = index;

        debug!("sent {} to {}", payload, self.target);
        Ok(SentUnit { index, len })
    }

    async fn close(&mut self) {
        self.socket = None;
    }
}

/// A received datagram
#[derive(Debug, Clone)]
pub struct Datagram {
    pub from: SocketAddr,
    pub payload: Vec<u8>,
}

pub struct UdpServer {
    socket: UdpSocket,
}

impl UdpServer {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| TransportError::NotInitialized(format!("udp bind {}: {}", addr, e)))?;
        info!("UDP server listening on {}", addr);
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.socket.local_addr().map_err(|e| TransportError::NotInitialized(e.to_string()))
    }

    /// Wait up to `timeout` for one datagram
    pub async fn recv(&self, timeout: Duration) -> Result<Option<Datagram>, TransportError> {
        let mut buf = [0u8; RECV_BUFFER_LEN];
        match tokio::time::timeout(timeout, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => Ok(Some(Datagram {
                from,
                payload: buf[..len].to_vec(),
            })),
            Ok(Err(e)) => Err(TransportError::Receive(e.to_string())),
            Err(_) => Ok(None),
        }
    }
}
