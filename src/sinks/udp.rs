//! Raw MAVLink forwarding to a ground control station over UDP
//!
//! QGroundControl and Mission Planner listen on UDP 14550 by default and
//! accept the relayed frames byte for byte.

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::info;

use super::FrameSink;
use crate::error::{RelayError, Result};
use crate::session::TelemetryFrame;

pub struct UdpForwardSink {
    name: String,
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpForwardSink {
    /// Resolve `target` and bind an ephemeral local socket of the same family
    pub async fn bind(name: impl Into<String>, target: &str) -> Result<Self> {
        let name = name.into();
        let target = tokio::net::lookup_host(target)
            .await?
            .next()
            .ok_or_else(|| RelayError::config(format!("udp sink '{}': cannot resolve {}", name, target)))?;

        let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local).await?;
        info!("Forwarding telemetry to {} as sink '{}'", target, name);

        Ok(Self { name, socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

#[async_trait]
impl FrameSink for UdpForwardSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&mut self, frame: TelemetryFrame) -> Result<()> {
        self.socket
            .send_to(frame.payload(), self.target)
            .await
            .map_err(|e| RelayError::Sink {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
