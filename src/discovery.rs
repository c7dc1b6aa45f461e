use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::supervisor::Supervisor;

const RECV_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Listens for device announcements of the form `"<TAG> IP:<dotted-quad>"`
/// on the discovery port, registers each new device with the supervisor, and
/// answers with a one-shot `"PC IP:<local-ip>"` handshake reply.
pub struct DiscoveryListener {
    socket: UdpSocket,
    device_tag: String,
    reply: String,
    port: u16,
    supervisor: Supervisor,
}

impl DiscoveryListener {
    pub async fn bind(
        port: u16,
        device_tag: String,
        supervisor: Supervisor,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        let port = socket.local_addr()?.port();

        let local_ip = match local_ip() {
            Ok(ip) => ip,
            Err(e) => {
                tracing::warn!(error = %e, "could not determine local address for handshake");
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            }
        };

        Ok(Self {
            socket,
            device_tag,
            reply: format!("PC IP:{local_ip}"),
            port,
            supervisor,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Receive loop. Never returns; socket errors are logged and the loop
    /// resumes after a short backoff.
    pub async fn run(self) {
        let mut buf = [0u8; 1024];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, from)) => {
                    let message = String::from_utf8_lossy(&buf[..len]);
                    let Some(reply_to) = self.handle_announcement(message.trim(), from) else {
                        continue;
                    };
                    // Best-effort ack; the device is already registered.
                    if let Err(e) = self.socket.send_to(self.reply.as_bytes(), reply_to).await {
                        tracing::warn!(
                            device = %reply_to.ip(),
                            error = %e,
                            "failed to send handshake reply"
                        );
                    } else {
                        tracing::info!(device = %reply_to.ip(), reply = %self.reply, "handshake reply sent");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "discovery receive error");
                    tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Register the announced device; returns the handshake reply target for
    /// a newly registered device, `None` for malformed or re-announcements.
    fn handle_announcement(&self, message: &str, from: SocketAddr) -> Option<SocketAddr> {
        let addr = parse_announcement(&self.device_tag, message)?;
        let device = addr.to_string();

        if !self.supervisor.register(&device) {
            tracing::debug!(device = %device, "re-announcement from active device ignored");
            return None;
        }

        tracing::info!(device = %device, from = %from, "device discovered");
        Some(SocketAddr::from((addr, self.port)))
    }
}

/// Announcements are `"<TAG> IP:<dotted-quad>"`; anything else is discarded.
fn parse_announcement(tag: &str, message: &str) -> Option<Ipv4Addr> {
    message
        .strip_prefix(tag)?
        .strip_prefix(" IP:")?
        .trim()
        .parse()
        .ok()
}

/// Local address as seen on the default route. Connecting a UDP socket picks
/// the outbound interface without sending a packet.
fn local_ip() -> std::io::Result<IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    Ok(socket.local_addr()?.ip())
}
