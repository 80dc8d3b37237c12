use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use super::dispatcher::{process, DHCP_SERVER_PORT};
use super::reply::MAX_REPLY_LEN;
use crate::config::Config;
use crate::lease::LeaseState;

/// One byte over the largest message accepted, so that a datagram cut short
/// by the buffer can be told apart from one that fits
const RECV_BUFFER_LEN: usize = MAX_REPLY_LEN + 1;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct DhcpServer {
    config: Arc<Config>,
    state: Arc<Mutex<LeaseState>>,
}

impl DhcpServer {
    pub fn new(config: Arc<Config>) -> crate::Result<Self> {
        let state = LeaseState::from_config(&config, Utc::now())?;
        Ok(Self {
            config,
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Shared handle on the lease state
    pub fn state(&self) -> Arc<Mutex<LeaseState>> {
        Arc::clone(&self.state)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        info!("Starting DHCP server");

        for listen_addr in &self.config.listen_addresses {
            let addr = SocketAddr::new((*listen_addr).into(), DHCP_SERVER_PORT);
            let socket = Self::bind(addr).await?;

            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                if let Err(e) = Self::listen_loop(socket, state).await {
                    error!("DHCP listener error on {}: {}", addr, e);
                }
            });
        }

        loop {
            tokio::time::sleep(SWEEP_INTERVAL).await;
            let snapshot = self.state.lock().await.snapshot(Utc::now());
            let live = snapshot
                .iter()
                .filter(|binding| binding.status.is_live())
                .count();
            debug!("Lease table: {} binding(s), {} live", snapshot.len(), live);
            for binding in &snapshot {
                trace!(
                    "{} {} {:?}{} until {}",
                    binding.address,
                    binding.client_id,
                    binding.status,
                    if binding.is_static { " static" } else { "" },
                    binding.expires_at()
                );
            }
        }
    }

    async fn bind(addr: SocketAddr) -> anyhow::Result<UdpSocket> {
        info!("Binding to {}", addr);
        let socket = UdpSocket::bind(addr).await.map_err(|e| {
            error!("Failed to bind DHCP socket to {}: {}", addr, e);
            e
        })?;
        socket.set_broadcast(true)?;
        Ok(socket)
    }

    async fn listen_loop(socket: UdpSocket, state: Arc<Mutex<LeaseState>>) -> crate::Result<()> {
        info!("DHCP server listening on {}", socket.local_addr()?);

        let mut buf = vec![0u8; RECV_BUFFER_LEN];

        loop {
            let (len, src) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("Failed to receive DHCP packet: {}", e);
                    continue;
                }
            };
            if len == buf.len() {
                warn!(
                    "Datagram from {} exceeds {} bytes, dropping",
                    src, MAX_REPLY_LEN
                );
                continue;
            }
            debug!("Received {} bytes from {}", len, src);

            // lock held for the whole decode, decide, encode sequence
            let outgoing = {
                let mut state = state.lock().await;
                process(&mut state, &buf[..len], src, Utc::now())
            };

            if let Some(outgoing) = outgoing {
                debug!(
                    "Sending {} ({} bytes) to {}",
                    outgoing.message_type,
                    outgoing.bytes.len(),
                    outgoing.destination
                );
                if let Err(e) = socket.send_to(&outgoing.bytes, outgoing.destination).await {
                    warn!("Failed to send DHCP response: {}", e);
                }
            }
        }
    }
}
