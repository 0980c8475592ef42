//! UDP Bearer
//!
//! Carries mesh PDUs over UDP datagrams, for simulation and testing
//! against other nodes on an IP network. Each datagram is
//!
//! ```text
//! [pdu_type:1][pdu:N]
//! ```
//!
//! and is sent to every configured peer.

use super::{Bearer, BearerError, BearerEvent, BearerTx, PduType};
use crate::config::UdpConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Largest datagram accepted by the receive loop.
const MAX_DATAGRAM: usize = 512;

/// UDP bearer.
pub struct UdpBearer {
    socket: Option<Arc<UdpSocket>>,
    peers: Vec<SocketAddr>,
    recv_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    event_tx: BearerTx,
}

impl UdpBearer {
    /// Bind the socket and spawn the receive loop.
    pub async fn bind(config: &UdpConfig, event_tx: BearerTx) -> Result<Self, BearerError> {
        let bind_addr: SocketAddr = config
            .bind_addr()
            .parse()
            .map_err(|e| BearerError::InvalidAddress(format!("{}: {}", config.bind_addr(), e)))?;

        let peers = config
            .peers
            .iter()
            .map(|p| {
                p.parse::<SocketAddr>()
                    .map_err(|e| BearerError::InvalidAddress(format!("{}: {}", p, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| BearerError::StartFailed(format!("bind failed: {}", e)))?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);

        let recv_socket = socket.clone();
        let tx = event_tx.clone();
        let recv_task = tokio::spawn(async move {
            udp_receive_loop(recv_socket, tx).await;
        });

        info!(local_addr = %local_addr, peers = peers.len(), "UDP bearer started");
        let _ = event_tx.send(BearerEvent::Opened).await;

        Ok(Self {
            socket: Some(socket),
            peers,
            recv_task: Some(recv_task),
            local_addr: Some(local_addr),
            event_tx,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Add a peer to send PDUs to.
    pub fn add_peer(&mut self, addr: SocketAddr) {
        if !self.peers.contains(&addr) {
            self.peers.push(addr);
        }
    }

    /// Stop the receive loop and close the socket.
    pub async fn close(&mut self) {
        if let Some(task) = self.recv_task.take() {
            task.abort();
            let _ = task.await;
        }
        if self.socket.take().is_some() {
            let _ = self.event_tx.send(BearerEvent::Closed).await;
            debug!("UDP bearer closed");
        }
        self.local_addr = None;
    }
}

impl Drop for UdpBearer {
    fn drop(&mut self) {
        if let Some(task) = self.recv_task.take() {
            task.abort();
        }
    }
}

impl Bearer for UdpBearer {
    fn send(&self, data: &[u8], pdu_type: PduType) -> Result<(), BearerError> {
        let socket = self.socket.as_ref().ok_or(BearerError::Closed)?;
        if !self.supports(pdu_type) {
            return Err(BearerError::PduTypeNotSupported(pdu_type));
        }

        let mut datagram = Vec::with_capacity(data.len() + 1);
        datagram.push(pdu_type.to_byte());
        datagram.extend_from_slice(data);

        for peer in &self.peers {
            match socket.try_send_to(&datagram, *peer) {
                Ok(_) => trace!(peer = %peer, bytes = datagram.len(), "UDP PDU sent"),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return Err(BearerError::WaitAndRetry);
                }
                Err(e) => return Err(BearerError::Io(e)),
            }
        }
        Ok(())
    }

    fn supports(&self, pdu_type: PduType) -> bool {
        pdu_type != PduType::ProvisioningPdu
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }
}

/// UDP receive loop, run as a spawned task.
async fn udp_receive_loop(socket: Arc<UdpSocket>, event_tx: BearerTx) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, remote_addr)) => {
                let Some((&type_byte, pdu)) = buf[..len].split_first() else {
                    continue;
                };
                let Some(pdu_type) = PduType::from_byte(type_byte) else {
                    debug!(remote_addr = %remote_addr, type_byte, "Unknown PDU type, dropping");
                    continue;
                };
                trace!(remote_addr = %remote_addr, bytes = len, "UDP PDU received");

                if event_tx
                    .send(BearerEvent::pdu(pdu_type, pdu.to_vec()))
                    .await
                    .is_err()
                {
                    info!("Bearer channel closed, stopping receive loop");
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "UDP receive error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bearer::bearer_channel;
    use tokio::time::{timeout, Duration};

    fn make_config(peers: Vec<String>) -> UdpConfig {
        UdpConfig {
            bind_addr: Some("127.0.0.1:0".to_string()),
            peers,
        }
    }

    async fn next_pdu(rx: &mut crate::bearer::BearerRx) -> (PduType, Vec<u8>) {
        loop {
            let event = timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("timeout")
                .expect("channel closed");
            if let BearerEvent::Pdu { pdu_type, data, .. } = event {
                return (pdu_type, data);
            }
        }
    }

    #[tokio::test]
    async fn test_bind_and_close() {
        let (tx, mut rx) = bearer_channel(10);
        let mut bearer = UdpBearer::bind(&make_config(vec![]), tx).await.unwrap();
        assert!(bearer.is_open());
        assert!(bearer.local_addr().is_some());
        assert_eq!(rx.recv().await, Some(BearerEvent::Opened));

        bearer.close().await;
        assert!(!bearer.is_open());
        assert!(matches!(
            bearer.send(&[1], PduType::NetworkPdu),
            Err(BearerError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_send_recv() {
        let (tx2, mut rx2) = bearer_channel(10);
        let b2 = UdpBearer::bind(&make_config(vec![]), tx2).await.unwrap();
        let addr2 = b2.local_addr().unwrap();

        let (tx1, _rx1) = bearer_channel(10);
        let b1 = UdpBearer::bind(&make_config(vec![addr2.to_string()]), tx1)
            .await
            .unwrap();

        b1.send(&[0xAA, 0xBB], PduType::MeshBeacon).unwrap();
        let (pdu_type, data) = next_pdu(&mut rx2).await;
        assert_eq!(pdu_type, PduType::MeshBeacon);
        assert_eq!(data, vec![0xAA, 0xBB]);
    }

    #[tokio::test]
    async fn test_provisioning_not_supported() {
        let (tx, _rx) = bearer_channel(10);
        let bearer = UdpBearer::bind(&make_config(vec![]), tx).await.unwrap();
        assert!(matches!(
            bearer.send(&[1], PduType::ProvisioningPdu),
            Err(BearerError::PduTypeNotSupported(PduType::ProvisioningPdu))
        ));
    }

    #[tokio::test]
    async fn test_invalid_peer_address() {
        let (tx, _rx) = bearer_channel(10);
        let result = UdpBearer::bind(&make_config(vec!["not-an-addr".into()]), tx).await;
        assert!(matches!(result, Err(BearerError::InvalidAddress(_))));
    }
}
