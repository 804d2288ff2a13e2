//! Loopback UDP forwarders, one per media kind
//!
//! Each forwarder is a UDP socket bound to an ephemeral loopback port and
//! connected to the transcoder's fixed input port, so a write needs no
//! destination and one write is one datagram.

use crate::media::{MediaKind, LOOPBACK_HOST};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::debug;

/// Connected UDP socket feeding one transcoder input
#[derive(Debug)]
pub struct UdpForwarder {
    kind: MediaKind,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    socket: Mutex<Option<Arc<UdpSocket>>>,
}

impl UdpForwarder {
    /// Dial `remote_addr` from an ephemeral loopback port
    pub async fn dial(kind: MediaKind, remote_addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind((LOOPBACK_HOST, 0))
            .await
            .map_err(|e| Error::Pipeline(format!("Failed to bind {} socket: {}", kind, e)))?;

        socket.connect(remote_addr).await.map_err(|e| {
            Error::Pipeline(format!(
                "Failed to dial {} forwarder to {}: {}",
                kind, remote_addr, e
            ))
        })?;

        let local_addr = socket.local_addr()?;

        debug!(%kind, %local_addr, %remote_addr, "UDP forwarder dialled");

        Ok(Self {
            kind,
            local_addr,
            remote_addr,
            socket: Mutex::new(Some(Arc::new(socket))),
        })
    }

    /// Dial the fixed loopback port for `kind`
    pub async fn dial_downstream(kind: MediaKind) -> Result<Self> {
        let remote_addr = downstream_addr(kind)?;
        Self::dial(kind, remote_addr).await
    }

    /// Media kind this forwarder carries
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Local (ephemeral) address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Destination address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Write one datagram
    ///
    /// Fails once the forwarder has been closed. A write already in flight
    /// when [`close`](Self::close) runs is allowed to complete.
    pub async fn send(&self, packet: &[u8]) -> Result<usize> {
        let socket = self.socket.lock().clone().ok_or_else(|| {
            Error::Pipeline(format!("{} forwarder is closed", self.kind))
        })?;

        socket.send(packet).await.map_err(|e| {
            Error::Pipeline(format!(
                "UDP write to {} failed for {}: {}",
                self.remote_addr, self.kind, e
            ))
        })
    }

    /// Close the socket; idempotent
    pub fn close(&self) {
        if self.socket.lock().take().is_some() {
            debug!(kind = %self.kind, local_addr = %self.local_addr, "UDP forwarder closed");
        }
    }

    /// Whether [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.socket.lock().is_none()
    }
}

/// The per-kind slot table of a session
#[derive(Debug, Clone)]
pub struct ForwarderPair {
    audio: Arc<UdpForwarder>,
    video: Arc<UdpForwarder>,
}

impl ForwarderPair {
    /// Dial both kinds to their fixed loopback ports (4000 audio, 4002 video)
    pub async fn dial() -> Result<Self> {
        Ok(Self {
            audio: Arc::new(UdpForwarder::dial_downstream(MediaKind::Audio).await?),
            video: Arc::new(UdpForwarder::dial_downstream(MediaKind::Video).await?),
        })
    }

    /// Build a pair from already-dialled forwarders
    pub fn new(audio: UdpForwarder, video: UdpForwarder) -> Self {
        Self {
            audio: Arc::new(audio),
            video: Arc::new(video),
        }
    }

    /// Forwarder for `kind`
    pub fn get(&self, kind: MediaKind) -> &Arc<UdpForwarder> {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    /// Close both sockets
    pub fn close(&self) {
        self.audio.close();
        self.video.close();
    }

    /// Whether both sockets are closed
    pub fn is_closed(&self) -> bool {
        self.audio.is_closed() && self.video.is_closed()
    }
}

/// Fixed loopback destination for `kind`
pub fn downstream_addr(kind: MediaKind) -> Result<SocketAddr> {
    format!("{}:{}", LOOPBACK_HOST, kind.downstream_port())
        .parse()
        .map_err(|e| Error::Pipeline(format!("Invalid downstream address: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downstream_addresses() {
        assert_eq!(
            downstream_addr(MediaKind::Audio).unwrap().to_string(),
            "127.0.0.1:4000"
        );
        assert_eq!(
            downstream_addr(MediaKind::Video).unwrap().to_string(),
            "127.0.0.1:4002"
        );
    }

    #[tokio::test]
    async fn test_datagram_boundaries_preserved() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let forwarder = UdpForwarder::dial(MediaKind::Audio, receiver.local_addr().unwrap())
            .await
            .unwrap();

        forwarder.send(&[1u8; 10]).await.unwrap();
        forwarder.send(&[2u8; 20]).await.unwrap();

        let mut buf = [0u8; 64];
        let (n, from) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(n, 10);
        assert_eq!(from, forwarder.local_addr());
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(n, 20);
        assert!(buf[..20].iter().all(|b| *b == 2));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let forwarder = UdpForwarder::dial(MediaKind::Video, receiver.local_addr().unwrap())
            .await
            .unwrap();

        forwarder.close();
        forwarder.close();

        assert!(forwarder.is_closed());
        let err = forwarder.send(&[0u8; 4]).await.unwrap_err();
        assert!(matches!(err, Error::Pipeline(_)));
    }

    #[tokio::test]
    async fn test_pair_dials_fixed_ports() {
        let pair = ForwarderPair::dial().await.unwrap();
        assert_eq!(pair.get(MediaKind::Audio).remote_addr().port(), 4000);
        assert_eq!(pair.get(MediaKind::Video).remote_addr().port(), 4002);
        assert!(pair.get(MediaKind::Audio).local_addr().ip().is_loopback());

        pair.close();
        assert!(pair.is_closed());
    }
}
