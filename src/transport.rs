//! UDP 전송 어댑터

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::Result;

/// 공유 가능한 UDP 소켓 래퍼
#[derive(Debug, Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn send_to(&self, bytes: &[u8], peer: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(bytes, peer).await?)
    }

    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.socket.recv_from(buf).await?)
    }

    /// 제한 시간 내 수신. 시간 초과면 None
    pub async fn recv_timeout(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<(usize, SocketAddr)>> {
        match tokio::time::timeout(timeout, self.socket.recv_from(buf)).await {
            Ok(result) => Ok(Some(result?)),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_send_recv() {
        let a = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

        a.send_to(b"ping", b.local_addr()).await.unwrap();

        let mut buf = [0u8; 16];
        let (len, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"ping");
        assert_eq!(from, a.local_addr());

        let nothing = b
            .recv_timeout(&mut buf, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(nothing.is_none());
    }
}
