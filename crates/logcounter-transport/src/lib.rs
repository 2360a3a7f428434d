// UDP transport for forwarding metrics to a collector.
// Stateless and point-to-point: every write is one datagram to the resolved
// peer, with no buffering and no retry. Failures go back to the caller.
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::net::{UdpSocket, lookup_host};

/// Point-to-point writer; lets callers swap the UDP client for a fake.
#[async_trait]
pub trait ForwardingClient: Send + Sync {
    fn scheme(&self) -> &'static str;
    fn address(&self) -> String;
    /// Writes `data` once; failures are returned, never retried.
    async fn write(&self, data: &[u8]) -> io::Result<usize>;
    fn close(self) -> io::Result<()>
    where
        Self: Sized;
}

/// Datagram writer bound to an ephemeral local port.
///
/// ```no_run
/// use logcounter_transport::UdpClient;
///
/// async fn forward(payload: &[u8]) -> anyhow::Result<()> {
///     let client = UdpClient::connect("127.0.0.1:3457").await?;
///     assert_eq!(client.scheme(), "udp");
///     client.write(payload).await?;
///     client.close()?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct UdpClient {
    addr: SocketAddr,
    socket: UdpSocket,
}

impl UdpClient {
    /// Resolves `address` and binds a local socket of the matching family.
    pub async fn connect(address: &str) -> Result<Self> {
        let addr = lookup_host(address)
            .await
            .with_context(|| format!("resolve udp address {address}"))?
            .next()
            .ok_or_else(|| anyhow!("no udp address for {address}"))?;
        let bind: SocketAddr = if addr.is_ipv4() {
            "0.0.0.0:0".parse()?
        } else {
            "[::]:0".parse()?
        };
        let socket = UdpSocket::bind(bind)
            .await
            .context("bind local udp socket")?;
        Ok(Self { addr, socket })
    }

    pub fn scheme(&self) -> &'static str {
        "udp"
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Sends `data` as one datagram. Empty input is not sent.
    pub async fn write(&self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        match self.socket.send_to(data, self.addr).await {
            Ok(written) => {
                tracing::debug!(bytes = written, address = %self.addr, "wrote udp datagram");
                Ok(written)
            }
            Err(err) => {
                tracing::error!(
                    error = %err,
                    scheme = self.scheme(),
                    address = %self.addr,
                    "udp write failed"
                );
                Err(err)
            }
        }
    }

    /// Releases the local socket. Nothing is buffered, so there is nothing
    /// left to flush and closing cannot lose data.
    pub fn close(self) -> io::Result<()> {
        tracing::debug!(address = %self.addr, "closing udp client");
        drop(self.socket);
        Ok(())
    }
}

#[async_trait]
impl ForwardingClient for UdpClient {
    fn scheme(&self) -> &'static str {
        UdpClient::scheme(self)
    }

    fn address(&self) -> String {
        UdpClient::address(self)
    }

    async fn write(&self, data: &[u8]) -> io::Result<usize> {
        UdpClient::write(self, data).await
    }

    fn close(self) -> io::Result<()> {
        UdpClient::close(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_delivers_one_datagram() -> Result<()> {
        let receiver = UdpSocket::bind("127.0.0.1:0").await?;
        let target = receiver.local_addr()?;
        let client = UdpClient::connect(&target.to_string()).await?;
        assert_eq!(client.scheme(), "udp");
        assert_eq!(client.address(), target.to_string());

        let written = client.write(b"counter:1|c").await?;
        assert_eq!(written, 11);

        let mut buf = [0u8; 64];
        let (len, _) = receiver.recv_from(&mut buf).await?;
        assert_eq!(&buf[..len], b"counter:1|c");
        client.close()?;
        Ok(())
    }

    #[tokio::test]
    async fn empty_write_sends_nothing() -> Result<()> {
        let receiver = UdpSocket::bind("127.0.0.1:0").await?;
        let client = UdpClient::connect(&receiver.local_addr()?.to_string()).await?;
        assert_eq!(client.write(&[]).await?, 0);

        let mut buf = [0u8; 8];
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            receiver.recv_from(&mut buf),
        )
        .await;
        assert!(pending.is_err(), "no datagram expected");
        Ok(())
    }

    // Writes every frame, stopping at the first failure.
    async fn forward_all<C: ForwardingClient>(client: &C, frames: &[&[u8]]) -> io::Result<usize> {
        let mut total = 0;
        for frame in frames {
            total += client.write(frame).await?;
        }
        Ok(total)
    }

    struct RefusingClient;

    #[async_trait]
    impl ForwardingClient for RefusingClient {
        fn scheme(&self) -> &'static str {
            "fake"
        }

        fn address(&self) -> String {
            "nowhere".to_string()
        }

        async fn write(&self, _data: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        }

        fn close(self) -> io::Result<()> {
            Err(io::Error::other("already closed"))
        }
    }

    #[tokio::test]
    async fn clients_are_interchangeable_behind_the_trait() -> Result<()> {
        let receiver = UdpSocket::bind("127.0.0.1:0").await?;
        let client = UdpClient::connect(&receiver.local_addr()?.to_string()).await?;
        assert_eq!(forward_all(&client, &[b"a:1|c", b"", b"b:2|c"]).await?, 10);
        ForwardingClient::close(client)?;

        let fake = RefusingClient;
        let err = forward_all(&fake, &[b"a:1|c"]).await.expect_err("write refused");
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
        assert!(fake.close().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn unresolvable_address_is_an_error() {
        assert!(UdpClient::connect("not an address").await.is_err());
    }

    #[tokio::test]
    async fn oversized_datagram_surfaces_the_error() -> Result<()> {
        let receiver = UdpSocket::bind("127.0.0.1:0").await?;
        let client = UdpClient::connect(&receiver.local_addr()?.to_string()).await?;
        let payload = vec![0u8; 70_000];
        assert!(client.write(&payload).await.is_err());
        Ok(())
    }
}
