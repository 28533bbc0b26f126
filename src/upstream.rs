use crate::dns::{
    DNSPacket, edns::EdnsOpt, enums::DNSResourceType, enums::ResponseCode,
    resource::DNSResource,
};
use crate::error::UpstreamError;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Records an external resolver returned for a delegated name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamAnswer {
    pub records: Vec<DNSResource>,
    pub truncated: bool,
}

/// External resolver used for names outside our zones
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Send a complete query and return the resolver's response.
    async fn exchange(&self, query: &DNSPacket) -> Result<DNSPacket, UpstreamError>;

    /// Resolve `name`/`qtype`. The answer section is returned whatever the
    /// response code, so an NXDOMAIN upstream yields an empty record list.
    async fn lookup(
        &self,
        name: &str,
        qtype: DNSResourceType,
    ) -> Result<UpstreamAnswer, UpstreamError> {
        let mut query = DNSPacket::query(rand::random(), name, qtype);
        query.edns = Some(EdnsOpt::default());
        let response = self.exchange(&query).await?;
        Ok(UpstreamAnswer {
            records: response.answers,
            truncated: response.header.tc,
        })
    }
}

/// Forwards queries to a list of resolvers over UDP, retrying truncated
/// answers over TCP.
#[derive(Debug, Clone)]
pub struct UdpUpstream {
    servers: Vec<SocketAddr>,
    timeout: Duration,
}

impl UdpUpstream {
    pub fn new(servers: Vec<SocketAddr>, timeout: Duration) -> Self {
        Self { servers, timeout }
    }

    async fn exchange_with(
        &self,
        query: &DNSPacket,
        query_bytes: &[u8],
        server: SocketAddr,
    ) -> Result<DNSPacket, UpstreamError> {
        let udp_response = timeout(self.timeout, send_udp_query(query, query_bytes, server))
            .await
            .map_err(|_| UpstreamError::Timeout)??;

        if !udp_response.header.tc {
            return Ok(udp_response);
        }

        debug!("UDP response from {} truncated, retrying with TCP", server);
        match timeout(self.timeout, send_tcp_query(query, query_bytes, server)).await {
            Ok(Ok(tcp_response)) => Ok(tcp_response),
            Ok(Err(e)) => {
                debug!("TCP retry to {} failed: {}", server, e);
                Ok(udp_response)
            }
            Err(_) => {
                debug!("TCP retry to {} timed out", server);
                Ok(udp_response)
            }
        }
    }
}

#[async_trait]
impl Upstream for UdpUpstream {
    async fn exchange(&self, query: &DNSPacket) -> Result<DNSPacket, UpstreamError> {
        if self.servers.is_empty() {
            return Err(UpstreamError::NoServers);
        }

        let query_bytes = query.serialize()?;
        let mut last_error = UpstreamError::NoServers;

        for &server in &self.servers {
            match self.exchange_with(query, &query_bytes, server).await {
                Ok(response)
                    if response.header.rcode == ResponseCode::ServerFailure.to_u8()
                        || response.header.rcode == ResponseCode::Refused.to_u8() =>
                {
                    debug!(
                        "Upstream {} answered rcode {}, trying next server",
                        server, response.header.rcode
                    );
                    last_error = UpstreamError::Rcode(response.header.rcode);
                }
                Ok(response) => {
                    trace!(
                        "Upstream {} answered id={} with {} records",
                        server,
                        response.header.id,
                        response.answers.len()
                    );
                    return Ok(response);
                }
                Err(e) => {
                    warn!("Failed to resolve from upstream {}: {}", server, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

async fn send_udp_query(
    query: &DNSPacket,
    query_bytes: &[u8],
    server: SocketAddr,
) -> Result<DNSPacket, UpstreamError> {
    let bind_addr = if server.is_ipv4() {
        "0.0.0.0:0"
    } else {
        "[::]:0"
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(server).await?;
    socket.send(query_bytes).await?;

    let mut response_buf = vec![0u8; 65535];
    loop {
        let len = socket.recv(&mut response_buf).await?;
        let response = match DNSPacket::parse(&response_buf[..len]) {
            Ok(response) => response,
            Err(e) => {
                debug!("Discarding unparseable datagram from {}: {}", server, e);
                continue;
            }
        };
        if response.header.id == query.header.id && response.header.qr {
            return Ok(response);
        }
        debug!(
            "Discarding mismatched response id={} from {}",
            response.header.id, server
        );
    }
}

async fn send_tcp_query(
    query: &DNSPacket,
    query_bytes: &[u8],
    server: SocketAddr,
) -> Result<DNSPacket, UpstreamError> {
    let mut stream = TcpStream::connect(server).await?;

    let query_length = query_bytes.len() as u16;
    stream.write_all(&query_length.to_be_bytes()).await?;
    stream.write_all(query_bytes).await?;
    stream.flush().await?;

    let mut length_buf = [0u8; 2];
    stream.read_exact(&mut length_buf).await?;
    let response_length = u16::from_be_bytes(length_buf) as usize;

    let mut response_buf = vec![0u8; response_length];
    stream.read_exact(&mut response_buf).await?;

    let response = DNSPacket::parse(&response_buf)?;
    if response.header.id != query.header.id {
        return Err(UpstreamError::Io(format!(
            "Response id {} does not match query id {}",
            response.header.id, query.header.id
        )));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::resource::DNSResourceData;

    /// One-shot responder. With `noisy` set, a garbage datagram and a reply
    /// with the wrong id are sent ahead of the real reply.
    async fn spawn_udp_responder(truncated: bool, noisy: bool) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            let query = DNSPacket::parse(&buf[..len]).unwrap();
            let mut response = query.reply(ResponseCode::NoError);
            response.header.tc = truncated;
            response.answers.push(DNSResource::new(
                &query.questions[0].name(),
                60,
                DNSResourceData::A("198.51.100.7".parse().unwrap()),
            ));
            if noisy {
                socket.send_to(&[0xFF; 5], peer).await.unwrap();
                let mut stray = response.clone();
                stray.header.id = query.header.id.wrapping_add(1);
                socket.send_to(&stray.serialize().unwrap(), peer).await.unwrap();
            }
            let bytes = response.serialize().unwrap();
            socket.send_to(&bytes, peer).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_no_servers() {
        let upstream = UdpUpstream::new(vec![], Duration::from_secs(1));
        assert_eq!(
            upstream.lookup("example.net.", DNSResourceType::A).await,
            Err(UpstreamError::NoServers)
        );
    }

    #[tokio::test]
    async fn test_lookup_over_udp() {
        let server = spawn_udp_responder(false, false).await;
        let upstream = UdpUpstream::new(vec![server], Duration::from_secs(2));
        let answer = upstream
            .lookup("cdn.example.net.", DNSResourceType::A)
            .await
            .unwrap();
        assert!(!answer.truncated);
        assert_eq!(answer.records.len(), 1);
        assert_eq!(answer.records[0].name(), "cdn.example.net.");
    }

    #[tokio::test]
    async fn test_truncated_answer_kept_when_tcp_unavailable() {
        // Nothing listens on TCP at this port, so the UDP answer is returned.
        let server = spawn_udp_responder(true, false).await;
        let upstream = UdpUpstream::new(vec![server], Duration::from_secs(2));
        let answer = upstream
            .lookup("big.example.net.", DNSResourceType::TXT)
            .await
            .unwrap();
        assert!(answer.truncated);
    }

    #[tokio::test]
    async fn test_unparseable_datagram_is_skipped() {
        let server = spawn_udp_responder(false, true).await;
        let upstream = UdpUpstream::new(vec![server], Duration::from_secs(2));

        let answer = upstream
            .lookup("cdn.example.net.", DNSResourceType::A)
            .await
            .unwrap();
        assert_eq!(answer.records.len(), 1);
        assert_eq!(answer.records[0].name(), "cdn.example.net.");
    }
}
