use crate::{
    dns::{DNSPacket, ParseError, enums::ResponseCode},
    error::UpstreamError,
    handler::{HandlerOutcome, RequestHandler, refused},
    upstream::Upstream,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{Semaphore, broadcast};
use tracing::{debug, error, info, trace, warn};

type ServerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Largest UDP datagram we accept
const UDP_BUFFER_SIZE: usize = 4096;

/// Turns raw queries into responses: the zone handler first, then the
/// upstream for anything the handler passes on.
pub struct DnsService {
    handler: RequestHandler,
    upstream: Arc<dyn Upstream>,
}

impl DnsService {
    pub fn new(handler: RequestHandler, upstream: Arc<dyn Upstream>) -> Self {
        Self { handler, upstream }
    }

    pub async fn respond(&self, query: &DNSPacket) -> DNSPacket {
        trace!(
            "Processing query id={} with {} questions",
            query.header.id,
            query.questions.len()
        );
        match self.handler.handle(query).await {
            HandlerOutcome::Answer(response) => response,
            HandlerOutcome::Next => self.forward(query).await,
        }
    }

    async fn forward(&self, query: &DNSPacket) -> DNSPacket {
        match self.upstream.exchange(query).await {
            Ok(mut response) => {
                response.header.id = query.header.id;
                response
            }
            Err(UpstreamError::NoServers) => {
                debug!("No upstream to pass query id={} to", query.header.id);
                refused(query)
            }
            Err(e) => {
                warn!("Forwarding query id={} failed: {}", query.header.id, e);
                query.reply(ResponseCode::ServerFailure)
            }
        }
    }
}

/// Empty response with TC set, telling the client to retry over TCP
fn truncated_response(query: &DNSPacket, response: &DNSPacket) -> DNSPacket {
    let mut truncated = query.reply(ResponseCode::NoError);
    truncated.header.rcode = response.header.rcode;
    truncated.header.aa = response.header.aa;
    truncated.header.ra = response.header.ra;
    truncated.header.tc = true;
    truncated
}

/// Serialize `response`, answering SERVFAIL instead when it cannot be encoded
fn serialize_or_servfail(query: &DNSPacket, response: &DNSPacket) -> Result<Vec<u8>, ParseError> {
    match response.serialize() {
        Ok(data) => Ok(data),
        Err(e) => {
            warn!(
                "Failed to serialize response id={}: {}, answering SERVFAIL",
                query.header.id, e
            );
            query.reply(ResponseCode::ServerFailure).serialize()
        }
    }
}

/// Serialize `response` for a UDP client, falling back to a truncated reply
/// when it exceeds the client's payload size.
fn encode_udp_response(query: &DNSPacket, response: &DNSPacket) -> Result<Vec<u8>, ParseError> {
    let response_data = serialize_or_servfail(query, response)?;

    let max_udp_size = query.max_udp_payload_size() as usize;
    if response_data.len() <= max_udp_size {
        return Ok(response_data);
    }

    debug!(
        "Response too large for UDP ({}>{} bytes), sending truncated response",
        response_data.len(),
        max_udp_size
    );
    truncated_response(query, response).serialize()
}

/// Length-prefixed frame for a TCP client. A response too large for the
/// 16-bit prefix is replaced by a truncated reply.
fn encode_tcp_response(query: &DNSPacket, response: &DNSPacket) -> Result<Vec<u8>, ParseError> {
    let mut response_data = serialize_or_servfail(query, response)?;
    if response_data.len() > u16::MAX as usize {
        warn!(
            "Response id={} too large for TCP ({} bytes), sending truncated response",
            query.header.id,
            response_data.len()
        );
        response_data = truncated_response(query, response).serialize()?;
    }

    let length = u16::try_from(response_data.len())
        .map_err(|_| ParseError::InvalidBitStream("response exceeds 65535 bytes".to_string()))?;
    let mut frame = Vec::with_capacity(response_data.len() + 2);
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(&response_data);
    Ok(frame)
}

/// Run UDP server with graceful shutdown support
pub async fn run_udp_server(
    bind_addr: SocketAddr,
    service: Arc<DnsService>,
    query_semaphore: Arc<Semaphore>,
    shutdown_rx: broadcast::Receiver<()>,
) -> ServerResult {
    let sock = UdpSocket::bind(bind_addr).await?;
    info!("UDP DNS server listening on {}", bind_addr);
    serve_udp(sock, service, query_semaphore, shutdown_rx).await
}

/// Serve queries on an already bound UDP socket
pub async fn serve_udp(
    sock: UdpSocket,
    service: Arc<DnsService>,
    query_semaphore: Arc<Semaphore>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> ServerResult {
    let sock = Arc::new(sock);
    let mut buf = vec![0u8; UDP_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("UDP server received shutdown signal");
                break;
            }

            result = sock.recv_from(&mut buf) => {
                let (read_bytes, src_addr) = result?;

                let permit = match query_semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!(
                            "Max concurrent queries reached, dropping query from {}",
                            src_addr
                        );
                        continue;
                    }
                };

                let service = service.clone();
                let query_data = buf[..read_bytes].to_vec();
                let sock = sock.clone();

                tokio::spawn(async move {
                    let _permit = permit;

                    let query = match DNSPacket::parse(&query_data) {
                        Ok(query) => query,
                        Err(e) => {
                            debug!("Malformed UDP packet from {}: {}", src_addr, e);
                            return;
                        }
                    };
                    let response = service.respond(&query).await;

                    match encode_udp_response(&query, &response) {
                        Ok(response_data) => {
                            if let Err(e) = sock.send_to(&response_data, src_addr).await {
                                error!("Failed to send UDP response to {}: {:?}", src_addr, e);
                            }
                        }
                        Err(e) => error!("Failed to serialize response for {}: {}", src_addr, e),
                    }
                });
            }
        }
    }

    info!("UDP server shutdown complete");
    Ok(())
}

/// Run TCP server with graceful shutdown support
pub async fn run_tcp_server(
    bind_addr: SocketAddr,
    service: Arc<DnsService>,
    query_semaphore: Arc<Semaphore>,
    shutdown_rx: broadcast::Receiver<()>,
) -> ServerResult {
    let listener = TcpListener::bind(bind_addr).await?;
    info!("TCP DNS server listening on {}", bind_addr);
    serve_tcp(listener, service, query_semaphore, shutdown_rx).await
}

/// Accept connections on an already bound listener
pub async fn serve_tcp(
    listener: TcpListener,
    service: Arc<DnsService>,
    query_semaphore: Arc<Semaphore>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> ServerResult {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("TCP server received shutdown signal");
                break;
            }

            result = listener.accept() => {
                let (stream, src_addr) = result?;
                let service = service.clone();
                let query_semaphore = query_semaphore.clone();

                tokio::spawn(async move {
                    if let Err(e) =
                        handle_tcp_connection(stream, src_addr, service, query_semaphore).await
                    {
                        warn!("TCP connection error from {}: {:?}", src_addr, e);
                    }
                });
            }
        }
    }

    info!("TCP server shutdown complete");
    Ok(())
}

async fn handle_tcp_connection(
    mut stream: TcpStream,
    src_addr: SocketAddr,
    service: Arc<DnsService>,
    query_semaphore: Arc<Semaphore>,
) -> ServerResult {
    let mut length_buf = [0u8; 2];

    loop {
        match stream.read_exact(&mut length_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("TCP connection closed by client {}", src_addr);
                break;
            }
            Err(e) => return Err(e.into()),
        }

        let message_length = u16::from_be_bytes(length_buf) as usize;
        let mut message_buf = vec![0u8; message_length];
        stream.read_exact(&mut message_buf).await?;

        let _permit = match query_semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    "Max concurrent queries reached, closing TCP connection from {}",
                    src_addr
                );
                break;
            }
        };

        let query = match DNSPacket::parse(&message_buf) {
            Ok(query) => query,
            Err(e) => {
                debug!("Malformed TCP packet from {}: {}", src_addr, e);
                break;
            }
        };
        let response = service.respond(&query).await;

        let frame = encode_tcp_response(&query, &response)?;
        stream.write_all(&frame).await?;
        stream.flush().await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::edns::EdnsOpt;
    use crate::dns::enums::DNSResourceType;
    use crate::dns::resource::{DNSResource, DNSResourceData};

    #[test]
    fn test_large_udp_response_is_truncated() {
        let query = DNSPacket::query(42, "big.example.com.", DNSResourceType::TXT);
        let mut response = query.reply(ResponseCode::NoError);
        response.header.aa = true;
        for i in 0..10 {
            response.answers.push(DNSResource::new(
                "big.example.com.",
                300,
                DNSResourceData::TXT(vec![format!("{:0>200}", i)]),
            ));
        }

        let encoded = encode_udp_response(&query, &response).unwrap();
        let parsed = DNSPacket::parse(&encoded).unwrap();
        assert!(parsed.header.tc);
        assert!(parsed.header.aa);
        assert_eq!(parsed.header.id, 42);
        assert!(parsed.answers.is_empty());
    }

    #[test]
    fn test_edns_payload_allows_larger_udp_response() {
        let mut query = DNSPacket::query(43, "big.example.com.", DNSResourceType::TXT);
        query.edns = Some(EdnsOpt::default());
        let mut response = query.reply(ResponseCode::NoError);
        for i in 0..10 {
            response.answers.push(DNSResource::new(
                "big.example.com.",
                300,
                DNSResourceData::TXT(vec![format!("{:0>200}", i)]),
            ));
        }

        let encoded = encode_udp_response(&query, &response).unwrap();
        let parsed = DNSPacket::parse(&encoded).unwrap();
        assert!(!parsed.header.tc);
        assert_eq!(parsed.answers.len(), 10);
    }

    fn a_records(count: usize) -> Vec<DNSResource> {
        (0..count)
            .map(|i| {
                DNSResource::new(
                    "many.example.com.",
                    60,
                    DNSResourceData::A(std::net::Ipv4Addr::from(0xC000_0200 + i as u32)),
                )
            })
            .collect()
    }

    #[test]
    fn test_tcp_frame_carries_length_prefix() {
        let query = DNSPacket::query(44, "many.example.com.", DNSResourceType::A);
        let mut response = query.reply(ResponseCode::NoError);
        response.answers = a_records(20);

        let frame = encode_tcp_response(&query, &response).unwrap();
        let length = u16::from_be_bytes([frame[0], frame[1]]) as usize;
        assert_eq!(length, frame.len() - 2);
        let parsed = DNSPacket::parse(&frame[2..]).unwrap();
        assert!(!parsed.header.tc);
        assert_eq!(parsed.answers.len(), 20);
    }

    #[test]
    fn test_oversized_tcp_response_is_truncated() {
        let query = DNSPacket::query(45, "many.example.com.", DNSResourceType::A);
        let mut response = query.reply(ResponseCode::NoError);
        response.header.aa = true;
        response.answers = a_records(3000);
        assert!(response.serialize().unwrap().len() > u16::MAX as usize);

        let frame = encode_tcp_response(&query, &response).unwrap();
        let length = u16::from_be_bytes([frame[0], frame[1]]) as usize;
        assert_eq!(length, frame.len() - 2);
        let parsed = DNSPacket::parse(&frame[2..]).unwrap();
        assert_eq!(parsed.header.id, 45);
        assert!(parsed.header.tc);
        assert!(parsed.header.aa);
        assert!(parsed.answers.is_empty());
    }

    fn unencodable_response(query: &DNSPacket) -> DNSPacket {
        let mut response = query.reply(ResponseCode::NoError);
        response.answers.push(DNSResource::new(
            "www.example.com.",
            60,
            DNSResourceData::CNAME(format!("{}.example.com.", "a".repeat(64))),
        ));
        response
    }

    #[test]
    fn test_unencodable_udp_response_becomes_servfail() {
        let query = DNSPacket::query(46, "www.example.com.", DNSResourceType::A);
        let response = unencodable_response(&query);
        assert!(response.serialize().is_err());

        let encoded = encode_udp_response(&query, &response).unwrap();
        let parsed = DNSPacket::parse(&encoded).unwrap();
        assert_eq!(parsed.header.id, 46);
        assert_eq!(parsed.header.rcode, ResponseCode::ServerFailure.to_u8());
        assert!(parsed.answers.is_empty());
        assert_eq!(parsed.questions, query.questions);
    }

    #[test]
    fn test_unencodable_tcp_response_becomes_servfail() {
        let query = DNSPacket::query(47, "www.example.com.", DNSResourceType::A);
        let response = unencodable_response(&query);

        let frame = encode_tcp_response(&query, &response).unwrap();
        let parsed = DNSPacket::parse(&frame[2..]).unwrap();
        assert_eq!(parsed.header.id, 47);
        assert_eq!(parsed.header.rcode, ResponseCode::ServerFailure.to_u8());
    }
}
