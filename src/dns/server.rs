//! UDP DNS server: authoritative for the configured TLD, forwarding
//! everything else.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, Query, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{RData, Record, RecordType};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{Error, Result};

use super::{DEFAULT_LISTEN_IP, DEFAULT_PORT};

/// Configuration for the stub resolver.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tld: String,
    pub listen_ip: IpAddr,
    pub port: u16,
    /// Per-upstream exchange timeout when forwarding.
    pub upstream_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tld: "test".to_string(),
            listen_ip: DEFAULT_LISTEN_IP,
            port: DEFAULT_PORT,
            upstream_timeout: Duration::from_secs(5),
        }
    }
}

/// Running DNS server. The UDP socket is bound before `start` returns, so
/// bind failures surface synchronously to the caller.
pub struct DnsServer {
    local_addr: SocketAddr,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl DnsServer {
    /// Bind and start serving, discovering upstreams from the OS resolver
    /// configuration.
    pub async fn start(cfg: ServerConfig) -> Result<Self> {
        let upstreams = super::discover_upstreams();
        Self::start_with_upstreams(cfg, upstreams).await
    }

    /// Bind and start serving with an explicit upstream list.
    pub async fn start_with_upstreams(cfg: ServerConfig, upstreams: Vec<String>) -> Result<Self> {
        let addr = SocketAddr::new(cfg.listen_ip, cfg.port);
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::transport(format!("binding dns listener {}: {}", addr, e)))?;
        let local_addr = socket.local_addr()?;

        let tld = cfg.tld.trim_start_matches('.').to_ascii_lowercase();
        let handler = Arc::new(Handler {
            socket: Arc::new(socket),
            tld_suffix: format!(".{}.", tld),
            upstreams: Arc::new(upstreams),
            upstream_timeout: cfg.upstream_timeout,
        });

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let task = tokio::spawn(async move { handler.serve(loop_token).await });

        Ok(Self { local_addr, token, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shut the server down and wait for the receive loop to exit.
    pub async fn stop(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

struct Handler {
    socket: Arc<UdpSocket>,
    tld_suffix: String,
    upstreams: Arc<Vec<String>>,
    upstream_timeout: Duration,
}

impl Handler {
    async fn serve(self: Arc<Self>, token: CancellationToken) {
        let mut buf = [0u8; 4096];
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, src)) => self.dispatch(&buf[..len], src).await,
                    Err(e) => {
                        warn!(error = %e, "dns receive error");
                    }
                },
            }
        }
    }

    async fn dispatch(self: &Arc<Self>, raw: &[u8], src: SocketAddr) {
        let Ok(request) = Message::from_vec(raw) else {
            debug!(%src, "dropping malformed dns packet");
            return;
        };
        let Some(query) = request.queries().first().cloned() else {
            return;
        };

        let name = query.name().to_string().to_ascii_lowercase();
        if name.ends_with(&self.tld_suffix) {
            let response = local_response(&request, &query);
            self.send(&response, src).await;
            return;
        }

        // Upstream exchanges can take seconds; never block the receive loop.
        let handler = Arc::clone(self);
        let raw = raw.to_vec();
        tokio::spawn(async move {
            let response = handler.forward(&raw, request.id(), &request).await;
            handler.send(&response, src).await;
        });
    }

    /// Forward the raw query to each upstream in order; first success wins.
    /// When every upstream fails, answer SERVFAIL.
    async fn forward(&self, raw: &[u8], id: u16, request: &Message) -> Message {
        for upstream in self.upstreams.iter() {
            match self.exchange(upstream, raw).await {
                Ok(bytes) => match Message::from_vec(&bytes) {
                    Ok(mut response) => {
                        response.set_id(id);
                        return response;
                    }
                    Err(e) => {
                        debug!(%upstream, error = %e, "unparseable upstream response");
                        continue;
                    }
                },
                Err(e) => {
                    debug!(%upstream, error = %e, "upstream exchange failed");
                    continue;
                }
            }
        }

        let mut servfail = Message::new();
        servfail.set_id(id);
        servfail.set_message_type(MessageType::Response);
        servfail.set_op_code(request.op_code());
        servfail.set_recursion_desired(request.recursion_desired());
        servfail.set_response_code(ResponseCode::ServFail);
        for query in request.queries() {
            servfail.add_query(query.clone());
        }
        servfail
    }

    async fn exchange(&self, upstream: &str, raw: &[u8]) -> std::io::Result<Vec<u8>> {
        let upstream_addr: SocketAddr = upstream
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("{}", e)))?;
        let bind_addr: SocketAddr = if upstream_addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        socket.send_to(raw, upstream_addr).await?;

        let mut buf = vec![0u8; 4096];
        let (len, _) = tokio::time::timeout(self.upstream_timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "upstream timed out"))??;
        buf.truncate(len);
        Ok(buf)
    }

    async fn send(&self, response: &Message, dst: SocketAddr) {
        match response.to_vec() {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, dst).await {
                    warn!(error = %e, %dst, "dns send error");
                }
            }
            Err(e) => warn!(error = %e, "dns response encoding error"),
        }
    }
}

/// Answer a query under the configured TLD: `A` maps to `127.0.0.1`,
/// `AAAA` to `::1`, both TTL 0; other types get an empty authoritative
/// NOERROR answer.
fn local_response(request: &Message, query: &Query) -> Message {
    let mut response = Message::new();
    response.set_id(request.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(request.op_code());
    response.set_recursion_desired(request.recursion_desired());
    response.set_authoritative(true);
    response.add_query(query.clone());

    match query.query_type() {
        RecordType::A => {
            response.add_answer(Record::from_rdata(
                query.name().clone(),
                0,
                RData::A(A(Ipv4Addr::LOCALHOST)),
            ));
        }
        RecordType::AAAA => {
            response.add_answer(Record::from_rdata(
                query.name().clone(),
                0,
                RData::AAAA(AAAA(Ipv6Addr::LOCALHOST)),
            ));
        }
        _ => {}
    }

    response
}

#[cfg(test)]
mod tests {
    use hickory_proto::op::OpCode;
    use hickory_proto::rr::Name;

    use super::*;

    fn query_message(id: u16, name: &str, record_type: RecordType) -> Message {
        let mut message = Message::new();
        message.set_id(id);
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(true);
        message.add_query(Query::query(Name::from_ascii(name).unwrap(), record_type));
        message
    }

    async fn start_server(upstreams: Vec<String>) -> DnsServer {
        let cfg = ServerConfig {
            port: 0,
            upstream_timeout: Duration::from_millis(200),
            ..ServerConfig::default()
        };
        DnsServer::start_with_upstreams(cfg, upstreams).await.unwrap()
    }

    async fn ask(server_addr: SocketAddr, message: &Message) -> Message {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(&message.to_vec().unwrap(), server_addr).await.unwrap();
        let mut buf = [0u8; 4096];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("query timed out")
            .unwrap();
        Message::from_vec(&buf[..len]).unwrap()
    }

    #[tokio::test]
    async fn test_a_query_for_tld_answers_loopback() {
        let server = start_server(vec![]).await;
        let response = ask(server.local_addr(), &query_message(0x1234, "myapp.test.", RecordType::A)).await;

        assert_eq!(response.id(), 0x1234);
        assert!(response.authoritative());
        assert_eq!(response.answer_count(), 1);
        match response.answers()[0].data() {
            Some(RData::A(a)) => assert_eq!(a.0, Ipv4Addr::LOCALHOST),
            other => panic!("unexpected rdata {:?}", other),
        }
        assert_eq!(response.answers()[0].ttl(), 0);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_aaaa_query_for_tld_answers_loopback6() {
        let server = start_server(vec![]).await;
        let response =
            ask(server.local_addr(), &query_message(7, "deep.sub.myapp.test.", RecordType::AAAA)).await;

        assert!(response.authoritative());
        match response.answers()[0].data() {
            Some(RData::AAAA(aaaa)) => assert_eq!(aaaa.0, Ipv6Addr::LOCALHOST),
            other => panic!("unexpected rdata {:?}", other),
        }
        server.stop().await;
    }

    #[tokio::test]
    async fn test_other_types_get_empty_authoritative_answer() {
        let server = start_server(vec![]).await;
        let response = ask(server.local_addr(), &query_message(9, "myapp.test.", RecordType::TXT)).await;

        assert!(response.authoritative());
        assert_eq!(response.answer_count(), 0);
        assert_eq!(response.response_code(), ResponseCode::NoError);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_name_comparison_is_case_insensitive() {
        let server = start_server(vec![]).await;
        let response = ask(server.local_addr(), &query_message(3, "MyApp.TEST.", RecordType::A)).await;
        assert_eq!(response.answer_count(), 1);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_forwarding_returns_first_upstream_response() {
        // Stub upstream answering every query with a fixed A record.
        let upstream = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            let (len, src) = upstream.recv_from(&mut buf).await.unwrap();
            let request = Message::from_vec(&buf[..len]).unwrap();
            let query = request.queries()[0].clone();
            let mut response = Message::new();
            // Deliberately odd id: the daemon must restore the original.
            response.set_id(0xBEEF);
            response.set_message_type(MessageType::Response);
            response.set_op_code(OpCode::Query);
            response.add_query(query.clone());
            response.add_answer(Record::from_rdata(
                query.name().clone(),
                60,
                RData::A(A(Ipv4Addr::new(93, 184, 216, 34))),
            ));
            upstream.send_to(&response.to_vec().unwrap(), src).await.unwrap();
        });

        let server = start_server(vec![upstream_addr.to_string()]).await;
        let response =
            ask(server.local_addr(), &query_message(0x4242, "example.com.", RecordType::A)).await;

        assert_eq!(response.id(), 0x4242);
        match response.answers()[0].data() {
            Some(RData::A(a)) => assert_eq!(a.0, Ipv4Addr::new(93, 184, 216, 34)),
            other => panic!("unexpected rdata {:?}", other),
        }
        server.stop().await;
    }

    #[tokio::test]
    async fn test_all_upstreams_failing_yields_servfail() {
        // Bind-then-drop leaves a port that nothing answers on.
        let dead = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap();
        drop(dead);

        let server = start_server(vec![dead_addr.to_string()]).await;
        let response =
            ask(server.local_addr(), &query_message(11, "example.com.", RecordType::A)).await;

        assert_eq!(response.response_code(), ResponseCode::ServFail);
        assert_eq!(response.id(), 11);
        server.stop().await;
    }
}
