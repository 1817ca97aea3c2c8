//! Direct channel over plain TCP.
//!
//! The initiator listens; its offer carries a random session token and its
//! candidates are `tcp <ip>:<port>`. The responder dials every candidate and
//! proves the token in the first frame; the initiator echoes it on the one
//! connection it keeps.

use drop_core::ChannelMessage;
use drop_core::channel::tcp::{read_frame, spawn as spawn_channel, write_frame};
use drop_core::relay::{Descriptor, DescriptorKind};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::event::PeerEvent;
use crate::negotiation::{NegotiationError, Transport};

const CANDIDATE_PREFIX: &str = "tcp ";
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TcpTransport {
    events: mpsc::UnboundedSender<PeerEvent>,
    advertise_hosts: Vec<IpAddr>,
    connect_timeout: Duration,
    token: Option<String>,
    is_initiator: bool,
    opened: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl TcpTransport {
    /// `advertise_hosts` empty means loopback plus the LAN address
    pub fn new(
        events: mpsc::UnboundedSender<PeerEvent>,
        advertise_hosts: &[String],
        connect_timeout: Duration,
    ) -> Self {
        let mut hosts: Vec<IpAddr> = advertise_hosts
            .iter()
            .filter_map(|h| match h.parse() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    warn!("Ignoring invalid advertise host {}", h);
                    None
                }
            })
            .collect();
        if hosts.is_empty() {
            hosts.push(IpAddr::V4(Ipv4Addr::LOCALHOST));
            if let Some(ip) = lan_ip() {
                hosts.push(ip);
            }
        }

        Self {
            events,
            advertise_hosts: hosts,
            connect_timeout,
            token: None,
            is_initiator: false,
            opened: Arc::new(AtomicBool::new(false)),
            tasks: Vec::new(),
        }
    }
}

impl Transport for TcpTransport {
    fn create_offer(&mut self) -> Result<Descriptor, NegotiationError> {
        self.close();
        let token = Uuid::new_v4().simple().to_string();

        let listener = std::net::TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        let port = listener.local_addr()?.port();
        info!("Direct listener on port {}", port);

        self.tasks.push(tokio::spawn(accept_loop(
            listener,
            token.clone(),
            self.events.clone(),
            self.opened.clone(),
        )));

        for host in &self.advertise_hosts {
            let candidate = format!("{}{}", CANDIDATE_PREFIX, SocketAddr::new(*host, port));
            let _ = self.events.send(PeerEvent::LocalCandidate(candidate));
        }

        self.is_initiator = true;
        self.token = Some(token.clone());
        Ok(Descriptor {
            kind: DescriptorKind::Offer,
            sdp: token,
        })
    }

    fn accept_offer(&mut self, offer: &Descriptor) -> Result<Descriptor, NegotiationError> {
        self.close();
        if offer.sdp.is_empty() {
            return Err(NegotiationError::Transport("offer without session token".into()));
        }
        self.is_initiator = false;
        self.token = Some(offer.sdp.clone());
        Ok(Descriptor {
            kind: DescriptorKind::Answer,
            sdp: offer.sdp.clone(),
        })
    }

    fn accept_answer(&mut self, answer: &Descriptor) -> Result<(), NegotiationError> {
        match &self.token {
            Some(token) if *token == answer.sdp => Ok(()),
            _ => Err(NegotiationError::Transport("answer does not match the offer".into())),
        }
    }

    fn add_remote_candidate(&mut self, candidate: &str) -> Result<(), NegotiationError> {
        if self.is_initiator {
            debug!("Initiator ignores remote candidate {}", candidate);
            return Ok(());
        }
        let Some(token) = self.token.clone() else {
            return Err(NegotiationError::Transport("candidate before offer".into()));
        };
        let addr = parse_candidate(candidate)?;

        self.tasks.push(tokio::spawn(dial(
            addr,
            token,
            self.connect_timeout,
            self.events.clone(),
            self.opened.clone(),
        )));
        Ok(())
    }

    fn close(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.token = None;
        self.opened = Arc::new(AtomicBool::new(false));
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// `tcp 192.168.1.20:40123` -> socket address
pub fn parse_candidate(candidate: &str) -> Result<SocketAddr, NegotiationError> {
    candidate
        .strip_prefix(CANDIDATE_PREFIX)
        .and_then(|addr| addr.trim().parse().ok())
        .ok_or_else(|| NegotiationError::InvalidCandidate(candidate.to_string()))
}

async fn accept_loop(
    listener: TcpListener,
    token: String,
    events: mpsc::UnboundedSender<PeerEvent>,
    opened: Arc<AtomicBool>,
) {
    // Dropped with the loop, which aborts handshakes still in flight
    let mut handshakes = JoinSet::new();

    while !opened.load(Ordering::SeqCst) {
        let (stream, addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Direct listener accept failed: {}", e);
                    break;
                }
            },
            Some(_) = handshakes.join_next(), if !handshakes.is_empty() => continue,
        };
        debug!("Direct connection attempt from {}", addr);
        handshakes.spawn(accept_handshake(
            stream,
            addr,
            token.clone(),
            events.clone(),
            opened.clone(),
        ));
    }
}

/// Check the dialer's token and echo it back if this is the first good connection
async fn accept_handshake(
    mut stream: TcpStream,
    addr: SocketAddr,
    token: String,
    events: mpsc::UnboundedSender<PeerEvent>,
    opened: Arc<AtomicBool>,
) {
    let proof = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame(&mut stream)).await;
    match proof {
        Ok(Ok(Some(ChannelMessage::Text(t)))) if t == token => {}
        _ => {
            warn!("Rejecting direct connection from {}: bad session token", addr);
            return;
        }
    }

    if opened.swap(true, Ordering::SeqCst) {
        debug!("Dropping extra connection from {}", addr);
        return;
    }
    if let Err(e) = write_frame(&mut stream, &ChannelMessage::Text(token)).await {
        warn!("Direct handshake with {} failed: {}", addr, e);
        opened.store(false, Ordering::SeqCst);
        return;
    }

    info!("Direct channel accepted from {}", addr);
    let _ = events.send(PeerEvent::ChannelOpen(spawn_channel(stream)));
}

async fn dial(
    addr: SocketAddr,
    token: String,
    connect_timeout: Duration,
    events: mpsc::UnboundedSender<PeerEvent>,
    opened: Arc<AtomicBool>,
) {
    let handshake = async {
        let mut stream = TcpStream::connect(addr).await?;
        write_frame(&mut stream, &ChannelMessage::Text(token.clone())).await?;
        match read_frame(&mut stream).await? {
            Some(ChannelMessage::Text(echo)) if echo == token => Ok(stream),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "peer did not confirm the session token",
            )),
        }
    };

    match tokio::time::timeout(connect_timeout, handshake).await {
        Ok(Ok(stream)) => {
            if opened.swap(true, Ordering::SeqCst) {
                debug!("Dropping extra connection to {}", addr);
                return;
            }
            info!("Direct channel connected to {}", addr);
            let _ = events.send(PeerEvent::ChannelOpen(spawn_channel(stream)));
        }
        Ok(Err(e)) => debug!("Candidate {} failed: {}", addr, e),
        Err(_) => debug!("Candidate {} timed out", addr),
    }
}

/// Local IPv4 address, preferring private LAN ranges
fn lan_ip() -> Option<IpAddr> {
    let ips = local_ip_address::list_afinet_netifas().ok()?;
    let mut best: Option<IpAddr> = None;
    for (_name, ip) in ips {
        let IpAddr::V4(v4) = ip else { continue };
        if v4.is_loopback() || v4.is_link_local() {
            continue;
        }
        if v4.octets()[0] == 192 && v4.octets()[1] == 168 {
            return Some(ip);
        }
        if v4.is_private() || best.is_none() {
            best = Some(ip);
        }
    }
    best
}
