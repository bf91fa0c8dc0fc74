//! Minimal DHCPv4 client: DISCOVER/OFFER/REQUEST/ACK over a broadcast
//! socket bound to the interface.
//!
//! The host's user-mode network stack answers on the local segment, so the
//! client stays deliberately small: no lease renewal (the guest reboots long
//! before any sane lease expires), no option negotiation beyond mask, router
//! and DNS. An exchange that times out waiting for OFFER or ACK counts as
//! incomplete and the loop simply tries again until the attempt budget runs
//! out.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use dhcproto::v4::{DhcpOption, Flags, Message, MessageType, Opcode, OptionCode};
use dhcproto::{Decodable, Decoder, Encodable, Encoder};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::{Instant, sleep, timeout_at};
use tokio_util::sync::CancellationToken;
use vmlite_shared::{VmliteError, VmliteResult};

pub const DEFAULT_DHCP_ATTEMPTS: u32 = 3;

const CLIENT_PORT: u16 = 68;
const SERVER_PORT: u16 = 67;
const RETRY_BACKOFF: Duration = Duration::from_millis(10);
/// Per-message receive deadline within one exchange.
const REPLY_TIMEOUT: Duration = Duration::from_secs(4);

/// What the ACK granted us.
#[derive(Debug, Clone)]
pub struct Lease {
    pub addr: Ipv4Addr,
    pub prefix: u8,
    pub router: Option<Ipv4Addr>,
    pub dns: Vec<Ipv4Addr>,
}

/// An attempt budget of zero means "use the default".
pub fn effective_attempts(attempts: u32) -> u32 {
    if attempts == 0 {
        DEFAULT_DHCP_ATTEMPTS
    } else {
        attempts
    }
}

/// Acquire a lease on `iface`, retrying up to `attempts` exchanges.
///
/// Cancellation is observed on every iteration boundary and while waiting
/// on the socket; a cancelled acquisition returns promptly.
pub async fn acquire(
    iface: &str,
    mac: &[u8],
    attempts: u32,
    cancel: &CancellationToken,
) -> VmliteResult<Lease> {
    let attempts = effective_attempts(attempts);
    let mut last_err: Option<VmliteError> = None;

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(VmliteError::Network("cancelled during DHCP".into()));
        }

        let exchange = tokio::select! {
            result = run_exchange(iface, mac) => result,
            _ = cancel.cancelled() => {
                return Err(VmliteError::Network("cancelled during DHCP".into()));
            }
        };

        match exchange {
            Ok(Some(lease)) => return Ok(lease),
            Ok(None) => {
                tracing::warn!(attempt, "DHCP exchange incomplete (missing OFFER or ACK)");
            }
            Err(err) => {
                tracing::warn!(attempt, error = %err, "DHCP attempt failed");
                last_err = Some(err);
            }
        }

        tokio::select! {
            _ = sleep(RETRY_BACKOFF) => {}
            _ = cancel.cancelled() => {
                return Err(VmliteError::Network("cancelled during DHCP".into()));
            }
        }
    }

    let cause = last_err
        .map(|err| err.to_string())
        .unwrap_or_else(|| "no complete exchange".to_string());
    Err(VmliteError::Network(format!(
        "DHCP failed after {attempts} attempts: {cause}"
    )))
}

/// One full DORA exchange. `Ok(None)` means the conversation stalled
/// (no OFFER, no ACK, or a NAK) rather than failing outright.
async fn run_exchange(iface: &str, mac: &[u8]) -> VmliteResult<Option<Lease>> {
    let socket = open_socket(iface)?;
    let xid: u32 = rand::random();

    send(&socket, &build_discover(xid, mac)).await?;
    let Some(offer) = recv_reply(&socket, xid, MessageType::Offer).await? else {
        return Ok(None);
    };

    let server_id = ipv4_option(&offer, OptionCode::ServerIdentifier);
    send(&socket, &build_request(xid, mac, offer.yiaddr(), server_id)).await?;
    let Some(ack) = recv_reply(&socket, xid, MessageType::Ack).await? else {
        return Ok(None);
    };

    Ok(Some(lease_from(&ack)))
}

fn open_socket(iface: &str) -> VmliteResult<UdpSocket> {
    let net_err = |what: &'static str| {
        move |err: std::io::Error| VmliteError::Network(format!("dhcp socket {what}: {err}"))
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(net_err("create"))?;
    socket.set_reuse_address(true).map_err(net_err("reuse"))?;
    socket.set_broadcast(true).map_err(net_err("broadcast"))?;
    socket
        .bind_device(Some(iface.as_bytes()))
        .map_err(net_err("bind device"))?;
    socket
        .bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, CLIENT_PORT)).into())
        .map_err(net_err("bind"))?;
    socket.set_nonblocking(true).map_err(net_err("nonblocking"))?;

    UdpSocket::from_std(socket.into()).map_err(net_err("register"))
}

async fn send(socket: &UdpSocket, msg: &Message) -> VmliteResult<()> {
    let mut buf = Vec::new();
    let mut encoder = Encoder::new(&mut buf);
    msg.encode(&mut encoder)
        .map_err(|err| VmliteError::Network(format!("encode dhcp message: {err}")))?;

    socket
        .send_to(&buf, (Ipv4Addr::BROADCAST, SERVER_PORT))
        .await
        .map_err(|err| VmliteError::Network(format!("send dhcp message: {err}")))?;
    Ok(())
}

/// Wait for a reply of the wanted type for our transaction. `Ok(None)` on
/// deadline or NAK; replies for other transactions are ignored.
async fn recv_reply(
    socket: &UdpSocket,
    xid: u32,
    wanted: MessageType,
) -> VmliteResult<Option<Message>> {
    let deadline = Instant::now() + REPLY_TIMEOUT;
    let mut buf = [0u8; 2048];

    loop {
        let received = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, _peer))) => len,
            Ok(Err(err)) => {
                return Err(VmliteError::Network(format!("recv dhcp reply: {err}")));
            }
            Err(_) => return Ok(None),
        };

        let Ok(msg) = Message::decode(&mut Decoder::new(&buf[..received])) else {
            continue;
        };
        if msg.xid() != xid {
            continue;
        }

        match message_type(&msg) {
            Some(kind) if kind == wanted => return Ok(Some(msg)),
            Some(MessageType::Nak) => {
                tracing::warn!("DHCP server answered with NAK");
                return Ok(None);
            }
            _ => continue,
        }
    }
}

fn base_message(xid: u32, mac: &[u8]) -> Message {
    let mut msg = Message::default();
    msg.set_opcode(Opcode::BootRequest)
        .set_xid(xid)
        .set_flags(Flags::default().set_broadcast())
        .set_chaddr(mac);
    msg
}

fn build_discover(xid: u32, mac: &[u8]) -> Message {
    let mut msg = base_message(xid, mac);
    msg.opts_mut()
        .insert(DhcpOption::MessageType(MessageType::Discover));
    msg.opts_mut().insert(DhcpOption::ParameterRequestList(vec![
        OptionCode::SubnetMask,
        OptionCode::Router,
        OptionCode::DomainNameServer,
    ]));
    msg
}

fn build_request(
    xid: u32,
    mac: &[u8],
    offered: Ipv4Addr,
    server_id: Option<Ipv4Addr>,
) -> Message {
    let mut msg = base_message(xid, mac);
    msg.opts_mut()
        .insert(DhcpOption::MessageType(MessageType::Request));
    msg.opts_mut()
        .insert(DhcpOption::RequestedIpAddress(offered));
    if let Some(server) = server_id {
        msg.opts_mut().insert(DhcpOption::ServerIdentifier(server));
    }
    msg.opts_mut().insert(DhcpOption::ParameterRequestList(vec![
        OptionCode::SubnetMask,
        OptionCode::Router,
        OptionCode::DomainNameServer,
    ]));
    msg
}

fn message_type(msg: &Message) -> Option<MessageType> {
    match msg.opts().get(OptionCode::MessageType) {
        Some(DhcpOption::MessageType(kind)) => Some(*kind),
        _ => None,
    }
}

fn ipv4_option(msg: &Message, code: OptionCode) -> Option<Ipv4Addr> {
    match msg.opts().get(code) {
        Some(DhcpOption::ServerIdentifier(addr)) => Some(*addr),
        Some(DhcpOption::SubnetMask(addr)) => Some(*addr),
        _ => None,
    }
}

fn lease_from(ack: &Message) -> Lease {
    let prefix = ipv4_option(ack, OptionCode::SubnetMask)
        .map(|mask| u32::from(mask).count_ones() as u8)
        .unwrap_or(24);

    let router = match ack.opts().get(OptionCode::Router) {
        Some(DhcpOption::Router(routers)) => routers.first().copied(),
        _ => None,
    };

    let dns = match ack.opts().get(OptionCode::DomainNameServer) {
        Some(DhcpOption::DomainNameServer(servers)) => servers.clone(),
        _ => Vec::new(),
    };

    Lease {
        addr: ack.yiaddr(),
        prefix,
        router,
        dns,
    }
}
