use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use dhcproto::v4;
use dhcproto::{Decodable, Decoder, Encodable, Encoder};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hwaddr::{HardwareAddr, MAX_HARDWARE_ADDRESS_LEN};
use crate::lease::LeaseAllocator;

const DHCP_SERVER_PORT: u16 = 67;
const DHCP_CLIENT_PORT: u16 = 68;
const RECV_BUFFER_SIZE: usize = 1500;

/// The client messages that ask the allocator for an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Discover,
    Request,
}

impl RequestKind {
    pub fn from_message_type(message_type: &v4::MessageType) -> Option<Self> {
        match message_type {
            v4::MessageType::Discover => Some(Self::Discover),
            v4::MessageType::Request => Some(Self::Request),
            _ => None,
        }
    }

    /// OFFER answers DISCOVER, ACK answers REQUEST.
    pub fn reply_type(self) -> v4::MessageType {
        match self {
            Self::Discover => v4::MessageType::Offer,
            Self::Request => v4::MessageType::Ack,
        }
    }
}

pub struct DhcpServer {
    config: Arc<Config>,
    allocator: Arc<LeaseAllocator>,
    socket: Arc<UdpSocket>,
}

impl DhcpServer {
    /// Binds UDP port 67 on `interface` and prepares the allocator.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: Config, interface: &str) -> Result<Self> {
        let config = Arc::new(config);
        let allocator = Arc::new(LeaseAllocator::new(Arc::clone(&config)));

        let socket = Arc::new(Self::create_socket(interface)?);

        info!(
            "DHCP server starting on {} port {}",
            interface, DHCP_SERVER_PORT
        );
        info!(
            "Network {}, range {} - {} ({} addresses, {} reserved)",
            config.network,
            config.range_start,
            config.range_end,
            config.range_size(),
            config.reserved_addresses.len()
        );

        Ok(Self {
            config,
            allocator,
            socket,
        })
    }

    fn create_socket(interface: &str) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|error| Error::Socket(format!("Failed to create socket: {}", error)))?;

        socket
            .set_reuse_address(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", error)))?;

        socket
            .set_broadcast(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_BROADCAST: {}", error)))?;

        #[cfg(any(target_os = "linux", target_os = "android", target_os = "fuchsia"))]
        socket.bind_device(Some(interface.as_bytes())).map_err(|error| {
            Error::Socket(format!(
                "Failed to bind to interface {}: {}",
                interface, error
            ))
        })?;

        #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "fuchsia")))]
        warn!(
            "Binding to interface {} is not supported on this platform; listening on all interfaces",
            interface
        );

        socket
            .set_nonblocking(true)
            .map_err(|error| Error::Socket(format!("Failed to set non-blocking: {}", error)))?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DHCP_SERVER_PORT);
        socket.bind(&bind_addr.into()).map_err(|error| {
            Error::Socket(format!("Failed to bind to {}: {}", bind_addr, error))
        })?;

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket = UdpSocket::from_std(std_socket).map_err(|error| {
            Error::Socket(format!("Failed to convert to tokio socket: {}", error))
        })?;

        Ok(tokio_socket)
    }

    /// Serves requests until the receive loop fails or the future is dropped.
    ///
    /// With `sweep_interval` configured, expired leases are also reclaimed on
    /// a timer; the timer stops together with the receive loop.
    pub async fn run(&self) -> Result<()> {
        info!("DHCP server ready and listening");

        match self.config.sweep_interval_seconds {
            Some(seconds) => {
                tokio::select! {
                    result = self.serve() => result,
                    _ = sweep_periodically(&self.allocator, Duration::from_secs(seconds)) => Ok(()),
                }
            }
            None => self.serve().await,
        }
    }

    async fn serve(&self) -> Result<()> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((size, source)) => {
                    let data = buffer[..size].to_vec();
                    let handler = PacketHandler::new(
                        Arc::clone(&self.config),
                        Arc::clone(&self.allocator),
                    );
                    let socket = Arc::clone(&self.socket);

                    tokio::spawn(async move {
                        match handler.handle_packet(&data).await {
                            Ok(Some(reply)) => {
                                if let Err(error) = reply.send(&socket).await {
                                    warn!("Error sending reply to {}: {}", reply.destination, error);
                                }
                            }
                            Ok(None) => {}
                            Err(error) => {
                                warn!("Error handling packet from {}: {}", source, error);
                            }
                        }
                    });
                }
                Err(error) => {
                    error!("Error receiving packet: {}", error);
                }
            }
        }
    }

    pub fn allocator(&self) -> &LeaseAllocator {
        &self.allocator
    }
}

/// Reclaims expired leases every `period`, starting one period from now.
async fn sweep_periodically(allocator: &LeaseAllocator, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;

    loop {
        interval.tick().await;
        let removed = allocator.reclaim_expired().await;
        if removed > 0 {
            info!("Periodic sweep reclaimed {} expired lease(s)", removed);
        }
    }
}

/// An encoded-on-send reply and where it goes.
struct Reply {
    message: v4::Message,
    destination: SocketAddr,
}

impl Reply {
    async fn send(&self, socket: &UdpSocket) -> Result<()> {
        let mut buffer = Vec::new();
        self.message.encode(&mut Encoder::new(&mut buffer))?;
        socket.send_to(&buffer, self.destination).await?;
        Ok(())
    }
}

struct PacketHandler {
    config: Arc<Config>,
    allocator: Arc<LeaseAllocator>,
}

impl PacketHandler {
    fn new(config: Arc<Config>, allocator: Arc<LeaseAllocator>) -> Self {
        Self { config, allocator }
    }

    /// Decodes one datagram and decides the reply, if any.
    async fn handle_packet(&self, data: &[u8]) -> Result<Option<Reply>> {
        let request = v4::Message::decode(&mut Decoder::new(data))?;

        if request.opcode() != v4::Opcode::BootRequest {
            debug!("Ignoring non-BOOTREQUEST packet");
            return Ok(None);
        }

        if usize::from(request.hlen()) > MAX_HARDWARE_ADDRESS_LEN {
            return Err(Error::InvalidPacket(format!(
                "hardware address length {} exceeds {}",
                request.hlen(),
                MAX_HARDWARE_ADDRESS_LEN
            )));
        }

        let hardware_address = HardwareAddr::new(request.chaddr());
        if hardware_address.is_empty() {
            return Err(Error::InvalidPacket(
                "missing client hardware address".to_string(),
            ));
        }

        let Some(message_type) = request.opts().msg_type() else {
            debug!("Ignoring BOOTP request from {}", hardware_address);
            return Ok(None);
        };

        info!("{:?} from {}", message_type, hardware_address);

        if message_type == v4::MessageType::Release {
            self.handle_release(&request, &hardware_address).await;
            return Ok(None);
        }

        match RequestKind::from_message_type(&message_type) {
            Some(kind) => {
                self.handle_address_request(&request, &hardware_address, kind)
                    .await
            }
            None => {
                debug!("Ignoring {:?} from {}", message_type, hardware_address);
                Ok(None)
            }
        }
    }

    async fn handle_address_request(
        &self,
        request: &v4::Message,
        hardware_address: &HardwareAddr,
        kind: RequestKind,
    ) -> Result<Option<Reply>> {
        let ip = match self.allocator.resolve(hardware_address).await {
            Ok(ip) => ip,
            Err(Error::PoolExhausted) => {
                warn!(
                    "Pool exhausted, dropping {:?} from {}",
                    kind, hardware_address
                );
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        info!("{:?} {} to {}", kind.reply_type(), ip, hardware_address);
        let message = self.build_reply(request, kind, ip);

        Ok(Some(Reply {
            message,
            destination: reply_destination(request),
        }))
    }

    async fn handle_release(&self, request: &v4::Message, hardware_address: &HardwareAddr) {
        let ciaddr = request.ciaddr();
        if ciaddr == Ipv4Addr::UNSPECIFIED {
            warn!("RELEASE from {} with no ciaddr", hardware_address);
            return;
        }

        if self.allocator.release(hardware_address, ciaddr).await {
            info!("RELEASE from {} for {}", hardware_address, ciaddr);
        } else {
            warn!(
                "RELEASE from {} for {} ignored - no matching dynamic lease",
                hardware_address, ciaddr
            );
        }
    }

    fn build_reply(&self, request: &v4::Message, kind: RequestKind, ip: Ipv4Addr) -> v4::Message {
        let server_identifier = self.config.server_identifier();
        let lease_time = self.config.lease_duration_seconds;

        let mut reply = v4::Message::default();
        reply
            .set_opcode(v4::Opcode::BootReply)
            .set_htype(request.htype())
            .set_xid(request.xid())
            .set_flags(request.flags())
            .set_giaddr(request.giaddr())
            .set_chaddr(request.chaddr())
            .set_yiaddr(ip)
            .set_siaddr(server_identifier.unwrap_or(Ipv4Addr::UNSPECIFIED));

        if kind == RequestKind::Request {
            reply.set_ciaddr(request.ciaddr());
        }

        let options = reply.opts_mut();
        options.insert(v4::DhcpOption::MessageType(kind.reply_type()));
        if let Some(server_identifier) = server_identifier {
            options.insert(v4::DhcpOption::ServerIdentifier(server_identifier));
        }
        options.insert(v4::DhcpOption::AddressLeaseTime(lease_time));
        options.insert(v4::DhcpOption::Renewal(lease_time / 2));
        options.insert(v4::DhcpOption::Rebinding(
            (u64::from(lease_time) * 7 / 8) as u32,
        ));
        options.insert(v4::DhcpOption::SubnetMask(self.config.subnet_mask()));

        if let Some(gateway) = self.config.gateway {
            options.insert(v4::DhcpOption::Router(vec![gateway]));
        }

        if !self.config.dns_servers.is_empty() {
            options.insert(v4::DhcpOption::DomainNameServer(
                self.config.dns_servers.clone(),
            ));
        }

        reply
    }
}

fn reply_destination(request: &v4::Message) -> SocketAddr {
    let giaddr = request.giaddr();
    let ciaddr = request.ciaddr();

    if giaddr != Ipv4Addr::UNSPECIFIED {
        SocketAddr::new(IpAddr::V4(giaddr), DHCP_SERVER_PORT)
    } else if request.flags().broadcast() || ciaddr == Ipv4Addr::UNSPECIFIED {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DHCP_CLIENT_PORT)
    } else {
        SocketAddr::new(IpAddr::V4(ciaddr), DHCP_CLIENT_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XID: u32 = 0x12345678;

    fn test_config() -> Config {
        Config {
            network: "192.168.1.0/24".parse().unwrap(),
            range_start: Ipv4Addr::new(192, 168, 1, 100),
            range_end: Ipv4Addr::new(192, 168, 1, 101),
            lease_duration_seconds: 3600,
            gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
            dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8)],
            ..Config::default()
        }
    }

    fn create_test_handler(config: Config) -> PacketHandler {
        let config = Arc::new(config);
        let allocator = Arc::new(LeaseAllocator::new(Arc::clone(&config)));
        PacketHandler::new(config, allocator)
    }

    fn create_dhcp_message(message_type: v4::MessageType, mac: [u8; 6]) -> v4::Message {
        let mut message = v4::Message::default();
        message
            .set_opcode(v4::Opcode::BootRequest)
            .set_htype(v4::HType::Eth)
            .set_chaddr(&mac)
            .set_xid(XID)
            .set_flags(v4::Flags::default().set_broadcast());
        message
            .opts_mut()
            .insert(v4::DhcpOption::MessageType(message_type));
        message
    }

    fn encode(message: &v4::Message) -> Vec<u8> {
        let mut buffer = Vec::new();
        message.encode(&mut Encoder::new(&mut buffer)).unwrap();
        buffer
    }

    async fn exchange(handler: &PacketHandler, message: &v4::Message) -> Option<Reply> {
        handler.handle_packet(&encode(message)).await.unwrap()
    }

    #[test]
    fn test_constants() {
        assert_eq!(DHCP_SERVER_PORT, 67);
        assert_eq!(DHCP_CLIENT_PORT, 68);
        assert_eq!(RECV_BUFFER_SIZE, 1500);
    }

    #[test]
    fn test_request_kind_mapping() {
        assert_eq!(
            RequestKind::from_message_type(&v4::MessageType::Discover),
            Some(RequestKind::Discover)
        );
        assert_eq!(
            RequestKind::from_message_type(&v4::MessageType::Request),
            Some(RequestKind::Request)
        );
        assert_eq!(
            RequestKind::from_message_type(&v4::MessageType::Inform),
            None
        );
        assert_eq!(RequestKind::Discover.reply_type(), v4::MessageType::Offer);
        assert_eq!(RequestKind::Request.reply_type(), v4::MessageType::Ack);
    }

    #[tokio::test]
    async fn test_handle_discover_offers_first_free_address() {
        let handler = create_test_handler(test_config());
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01];

        let reply = exchange(&handler, &create_dhcp_message(v4::MessageType::Discover, mac))
            .await
            .expect("OFFER expected");
        let offer = &reply.message;

        assert_eq!(offer.opcode(), v4::Opcode::BootReply);
        assert_eq!(offer.xid(), XID);
        assert_eq!(offer.chaddr(), &mac[..]);
        assert_eq!(offer.yiaddr(), Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(offer.siaddr(), Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(offer.opts().msg_type(), Some(v4::MessageType::Offer));

        assert!(matches!(
            offer.opts().get(v4::OptionCode::SubnetMask),
            Some(v4::DhcpOption::SubnetMask(mask)) if *mask == Ipv4Addr::new(255, 255, 255, 0)
        ));
        assert!(matches!(
            offer.opts().get(v4::OptionCode::AddressLeaseTime),
            Some(v4::DhcpOption::AddressLeaseTime(3600))
        ));
        assert!(matches!(
            offer.opts().get(v4::OptionCode::Renewal),
            Some(v4::DhcpOption::Renewal(1800))
        ));
        assert!(matches!(
            offer.opts().get(v4::OptionCode::Rebinding),
            Some(v4::DhcpOption::Rebinding(3150))
        ));
        assert!(matches!(
            offer.opts().get(v4::OptionCode::Router),
            Some(v4::DhcpOption::Router(routers)) if routers == &vec![Ipv4Addr::new(192, 168, 1, 1)]
        ));
        assert!(matches!(
            offer.opts().get(v4::OptionCode::DomainNameServer),
            Some(v4::DhcpOption::DomainNameServer(servers)) if servers == &vec![Ipv4Addr::new(8, 8, 8, 8)]
        ));
        assert!(matches!(
            offer.opts().get(v4::OptionCode::ServerIdentifier),
            Some(v4::DhcpOption::ServerIdentifier(ip)) if *ip == Ipv4Addr::new(192, 168, 1, 1)
        ));

        assert_eq!(
            reply.destination,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DHCP_CLIENT_PORT)
        );
    }

    #[tokio::test]
    async fn test_handle_request_acks_offered_address() {
        let handler = create_test_handler(test_config());
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02];

        let offer = exchange(&handler, &create_dhcp_message(v4::MessageType::Discover, mac))
            .await
            .unwrap();

        let mut request = create_dhcp_message(v4::MessageType::Request, mac);
        request
            .opts_mut()
            .insert(v4::DhcpOption::RequestedIpAddress(offer.message.yiaddr()));
        let ack = exchange(&handler, &request).await.unwrap();

        assert_eq!(ack.message.opts().msg_type(), Some(v4::MessageType::Ack));
        assert_eq!(ack.message.yiaddr(), offer.message.yiaddr());
        assert_eq!(handler.allocator.active_lease_count().await, 1);
    }

    #[tokio::test]
    async fn test_optional_options_omitted() {
        let handler = create_test_handler(Config {
            gateway: None,
            dns_servers: vec![],
            ..test_config()
        });
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x03];

        let reply = exchange(&handler, &create_dhcp_message(v4::MessageType::Discover, mac))
            .await
            .unwrap();
        let options = reply.message.opts();

        assert!(options.get(v4::OptionCode::Router).is_none());
        assert!(options.get(v4::OptionCode::DomainNameServer).is_none());
        assert!(options.get(v4::OptionCode::ServerIdentifier).is_none());
        assert_eq!(reply.message.siaddr(), Ipv4Addr::UNSPECIFIED);
    }

    #[tokio::test]
    async fn test_explicit_server_ip_is_identifier() {
        let handler = create_test_handler(Config {
            server_ip: Some(Ipv4Addr::new(192, 168, 1, 2)),
            ..test_config()
        });
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x04];

        let reply = exchange(&handler, &create_dhcp_message(v4::MessageType::Discover, mac))
            .await
            .unwrap();

        assert_eq!(reply.message.siaddr(), Ipv4Addr::new(192, 168, 1, 2));
        assert!(matches!(
            reply.message.opts().get(v4::OptionCode::ServerIdentifier),
            Some(v4::DhcpOption::ServerIdentifier(ip)) if *ip == Ipv4Addr::new(192, 168, 1, 2)
        ));
    }

    #[tokio::test]
    async fn test_pool_exhausted_drops_request() {
        let handler = create_test_handler(test_config());

        for last in 1..=2 {
            let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, last];
            assert!(
                exchange(&handler, &create_dhcp_message(v4::MessageType::Discover, mac))
                    .await
                    .is_some()
            );
        }

        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x03];
        let reply = exchange(&handler, &create_dhcp_message(v4::MessageType::Discover, mac)).await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_handle_release() {
        let handler = create_test_handler(test_config());
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x05];

        let ack = exchange(&handler, &create_dhcp_message(v4::MessageType::Request, mac))
            .await
            .unwrap();
        let ip = ack.message.yiaddr();
        assert_eq!(handler.allocator.free_address_count().await, 1);

        let mut release = create_dhcp_message(v4::MessageType::Release, mac);
        release.set_ciaddr(ip);
        assert!(exchange(&handler, &release).await.is_none());

        let client = HardwareAddr::from(mac);
        assert!(handler.allocator.lease(&client).await.is_none());
        assert_eq!(handler.allocator.free_address_count().await, 2);
    }

    #[tokio::test]
    async fn test_handle_release_no_ciaddr() {
        let handler = create_test_handler(test_config());
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x06];

        exchange(&handler, &create_dhcp_message(v4::MessageType::Request, mac)).await;
        let release = create_dhcp_message(v4::MessageType::Release, mac);
        assert!(exchange(&handler, &release).await.is_none());

        assert!(handler.allocator.lease(&HardwareAddr::from(mac)).await.is_some());
    }

    #[tokio::test]
    async fn test_ignores_other_messages() {
        let handler = create_test_handler(test_config());
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x07];

        let inform = create_dhcp_message(v4::MessageType::Inform, mac);
        assert!(exchange(&handler, &inform).await.is_none());

        let mut reply_opcode = create_dhcp_message(v4::MessageType::Discover, mac);
        reply_opcode.set_opcode(v4::Opcode::BootReply);
        assert!(exchange(&handler, &reply_opcode).await.is_none());

        let mut bootp = v4::Message::default();
        bootp
            .set_opcode(v4::Opcode::BootRequest)
            .set_chaddr(&mac);
        assert!(exchange(&handler, &bootp).await.is_none());

        assert_eq!(handler.allocator.free_address_count().await, 2);
    }

    #[tokio::test]
    async fn test_garbage_is_an_error() {
        let handler = create_test_handler(test_config());
        assert!(handler.handle_packet(&[1, 2, 3]).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_hardware_length_is_an_error() {
        let handler = create_test_handler(test_config());
        let mut packet = encode(&create_dhcp_message(v4::MessageType::Discover, [0x55; 6]));
        packet[2] = 20;

        let result = handler.handle_packet(&packet).await;
        assert!(matches!(result, Err(Error::InvalidPacket(_))));
        assert_eq!(handler.allocator.free_address_count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweep_reclaims_without_traffic() {
        let config = Arc::new(test_config());
        let allocator = LeaseAllocator::new(Arc::clone(&config));
        let issued = chrono::Utc::now() - chrono::TimeDelta::seconds(7200);
        for last in 1..=2 {
            let mac = HardwareAddr::from([0xaa, 0xbb, 0xcc, 0xdd, 0xee, last]);
            allocator.resolve_at(&mac, issued).await.unwrap();
        }
        assert_eq!(allocator.free_address_count().await, 0);

        tokio::select! {
            _ = sweep_periodically(&allocator, Duration::from_secs(60)) => {}
            _ = tokio::time::sleep(Duration::from_secs(30)) => {}
        }
        assert_eq!(allocator.free_address_count().await, 0);

        tokio::select! {
            _ = sweep_periodically(&allocator, Duration::from_secs(60)) => {}
            _ = tokio::time::sleep(Duration::from_secs(90)) => {}
        }
        assert_eq!(allocator.free_address_count().await, 2);
        assert!(allocator.leases().await.is_empty());
    }

    #[test]
    fn test_reply_destination_unicast() {
        let mut request = create_dhcp_message(v4::MessageType::Request, [0x11; 6]);
        request
            .set_flags(v4::Flags::default())
            .set_ciaddr(Ipv4Addr::new(192, 168, 1, 100));

        assert_eq!(
            reply_destination(&request),
            SocketAddr::new(
                IpAddr::V4(Ipv4Addr::new(192, 168, 1, 100)),
                DHCP_CLIENT_PORT
            )
        );
    }

    #[test]
    fn test_reply_destination_broadcast_without_flag() {
        let mut request = create_dhcp_message(v4::MessageType::Discover, [0x12; 6]);
        request
            .set_flags(v4::Flags::default())
            .set_ciaddr(Ipv4Addr::UNSPECIFIED);

        assert_eq!(
            reply_destination(&request),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DHCP_CLIENT_PORT)
        );
    }

    #[test]
    fn test_reply_destination_relay() {
        let mut request = create_dhcp_message(v4::MessageType::Discover, [0x22; 6]);
        request.set_giaddr(Ipv4Addr::new(10, 1, 1, 1));

        assert_eq!(
            reply_destination(&request),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 1, 1, 1)), DHCP_SERVER_PORT)
        );
    }

    #[tokio::test]
    async fn test_reply_sent_over_socket() {
        let handler = create_test_handler(test_config());
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x08];

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut reply = exchange(&handler, &create_dhcp_message(v4::MessageType::Discover, mac))
            .await
            .unwrap();
        reply.destination = client.local_addr().unwrap();
        reply.send(&server).await.unwrap();

        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        let (size, _) = client.recv_from(&mut buffer).await.unwrap();
        let decoded = v4::Message::decode(&mut Decoder::new(&buffer[..size])).unwrap();
        assert_eq!(decoded.yiaddr(), reply.message.yiaddr());
        assert_eq!(decoded.opts().msg_type(), Some(v4::MessageType::Offer));
    }

    mod fuzz {
        use super::*;
        use proptest::prelude::*;

        fn runtime() -> tokio::runtime::Runtime {
            tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap()
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(2000))]

            #[test]
            fn handle_packet_never_panics_on_arbitrary_bytes(data: Vec<u8>) {
                let handler = create_test_handler(test_config());
                let _ = runtime().block_on(handler.handle_packet(&data));
            }

            #[test]
            fn handle_packet_never_panics_on_truncated_discover(cut in 0usize..300) {
                let handler = create_test_handler(test_config());
                let packet = encode(&create_dhcp_message(v4::MessageType::Discover, [0x33; 6]));
                let end = cut.min(packet.len());
                let _ = runtime().block_on(handler.handle_packet(&packet[..end]));
            }

            #[test]
            fn handle_packet_never_panics_on_corrupted_options(
                corruption_indices in prop::collection::vec(240usize..300, 1..10),
                corruption_values in prop::collection::vec(any::<u8>(), 1..10)
            ) {
                let handler = create_test_handler(test_config());
                let mut packet = encode(&create_dhcp_message(v4::MessageType::Request, [0x44; 6]));
                for (index, value) in corruption_indices.iter().zip(corruption_values.iter()) {
                    if *index < packet.len() {
                        packet[*index] = *value;
                    }
                }
                let _ = runtime().block_on(handler.handle_packet(&packet));
            }
        }
    }
}
