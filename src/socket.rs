extern crate socket2;

use std::{ net::{ IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, UdpSocket }, io };
use std::io::IoSliceMut;
use std::os::fd::AsRawFd;
use nix::cmsg_space;
use nix::errno::Errno;
use nix::libc;
use nix::sys::socket::{ recvmsg, setsockopt, sockopt, ControlMessageOwned, MsgFlags, SockaddrStorage };
use socket2::{ Socket, Domain, Type, SockAddr, Protocol };

use crate::mdnsd_error::MdnsdError;

pub const MULTICAST_PORT: u16 = 5353;
pub const MULTICAST_ADDR_IPV4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub const MULTICAST_ADDR_IPV6: Ipv6Addr = Ipv6Addr::new(0xFF02, 0, 0, 0, 0, 0, 0, 0xFB);

// RFC 6762 section 6.1 allows datagrams up to 9000 bytes plus headers.
pub const MAX_DATAGRAM_LEN: usize = 9036;

lazy_static!
{
    pub(crate) static ref MULTICAST_IPV4_SOCKET: SocketAddr = SocketAddr::new(IpAddr::V4(MULTICAST_ADDR_IPV4), MULTICAST_PORT);
    static ref ANY_IPV4_MDNS: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), MULTICAST_PORT);
    static ref ANY_IPV6_MDNS: SocketAddr = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), MULTICAST_PORT);
}

// Where a datagram was delivered, taken from IP_PKTINFO / IPV6_PKTINFO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketInfo
{
    pub local_v4: Option<Ipv4Addr>,
    pub local_v6: Option<Ipv6Addr>,
    pub index: u32
}

#[derive(Debug, Clone, Copy)]
pub struct Datagram
{
    pub len: usize,
    pub source: SocketAddr,
    pub info: PacketInfo
}

fn create_socket(domain: Domain) -> io::Result<Socket>
{
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;

    // Other responders (avahi and friends) hold 5353 as well.
    #[cfg(not(windows))]
    socket.set_reuse_port(true)?;

    Ok(socket)
}

fn enable_packet_info(socket: &Socket, ipv6: bool) -> Result<(), nix::Error>
{
    setsockopt(socket.as_raw_fd(), sockopt::Ipv4PacketInfo, &true)?;

    if ipv6
    {
        setsockopt(socket.as_raw_fd(), sockopt::Ipv6RecvPacketInfo, &true)?;
    }

    Ok(())
}

fn bind_error(err: nix::Error) -> io::Error
{
    io::Error::from_raw_os_error(err as i32)
}

// The listening socket on port 5353. Dual-stack unless IPv4-only, so IPv4
// datagrams arrive as mapped addresses with an IPv4 packet info item.
pub fn bind_mdns(ipv4_only: bool) -> Result<Socket, MdnsdError>
{
    let addr = if ipv4_only
    {
        *ANY_IPV4_MDNS
    }
    else
    {
        *ANY_IPV6_MDNS
    };

    bind_listener(addr)
}

pub(crate) fn bind_listener(addr: SocketAddr) -> Result<Socket, MdnsdError>
{
    let ipv6 = addr.is_ipv6();
    let socket = create_socket(Domain::for_address(addr)).map_err(MdnsdError::MdnsBindError)?;

    if ipv6
    {
        socket.set_only_v6(false).map_err(MdnsdError::MdnsBindError)?;
    }

    socket.bind(&SockAddr::from(addr)).map_err(MdnsdError::MdnsBindError)?;
    enable_packet_info(&socket, ipv6).map_err(|err| MdnsdError::MdnsBindError(bind_error(err)))?;
    socket.set_nonblocking(true).map_err(MdnsdError::MdnsBindError)?;

    Ok(socket)
}

pub fn bind_resolver(addr: SocketAddrV4) -> Result<Socket, MdnsdError>
{
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(MdnsdError::ResolverBindError)?;
    socket.set_reuse_address(true).map_err(MdnsdError::ResolverBindError)?;
    socket.bind(&SockAddr::from(SocketAddr::V4(addr))).map_err(MdnsdError::ResolverBindError)?;
    enable_packet_info(&socket, false).map_err(|err| MdnsdError::ResolverBindError(bind_error(err)))?;
    socket.set_nonblocking(true).map_err(MdnsdError::ResolverBindError)?;

    Ok(socket)
}

fn to_socket_addr(storage: &SockaddrStorage) -> Option<SocketAddr>
{
    if let Some(sin) = storage.as_sockaddr_in()
    {
        return Some(SocketAddr::V4(SocketAddrV4::from(*sin)));
    }

    if let Some(sin6) = storage.as_sockaddr_in6()
    {
        return Some(SocketAddr::V6(SocketAddrV6::from(*sin6)));
    }

    None
}

// Non-blocking receive of one datagram with its packet info. Returns None when
// nothing is queued.
pub fn receive(socket: &Socket, buffer: &mut [u8]) -> Result<Option<Datagram>, MdnsdError>
{
    let mut cmsg_buffer = cmsg_space!(libc::in_pktinfo, libc::in6_pktinfo);
    let mut iov = [IoSliceMut::new(buffer)];

    let message = match recvmsg::<SockaddrStorage>(socket.as_raw_fd(), &mut iov, Some(&mut cmsg_buffer), MsgFlags::MSG_DONTWAIT)
    {
        Ok(message) => message,
        Err(Errno::EAGAIN) | Err(Errno::EINTR) => return Ok(None),
        Err(err) => return Err(err.into())
    };

    let mut info = PacketInfo::default();
    for cmsg in message.cmsgs()
    {
        match cmsg
        {
            ControlMessageOwned::Ipv4PacketInfo(pktinfo) =>
            {
                info.local_v4 = Some(Ipv4Addr::from(u32::from_be(pktinfo.ipi_spec_dst.s_addr)));
                info.index = pktinfo.ipi_ifindex as u32;
            },
            ControlMessageOwned::Ipv6PacketInfo(pktinfo) =>
            {
                // IPv4 datagrams on a dual-stack socket also carry an IPv6
                // item with the mapped address; it is not an IPv6 destination.
                let addr = Ipv6Addr::from(pktinfo.ipi6_addr.s6_addr);
                if addr.to_ipv4_mapped().is_none()
                {
                    info.local_v6 = Some(addr);
                    info.index = pktinfo.ipi6_ifindex as u32;
                }
            },
            _ => ()
        }
    }

    let source = match message.address.as_ref().and_then(to_socket_addr)
    {
        Some(source) => source,
        None => return Err(io::Error::new(io::ErrorKind::InvalidData, "datagram without source address").into())
    };

    Ok(Some(Datagram
    {
        len: message.bytes,
        source,
        info
    }))
}

pub fn send_to(socket: &Socket, data: &[u8], addr: &SocketAddr) -> io::Result<usize>
{
    socket.send_to(data, &SockAddr::from(*addr))
}

// Sends an answer to the IPv4 mDNS group from a fresh socket on port 5353 so
// other listeners see an authoritative multicast answer.
pub fn announce(answer: &[u8]) -> Result<(), MdnsdError>
{
    let socket = create_socket(Domain::IPV4)?;
    socket.bind(&SockAddr::from(*ANY_IPV4_MDNS))?;
    socket.send_to(answer, &SockAddr::from(*MULTICAST_IPV4_SOCKET))?;

    Ok(())
}

// Private socket of one relay worker: ephemeral port, no multicast loopback
// so the worker never hears its own query.
pub fn create_relay_socket() -> Result<UdpSocket, MdnsdError>
{
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_multicast_loop_v4(false)?;
    socket.bind(&SockAddr::from(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)))?;

    Ok(socket.into())
}
