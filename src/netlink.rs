use std::net::{ IpAddr, Ipv4Addr, Ipv6Addr };
use std::os::fd::{ AsRawFd, RawFd };
use log::{ debug, trace };
use nix::errno::Errno;
use nix::libc;
use nix::sys::socket::{ bind, recv, MsgFlags, NetlinkAddr };
use socket2::{ Domain, Protocol, Socket, Type };

use crate::mdnsd_error::MdnsdError;

const NLMSG_HDRLEN: usize = 16;
const NLMSG_DONE: u16 = 3;
const RTM_NEWADDR: u16 = 20;

const IFADDRMSG_LEN: usize = 8;
const RTA_HDRLEN: usize = 4;
const IFA_ADDRESS: u16 = 1;

const FAMILY_INET: u8 = 2;
const FAMILY_INET6: u8 = 10;

const RTMGRP_IPV4_IFADDR: u32 = 0x10;
const RTMGRP_IPV6_IFADDR: u32 = 0x100;

const RECEIVE_BUFFER_LEN: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceEvent
{
    pub index: u32,
    pub address: IpAddr
}

fn align(len: usize) -> usize
{
    (len + 3) & !3
}

fn ne_u16(buffer: &[u8], offset: usize) -> Option<u16>
{
    let bytes = buffer.get(offset..offset + 2)?;
    Some(u16::from_ne_bytes([bytes[0], bytes[1]]))
}

fn ne_u32(buffer: &[u8], offset: usize) -> Option<u32>
{
    let bytes = buffer.get(offset..offset + 4)?;
    Some(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

// Walks a batch of rtnetlink messages and returns one event per IFA_ADDRESS
// attribute of every RTM_NEWADDR message. Malformed lengths end the walk.
pub fn parse_messages(buffer: &[u8]) -> Vec<InterfaceEvent>
{
    let mut events = Vec::new();
    let mut offset = 0;

    while buffer.len().saturating_sub(offset) >= NLMSG_HDRLEN
    {
        let (len, kind) = match (ne_u32(buffer, offset), ne_u16(buffer, offset + 4))
        {
            (Some(len), Some(kind)) => (len as usize, kind),
            _ => break
        };

        if len < NLMSG_HDRLEN || len > buffer.len() - offset
        {
            debug!("Truncated netlink message ({} bytes at offset {})", len, offset);
            break;
        }

        if kind == NLMSG_DONE
        {
            break;
        }

        if kind == RTM_NEWADDR
        {
            parse_new_address(&buffer[offset + NLMSG_HDRLEN..offset + len], &mut events);
        }

        offset += align(len);
    }

    events
}

fn parse_new_address(payload: &[u8], events: &mut Vec<InterfaceEvent>)
{
    if payload.len() < IFADDRMSG_LEN
    {
        return;
    }

    let family = payload[0];
    let index = match ne_u32(payload, 4)
    {
        Some(index) => index,
        None => return
    };

    let mut offset = IFADDRMSG_LEN;
    while payload.len().saturating_sub(offset) >= RTA_HDRLEN
    {
        let (rta_len, rta_type) = match (ne_u16(payload, offset), ne_u16(payload, offset + 2))
        {
            (Some(len), Some(kind)) => (len as usize, kind),
            _ => return
        };

        if rta_len < RTA_HDRLEN || rta_len > payload.len() - offset
        {
            return;
        }

        if rta_type == IFA_ADDRESS
        {
            let data = &payload[offset + RTA_HDRLEN..offset + rta_len];
            let address = match (family, data.len())
            {
                (FAMILY_INET, 4) => Some(IpAddr::V4(Ipv4Addr::new(data[0], data[1], data[2], data[3]))),
                (FAMILY_INET6, 16) =>
                {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(data);
                    Some(IpAddr::V6(Ipv6Addr::from(octets)))
                },
                _ => None
            };

            if let Some(address) = address
            {
                events.push(InterfaceEvent { index, address });
            }
        }

        offset += align(rta_len);
    }
}

// Subscription to the kernel's IPv4/IPv6 address change notifications.
pub struct NetlinkMonitor
{
    socket: Socket
}

impl NetlinkMonitor
{
    pub fn new() -> Result<NetlinkMonitor, MdnsdError>
    {
        let socket = Socket::new(Domain::from(libc::AF_NETLINK), Type::RAW, Some(Protocol::from(libc::NETLINK_ROUTE)))?;
        socket.set_nonblocking(true)?;

        bind(socket.as_raw_fd(), &NetlinkAddr::new(0, RTMGRP_IPV4_IFADDR | RTMGRP_IPV6_IFADDR))?;

        Ok(NetlinkMonitor
        {
            socket
        })
    }

    // Reads every pending notification. An ENOBUFS error means the kernel
    // dropped notifications and the caller has to enumerate again.
    pub fn drain(&self) -> Result<Vec<InterfaceEvent>, MdnsdError>
    {
        let mut buffer = [0u8; RECEIVE_BUFFER_LEN];
        let mut events = Vec::new();

        loop
        {
            match recv(self.socket.as_raw_fd(), &mut buffer, MsgFlags::MSG_DONTWAIT)
            {
                Ok(0) => break,
                Ok(len) =>
                {
                    trace!("Received {} bytes of netlink data", len);
                    events.extend(parse_messages(&buffer[..len]));
                },
                Err(Errno::EAGAIN) => break,
                Err(Errno::EINTR) => continue,
                Err(err) => return Err(err.into())
            }
        }

        Ok(events)
    }
}

impl AsRawFd for NetlinkMonitor
{
    fn as_raw_fd(&self) -> RawFd
    {
        self.socket.as_raw_fd()
    }
}
