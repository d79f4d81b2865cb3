use std::collections::{ HashMap, HashSet };
use std::io;
use std::net::{ IpAddr, Ipv4Addr, Ipv6Addr };
use std::thread;
use std::time::Duration;
use log::{ debug, info, warn };
use socket2::Socket;

use crate::mdnsd_error::MdnsdError;
use crate::netlink::InterfaceEvent;
use crate::socket::{ MULTICAST_ADDR_IPV4, MULTICAST_ADDR_IPV6 };

pub const ENUMERATION_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family
{
    V4,
    V6
}

// Result of offering an address to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership
{
    Accepted,
    NotLocal,
    AlreadyMember
}

pub trait MulticastJoin
{
    fn join_v4(&self, interface: &Ipv4Addr) -> io::Result<()>;
    fn join_v6(&self, index: u32) -> io::Result<()>;
}

impl MulticastJoin for Socket
{
    fn join_v4(&self, interface: &Ipv4Addr) -> io::Result<()>
    {
        self.join_multicast_v4(&MULTICAST_ADDR_IPV4, interface)
    }

    fn join_v6(&self, index: u32) -> io::Result<()>
    {
        self.join_multicast_v6(&MULTICAST_ADDR_IPV6, index)
    }
}

// Where enumeration gets the (interface index, address) pairs from.
pub trait InterfaceSource
{
    fn addresses(&self) -> Vec<(u32, IpAddr)>;
}

pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces
{
    fn addresses(&self) -> Vec<(u32, IpAddr)>
    {
        let mut addresses = Vec::new();

        for interface in default_net::get_interfaces()
        {
            addresses.extend(interface.ipv4.iter().map(|net| (interface.index, IpAddr::V4(net.addr))));
            addresses.extend(interface.ipv6.iter().map(|net| (interface.index, IpAddr::V6(net.addr))));
        }

        addresses
    }
}

pub fn is_local_v4(addr: &Ipv4Addr) -> bool
{
    let check = u32::from(*addr);

    check & 0xff000000 == 0x7f000000 ||     // 127.0.0.0/8
    check & 0xff000000 == 0x0a000000 ||     // 10.0.0.0/8
    check & 0xfff00000 == 0xac100000 ||     // 172.16.0.0/12
    check & 0xffff0000 == 0xc0a80000 ||     // 192.168.0.0/16
    check & 0xffff0000 == 0xa9fe0000        // 169.254.0.0/16
}

pub fn is_local_v6(addr: &Ipv6Addr, unique_local: bool) -> bool
{
    let first = addr.segments()[0];

    first & 0xffc0 == 0xfe80 ||                     // link-local
    first & 0xffc0 == 0xfec0 ||                     // site-local
    (unique_local && first & 0xff00 == 0xfd00)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressEntry
{
    pub address: IpAddr,
    pub local: bool
}

#[derive(Debug, Default, Clone)]
pub struct InterfaceRecord
{
    pub addresses: Vec<AddressEntry>
}

impl InterfaceRecord
{
    pub fn local_v6(&self) -> Option<Ipv6Addr>
    {
        self.addresses.iter().find_map(|entry| match entry.address
        {
            IpAddr::V6(v6) if entry.local => Some(v6),
            _ => None
        })
    }
}

pub struct MembershipTracker
{
    interfaces: HashMap<u32, InterfaceRecord>,
    members: HashSet<(u32, Family)>,
    ipv4_only: bool,
    unique_local: bool
}

impl MembershipTracker
{
    pub fn new(ipv4_only: bool, unique_local: bool) -> MembershipTracker
    {
        MembershipTracker
        {
            interfaces: HashMap::new(),
            members: HashSet::new(),
            ipv4_only,
            unique_local
        }
    }

    pub fn is_member(&self, index: u32, family: Family) -> bool
    {
        self.members.contains(&(index, family))
    }

    pub fn record(&self, index: u32) -> Option<&InterfaceRecord>
    {
        self.interfaces.get(&index)
    }

    pub fn local_v6(&self, index: u32) -> Option<Ipv6Addr>
    {
        self.record(index).and_then(|record| record.local_v6())
    }

    fn is_local(&self, address: &IpAddr) -> bool
    {
        match address
        {
            IpAddr::V4(v4) => is_local_v4(v4),
            IpAddr::V6(v6) => !self.ipv4_only && is_local_v6(v6, self.unique_local)
        }
    }

    fn remember(&mut self, index: u32, address: IpAddr, local: bool)
    {
        let record = self.interfaces.entry(index).or_default();
        if !record.addresses.iter().any(|entry| entry.address == address)
        {
            record.addresses.push(AddressEntry { address, local });
        }
    }

    // Records the address and joins the mDNS group for its (interface, family)
    // pair the first time a local address shows up there. A failed join is not
    // retried.
    pub fn observe<J: MulticastJoin + ?Sized>(&mut self, index: u32, address: IpAddr, joiner: &J) -> Membership
    {
        let local = self.is_local(&address);
        self.remember(index, address, local);

        if !local
        {
            debug!("Ignoring non-local address {} on interface {}", address, index);
            return Membership::NotLocal;
        }

        let family = match address
        {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6
        };

        if self.is_member(index, family)
        {
            return Membership::AlreadyMember;
        }

        self.members.insert((index, family));

        let result = match address
        {
            IpAddr::V4(ref v4) => joiner.join_v4(v4),
            IpAddr::V6(_) => joiner.join_v6(index)
        };

        match result
        {
            Ok(()) => info!("Multicast adding address: {} (interface {})", address, index),
            Err(err) => warn!("Could not join membership to {} on interface {}: {}", address, index, err)
        }

        Membership::Accepted
    }

    pub fn apply<J: MulticastJoin + ?Sized>(&mut self, event: &InterfaceEvent, joiner: &J) -> Membership
    {
        self.observe(event.index, event.address, joiner)
    }

    pub fn enumerate<S, J>(&mut self, source: &S, joiner: &J) -> Result<usize, MdnsdError>
    where
        S: InterfaceSource + ?Sized,
        J: MulticastJoin + ?Sized,
    {
        let addresses = source.addresses();
        if addresses.is_empty()
        {
            return Err(MdnsdError::InterfaceEnumeration);
        }

        let mut accepted = 0;
        for (index, address) in addresses
        {
            if self.observe(index, address, joiner) == Membership::Accepted
            {
                accepted += 1;
            }
        }

        Ok(accepted)
    }

    // Blocking retry, used at start-up before anything is being answered.
    pub fn enumerate_with_retry<S, J>(&mut self, source: &S, attempts: usize, delay: Duration, joiner: &J) -> Result<usize, MdnsdError>
    where
        S: InterfaceSource + ?Sized,
        J: MulticastJoin + ?Sized,
    {
        let mut failures = 0;

        loop
        {
            match self.enumerate(source, joiner)
            {
                Ok(accepted) => return Ok(accepted),
                Err(err) =>
                {
                    failures += 1;
                    warn!("Could not query devices (attempt {} of {}): {}", failures, attempts, err);

                    if failures >= attempts
                    {
                        return Err(MdnsdError::InterfaceEnumeration);
                    }

                    thread::sleep(delay);
                }
            }
        }
    }
}
