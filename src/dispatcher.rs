use std::os::fd::AsRawFd;
use std::time::Instant;
use log::{ debug, error, info, trace, warn };
use nix::errno::Errno;
use nix::poll::{ poll, PollFd, PollFlags };
use socket2::Socket;

use crate::config::Config;
use crate::debug::Hex;
use crate::gateway::{ self, GatewayAction, RelayPool };
use crate::hostname::{ self, HostnameWatcher };
use crate::interfaces::{ InterfaceSource, MembershipTracker, SystemInterfaces, ENUMERATION_RETRY_DELAY };
use crate::mdnsd_error::MdnsdError;
use crate::netlink::NetlinkMonitor;
use crate::responder::{ HostIdentity, Responder };
use crate::socket::{ self, Datagram, PacketInfo, MAX_DATAGRAM_LEN };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin
{
    Multicast,
    Resolver
}

// An IPv6 query sent to ff02::fb carries the group as its destination; answer
// with the arrival interface's own local address instead.
pub fn resolve_destination(info: &PacketInfo, tracker: &MembershipTracker) -> PacketInfo
{
    match info.local_v6
    {
        Some(addr) if addr.is_multicast() => PacketInfo
        {
            local_v6: tracker.local_v6(info.index),
            ..*info
        },
        _ => *info
    }
}

// Full enumeration still owed after a netlink overflow. Attempts are spread
// over loop iterations so answering goes on in between.
#[derive(Debug, Clone, Copy)]
struct PendingRefresh
{
    failures: usize,
    due: Instant
}

// Milliseconds until `due`, rounded up, for the poll timeout.
fn millis_until(due: Instant) -> i32
{
    let remaining = due.saturating_duration_since(Instant::now());
    ((remaining.as_micros() + 999) / 1000).min(i32::MAX as u128) as i32
}

fn is_fault(events: PollFlags) -> bool
{
    events.intersects(PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL)
}

pub struct Daemon
{
    config: Config,
    responder: Responder,
    identity: HostIdentity,
    tracker: MembershipTracker,
    mdns_socket: Socket,
    resolver_socket: Option<Socket>,
    netlink: Option<NetlinkMonitor>,
    hostname_watcher: Option<HostnameWatcher>,
    interfaces: Box<dyn InterfaceSource>,
    refresh: Option<PendingRefresh>,
    relays: RelayPool,
    buffer: Vec<u8>
}

impl Daemon
{
    pub fn new(config: Config) -> Result<Daemon, MdnsdError>
    {
        let (identity, hostname_watcher) = match config.hostname
        {
            Some(ref name) =>
            {
                let identity = HostIdentity::new(name);
                if identity.is_empty()
                {
                    return Err(MdnsdError::InvalidHostname);
                }

                (identity, None)
            },
            None =>
            {
                let identity = hostname::initial_identity(&config.hostname_file)?;
                let watcher = match HostnameWatcher::new(&config.hostname_file)
                {
                    Ok(watcher) => Some(watcher),
                    Err(err) =>
                    {
                        warn!("Not watching {}: {}", config.hostname_file.display(), err);
                        None
                    }
                };

                (identity, watcher)
            }
        };

        let mdns_socket = socket::bind_mdns(config.ipv4_only)?;
        let resolver_socket = match config.gateway
        {
            true => Some(socket::bind_resolver(config.resolver_addr)?),
            false => None
        };

        // Subscribe before enumerating so no address added in between is missed.
        let netlink = match NetlinkMonitor::new()
        {
            Ok(netlink) => Some(netlink),
            Err(err) =>
            {
                warn!("No interface change notifications: {}", err);
                None
            }
        };

        let mut daemon = Daemon::with_sockets(config, identity, mdns_socket, resolver_socket);
        daemon.netlink = netlink;
        daemon.hostname_watcher = hostname_watcher;

        let joined = daemon.tracker.enumerate_with_retry(daemon.interfaces.as_ref(), daemon.config.enumeration_attempts, ENUMERATION_RETRY_DELAY, &daemon.mdns_socket)?;

        info!("Responding to {}.local ({} multicast memberships{}{})",
            daemon.identity.as_str(),
            joined,
            if daemon.config.ipv4_only { ", IPv4 only" } else { "" },
            if daemon.resolver_socket.is_some() { ", resolver gateway on" } else { "" });

        Ok(daemon)
    }

    fn with_sockets(config: Config, identity: HostIdentity, mdns_socket: Socket, resolver_socket: Option<Socket>) -> Daemon
    {
        Daemon
        {
            responder: Responder::new(config.ipv4_only),
            tracker: MembershipTracker::new(config.ipv4_only, config.unique_local),
            relays: RelayPool::new(config.max_relays, config.relay_timeout, config.relay_target),
            identity,
            mdns_socket,
            resolver_socket,
            netlink: None,
            hostname_watcher: None,
            interfaces: Box::new(SystemInterfaces),
            refresh: None,
            buffer: vec![0u8; MAX_DATAGRAM_LEN],
            config
        }
    }

    pub fn identity(&self) -> &HostIdentity
    {
        &self.identity
    }

    // Only returns on a fatal error.
    pub fn run(&mut self) -> Result<(), MdnsdError>
    {
        loop
        {
            self.poll_once(-1)?;
        }
    }

    pub fn poll_once(&mut self, timeout: i32) -> Result<(), MdnsdError>
    {
        let mut fds = vec![PollFd::new(self.mdns_socket.as_raw_fd(), PollFlags::POLLIN)];

        let resolver_slot = self.resolver_socket.as_ref().map(|resolver|
        {
            fds.push(PollFd::new(resolver.as_raw_fd(), PollFlags::POLLIN));
            fds.len() - 1
        });

        let netlink_slot = self.netlink.as_ref().map(|netlink|
        {
            fds.push(PollFd::new(netlink.as_raw_fd(), PollFlags::POLLIN));
            fds.len() - 1
        });

        let hostname_slot = self.hostname_watcher.as_ref().map(|watcher|
        {
            fds.push(PollFd::new(watcher.as_raw_fd(), PollFlags::POLLIN));
            fds.len() - 1
        });

        let timeout = match self.refresh
        {
            Some(pending) if timeout < 0 => millis_until(pending.due),
            Some(pending) => timeout.min(millis_until(pending.due)),
            None => timeout
        };

        match poll(&mut fds, timeout)
        {
            Ok(_) => (),
            Err(Errno::EINTR) => return Ok(()),
            Err(err) => return Err(MdnsdError::PollError(err))
        }

        let events: Vec<PollFlags> = fds.iter().map(|fd| fd.revents().unwrap_or(PollFlags::empty())).collect();

        if is_fault(events[0])
        {
            error!("mDNS socket experienced fault");
            return Err(MdnsdError::SocketFault("mDNS"));
        }

        if let Some(slot) = resolver_slot
        {
            if is_fault(events[slot])
            {
                error!("Resolver socket experienced fault");
                return Err(MdnsdError::SocketFault("resolver"));
            }
        }

        if events[0].contains(PollFlags::POLLIN)
        {
            self.drain(Origin::Multicast);
        }

        if let Some(slot) = resolver_slot
        {
            if events[slot].contains(PollFlags::POLLIN)
            {
                self.drain(Origin::Resolver);
            }
        }

        // A netlink overflow shows up as POLLERR, the read reports ENOBUFS.
        if let Some(slot) = netlink_slot
        {
            if !events[slot].is_empty()
            {
                self.handle_interface_events()?;
            }
        }

        if let Some(slot) = hostname_slot
        {
            if !events[slot].is_empty()
            {
                self.reload_identity();
            }
        }

        self.refresh_interfaces()?;

        if self.resolver_socket.is_some()
        {
            self.relays.reap();
        }

        Ok(())
    }

    fn drain(&mut self, origin: Origin)
    {
        loop
        {
            let listener = match origin
            {
                Origin::Multicast => &self.mdns_socket,
                Origin::Resolver => match self.resolver_socket
                {
                    Some(ref resolver) => resolver,
                    None => return
                }
            };

            match socket::receive(listener, &mut self.buffer)
            {
                Ok(Some(datagram)) => self.handle_datagram(datagram, origin),
                Ok(None) => return,
                Err(err) =>
                {
                    warn!("Receive failed on {:?} socket: {}", origin, err);
                    return;
                }
            }
        }
    }

    fn handle_datagram(&mut self, datagram: Datagram, origin: Origin)
    {
        let packet = &self.buffer[..datagram.len];
        trace!("Received {} bytes from {} on interface {}\n{}", datagram.len, datagram.source, datagram.info.index, Hex::new(packet));

        let info = resolve_destination(&datagram.info, &self.tracker);
        let response = match self.responder.respond(&self.identity, packet, &info)
        {
            Ok(response) => response,
            Err(MdnsdError::NotQuery) => return,
            Err(err) =>
            {
                debug!("Dropping datagram from {}: {}", datagram.source, err);
                return;
            }
        };

        let reply_socket = match origin
        {
            Origin::Multicast => &self.mdns_socket,
            Origin::Resolver => match self.resolver_socket
            {
                Some(ref resolver) => resolver,
                None => return
            }
        };

        for answer in &response.answers
        {
            if let Err(err) = socket::send_to(reply_socket, answer, &datagram.source)
            {
                error!("Could not send answer to {}: {}", datagram.source, err);
            }

            if origin == Origin::Resolver
            {
                if let Err(err) = socket::announce(answer)
                {
                    error!("Could not announce answer: {}", err);
                }
            }
        }

        if origin != Origin::Resolver || !response.is_empty()
        {
            return;
        }

        match gateway::plan(&response.question_types, self.config.ipv4_only, packet)
        {
            GatewayAction::Relay =>
            {
                let reply = match reply_socket.try_clone()
                {
                    Ok(reply) => reply,
                    Err(err) =>
                    {
                        error!("Could not clone resolver socket: {}", err);
                        return;
                    }
                };

                match self.relays.spawn(packet, datagram.source, reply)
                {
                    Ok(()) => debug!("Relaying query from {} ({} outstanding)", datagram.source, self.relays.outstanding()),
                    Err(err) => warn!("Dropping query from {}: {}", datagram.source, err)
                }
            },
            GatewayAction::Reject(reply) =>
            {
                debug!("Rejecting query from {}", datagram.source);
                if let Err(err) = socket::send_to(reply_socket, &reply, &datagram.source)
                {
                    error!("Could not send rejection to {}: {}", datagram.source, err);
                }
            }
        }
    }

    fn handle_interface_events(&mut self) -> Result<(), MdnsdError>
    {
        let netlink = match self.netlink
        {
            Some(ref netlink) => netlink,
            None => return Ok(())
        };

        match netlink.drain()
        {
            Ok(events) =>
            {
                for event in events
                {
                    self.tracker.apply(&event, &self.mdns_socket);
                }
            },
            Err(MdnsdError::SystemError(Errno::ENOBUFS)) =>
            {
                warn!("Interface notifications overflowed, enumerating again");
                self.schedule_refresh();
            },
            Err(err) => warn!("Could not read interface notifications: {}", err)
        }

        Ok(())
    }

    fn schedule_refresh(&mut self)
    {
        if self.refresh.is_none()
        {
            self.refresh = Some(PendingRefresh { failures: 0, due: Instant::now() });
        }
    }

    // One enumeration attempt when one is due. Running out of attempts is fatal.
    fn refresh_interfaces(&mut self) -> Result<(), MdnsdError>
    {
        let pending = match self.refresh
        {
            Some(pending) => pending,
            None => return Ok(())
        };

        if Instant::now() < pending.due
        {
            return Ok(());
        }

        match self.tracker.enumerate(self.interfaces.as_ref(), &self.mdns_socket)
        {
            Ok(accepted) =>
            {
                info!("Interfaces enumerated again ({} new multicast memberships)", accepted);
                self.refresh = None;
            },
            Err(err) =>
            {
                let failures = pending.failures + 1;
                warn!("Could not query devices (attempt {} of {}): {}", failures, self.config.enumeration_attempts, err);

                if failures >= self.config.enumeration_attempts
                {
                    return Err(MdnsdError::InterfaceEnumeration);
                }

                self.refresh = Some(PendingRefresh { failures, due: Instant::now() + ENUMERATION_RETRY_DELAY });
            }
        }

        Ok(())
    }

    fn reload_identity(&mut self)
    {
        let watcher = match self.hostname_watcher
        {
            Some(ref watcher) => watcher,
            None => return
        };

        match watcher.drain()
        {
            Ok(true) => (),
            Ok(false) => return,
            Err(err) =>
            {
                warn!("Could not read host name notifications: {}", err);
                return;
            }
        }

        match watcher.reload()
        {
            Ok(identity) =>
            {
                if identity != self.identity
                {
                    info!("Host name changed from {} to {}", self.identity.as_str(), identity.as_str());
                    self.identity = identity;
                }
            },
            Err(err) => warn!("Could not reload host name from {}: {}", watcher.path().display(), err)
        }
    }
}
