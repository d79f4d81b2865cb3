use std::io;
use std::net::SocketAddr;
use std::thread;
use std::time::{ Duration, Instant };
use log::{ debug, error, trace, warn };
use socket2::Socket;

use crate::debug::Hex;
use crate::dns::{ DnsHeader, FLAGS_QR_RESPONSE, FLAGS_RCODE_MASK, HEADER_LEN, RCODE_NAME_ERROR, TYPE_A, TYPE_AAAA };
use crate::mdnsd_error::MdnsdError;
use crate::socket::{ self, MAX_DATAGRAM_LEN };

#[derive(Debug, PartialEq, Eq)]
pub enum GatewayAction
{
    Relay,
    Reject(Vec<u8>)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome
{
    Relayed(usize),
    TimedOut
}

// One action per datagram: relay it whole when any question can be answered
// by an address record, otherwise echo it back as a name error.
pub fn plan(question_types: &[u16], ipv4_only: bool, datagram: &[u8]) -> GatewayAction
{
    let resolvable = question_types.iter().any(|qtype| match *qtype
    {
        TYPE_A => true,
        TYPE_AAAA => !ipv4_only,
        _ => false
    });

    if resolvable
    {
        GatewayAction::Relay
    }
    else
    {
        GatewayAction::Reject(negative_reply(datagram))
    }
}

pub fn negative_reply(datagram: &[u8]) -> Vec<u8>
{
    let mut reply = datagram.to_vec();

    if reply.len() >= HEADER_LEN
    {
        let flags = u16::from_be_bytes([reply[2], reply[3]]);
        let flags = ((flags | FLAGS_QR_RESPONSE) & !FLAGS_RCODE_MASK) | RCODE_NAME_ERROR;
        reply[2..4].copy_from_slice(&flags.to_be_bytes());
    }

    reply
}

// Sends the query unmodified to `target` and hands the first response that
// shows up before the deadline back to `requester` through `reply`.
pub fn relay(query: &[u8], requester: SocketAddr, reply: &Socket, target: SocketAddr, timeout: Duration) -> Result<RelayOutcome, MdnsdError>
{
    let relay_socket = socket::create_relay_socket()?;
    let deadline = Instant::now() + timeout;

    relay_socket.send_to(query, target)?;

    let mut buffer = vec![0u8; MAX_DATAGRAM_LEN];
    loop
    {
        let now = Instant::now();
        if now >= deadline
        {
            return Ok(RelayOutcome::TimedOut);
        }

        relay_socket.set_read_timeout(Some(deadline - now))?;

        let (len, from) = match relay_socket.recv_from(&mut buffer)
        {
            Ok(received) => received,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::TimedOut => return Ok(RelayOutcome::TimedOut),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into())
        };

        match DnsHeader::from(&buffer[..len])
        {
            Ok(header) if header.is_response() =>
            {
                trace!("Relaying {} bytes from {} to {}\n{}", len, from, requester, Hex::new(&buffer[..len]));
                socket::send_to(reply, &buffer[..len], &requester)?;
                return Ok(RelayOutcome::Relayed(len));
            },
            _ => debug!("Relay ignoring {} bytes from {}", len, from)
        }
    }
}

pub struct RelayPool
{
    workers: Vec<thread::JoinHandle<Result<RelayOutcome, MdnsdError>>>,
    limit: usize,
    timeout: Duration,
    target: SocketAddr
}

impl RelayPool
{
    pub fn new(limit: usize, timeout: Duration, target: SocketAddr) -> RelayPool
    {
        RelayPool
        {
            workers: Vec::new(),
            limit,
            timeout,
            target
        }
    }

    pub fn outstanding(&self) -> usize
    {
        self.workers.len()
    }

    // Starts a relay worker owning a copy of the query and `reply`, a cloned
    // handle of the resolver socket.
    pub fn spawn(&mut self, query: &[u8], requester: SocketAddr, reply: Socket) -> Result<(), MdnsdError>
    {
        self.reap();

        if self.workers.len() >= self.limit
        {
            return Err(MdnsdError::RelayLimit);
        }

        let query = query.to_vec();
        let target = self.target;
        let timeout = self.timeout;

        let handle = thread::Builder::new()
            .name(String::from("mdnsd-relay"))
            .spawn(move || relay(&query, requester, &reply, target, timeout))?;

        self.workers.push(handle);

        Ok(())
    }

    // Joins every worker that already finished; never blocks on a running one.
    pub fn reap(&mut self) -> usize
    {
        let mut reaped = 0;
        let mut index = 0;

        while index < self.workers.len()
        {
            if !self.workers[index].is_finished()
            {
                index += 1;
                continue;
            }

            match self.workers.swap_remove(index).join()
            {
                Ok(Ok(RelayOutcome::Relayed(len))) => debug!("Relay worker passed on a {} byte reply", len),
                Ok(Ok(RelayOutcome::TimedOut)) => debug!("Relay worker timed out"),
                Ok(Err(err)) => warn!("Relay worker failed: {}", err),
                Err(_) => error!("Relay worker panicked")
            }

            reaped += 1;
        }

        reaped
    }
}
