use std::{ error::Error, fmt::Display, io };

#[derive(Debug)]
pub enum MdnsdError
{
    HeaderToShort,
    NotQuery,
    OutOfBounds,
    LabelInvalid,
    NameToLong,
    UdpSocketError(io::Error),
    SystemError(nix::Error),
    MdnsBindError(io::Error),
    ResolverBindError(io::Error),
    InterfaceEnumeration,
    HostnameError(io::Error),
    InvalidHostname,
    PollError(nix::Error),
    SocketFault(&'static str),
    RelayLimit,
    Timeout
}

impl MdnsdError
{
    // Process exit status for errors that end the daemon.
    pub fn exit_code(&self) -> i32
    {
        match self
        {
            MdnsdError::MdnsBindError(_) => -1,
            MdnsdError::ResolverBindError(_) => -2,
            MdnsdError::InterfaceEnumeration => -9,
            MdnsdError::PollError(_) => -10,
            MdnsdError::SocketFault(_) => -14,
            _ => -1
        }
    }
}

impl Error for MdnsdError
{
}

impl Display for MdnsdError
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        match self
        {
            MdnsdError::HeaderToShort =>
            {
                write!(f, "mDNS error: header to short")
            },
            MdnsdError::NotQuery =>
            {
                write!(f, "mDNS error: datagram is a response, not a query")
            },
            MdnsdError::OutOfBounds =>
            {
                write!(f, "mDNS error: read past end of datagram")
            },
            MdnsdError::LabelInvalid =>
            {
                write!(f, "mDNS error: label invalid")
            },
            MdnsdError::NameToLong =>
            {
                write!(f, "mDNS error: name to long")
            },
            MdnsdError::UdpSocketError(err) =>
            {
                write!(f, "mDNS error: UDP socket error: {}", err)
            },
            MdnsdError::SystemError(err) =>
            {
                write!(f, "mDNS error: system call failed: {}", err)
            },
            MdnsdError::MdnsBindError(err) =>
            {
                write!(f, "mDNS error: could not bind mDNS port: {}", err)
            },
            MdnsdError::ResolverBindError(err) =>
            {
                write!(f, "mDNS error: could not bind resolver socket: {}", err)
            },
            MdnsdError::InterfaceEnumeration =>
            {
                write!(f, "mDNS error: could not enumerate network interfaces")
            },
            MdnsdError::HostnameError(err) =>
            {
                write!(f, "mDNS error: could not read host name: {}", err)
            },
            MdnsdError::InvalidHostname =>
            {
                write!(f, "mDNS error: host name is empty")
            },
            MdnsdError::PollError(err) =>
            {
                write!(f, "mDNS error: poll failed: {}", err)
            },
            MdnsdError::SocketFault(socket) =>
            {
                write!(f, "mDNS error: {} socket experienced fault", socket)
            },
            MdnsdError::RelayLimit =>
            {
                write!(f, "mDNS error: too many outstanding relays")
            },
            MdnsdError::Timeout =>
            {
                write!(f, "mDNS error: timeout")
            }
        }
    }
}

impl From<io::Error> for MdnsdError
{
    fn from(err: io::Error) -> Self
    {
        match err.kind()
        {
            io::ErrorKind::TimedOut => MdnsdError::Timeout,
            io::ErrorKind::WouldBlock => MdnsdError::Timeout,
            _ => MdnsdError::UdpSocketError(err)
        }
    }
}

impl From<nix::Error> for MdnsdError
{
    fn from(err: nix::Error) -> Self
    {
        MdnsdError::SystemError(err)
    }
}
