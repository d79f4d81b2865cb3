use std::net::{ Ipv4Addr, SocketAddr, SocketAddrV4 };
use std::path::PathBuf;
use std::time::Duration;

use crate::socket::MULTICAST_IPV4_SOCKET;

pub(crate) const DEFAULT_HOSTNAME_FILE: &str = "/etc/hostname";
pub(crate) const DEFAULT_RESOLVER_ADDR: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 67), 53);
pub(crate) const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(3);
pub(crate) const DEFAULT_MAX_RELAYS: usize = 32;
pub(crate) const DEFAULT_ENUMERATION_ATTEMPTS: usize = 10;

/// Settings of one daemon instance.
///
/// ```rust
/// use libmdnsd::Config;
///
/// let config = Config::default()
///     .with_ipv4_only(true)
///     .with_gateway(true)
///     .with_hostname("printer");
/// ```
#[derive(Debug, Clone)]
pub struct Config
{
    /// Only IPv4: no IPv6 socket, no AAAA answers, no ff02::fb joins.
    pub ipv4_only: bool,
    /// Run the unicast resolver gateway on `resolver_addr`.
    pub gateway: bool,
    /// Fixed host name. Disables reading and watching `hostname_file`.
    pub hostname: Option<String>,
    pub hostname_file: PathBuf,
    pub resolver_addr: SocketAddrV4,
    /// Treat fd00::/8 as local when deciding on IPv6 joins.
    pub unique_local: bool,
    pub relay_timeout: Duration,
    pub relay_target: SocketAddr,
    pub max_relays: usize,
    pub enumeration_attempts: usize
}

impl Default for Config
{
    fn default() -> Self
    {
        Config
        {
            ipv4_only: false,
            gateway: false,
            hostname: None,
            hostname_file: PathBuf::from(DEFAULT_HOSTNAME_FILE),
            resolver_addr: DEFAULT_RESOLVER_ADDR,
            unique_local: false,
            relay_timeout: DEFAULT_RELAY_TIMEOUT,
            relay_target: *MULTICAST_IPV4_SOCKET,
            max_relays: DEFAULT_MAX_RELAYS,
            enumeration_attempts: DEFAULT_ENUMERATION_ATTEMPTS
        }
    }
}

impl Config
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn with_ipv4_only(mut self, ipv4_only: bool) -> Self
    {
        self.ipv4_only = ipv4_only;
        self
    }

    pub fn with_gateway(mut self, gateway: bool) -> Self
    {
        self.gateway = gateway;
        self
    }

    pub fn with_hostname(mut self, hostname: &str) -> Self
    {
        self.hostname = Some(String::from(hostname));
        self
    }

    pub fn with_hostname_file(mut self, path: PathBuf) -> Self
    {
        self.hostname_file = path;
        self
    }

    pub fn with_resolver_addr(mut self, addr: SocketAddrV4) -> Self
    {
        self.resolver_addr = addr;
        self
    }

    pub fn with_unique_local(mut self, unique_local: bool) -> Self
    {
        self.unique_local = unique_local;
        self
    }

    pub fn with_relay_timeout(mut self, timeout: Duration) -> Self
    {
        self.relay_timeout = timeout;
        self
    }

    pub fn with_relay_target(mut self, target: SocketAddr) -> Self
    {
        self.relay_target = target;
        self
    }

    // Zero would reject every relay, so it is raised to one.
    pub fn with_max_relays(mut self, max_relays: usize) -> Self
    {
        self.max_relays = max_relays.max(1);
        self
    }

    pub fn with_enumeration_attempts(mut self, attempts: usize) -> Self
    {
        self.enumeration_attempts = attempts.max(1);
        self
    }
}
