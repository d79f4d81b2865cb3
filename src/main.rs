use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::process;
use clap::Parser;
use log::error;

use libmdnsd::{ Config, Daemon };

#[derive(Parser, Debug)]
#[command(name = "mdnsd")]
#[command(version)]
#[command(about = "Answers mDNS queries for this host's name under .local")]
struct Args
{
    /// Only use IPv4
    #[arg(short = '4', long)]
    ipv4_only: bool,

    /// Bridge unicast resolver queries for .local names onto mDNS
    #[arg(short = 'r', long)]
    resolver: bool,

    /// Host name to answer for instead of the host name file
    #[arg(short = 'n', long, value_name = "NAME")]
    hostname: Option<String>,

    #[arg(long, value_name = "PATH", default_value = "/etc/hostname")]
    hostname_file: PathBuf,

    /// Address of the resolver gateway socket
    #[arg(long, value_name = "ADDR", default_value = "127.0.0.67:53")]
    resolver_addr: SocketAddrV4,

    /// Also join on interfaces that only have unique local (fd00::/8) IPv6 addresses
    #[arg(long)]
    unique_local: bool,

    /// Upper bound on relays waiting for an answer at the same time
    #[arg(long, value_name = "N", default_value_t = 32)]
    max_relays: usize,

    /// Interface enumeration attempts before giving up
    #[arg(long, value_name = "N", default_value_t = 10)]
    enumeration_attempts: usize
}

fn main()
{
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = Config::new()
        .with_ipv4_only(args.ipv4_only)
        .with_gateway(args.resolver)
        .with_hostname_file(args.hostname_file)
        .with_resolver_addr(args.resolver_addr)
        .with_unique_local(args.unique_local)
        .with_max_relays(args.max_relays)
        .with_enumeration_attempts(args.enumeration_attempts);

    if let Some(ref hostname) = args.hostname
    {
        config = config.with_hostname(hostname);
    }

    let result = Daemon::new(config).and_then(|mut daemon| daemon.run());

    if let Err(err) = result
    {
        error!("{}", err);
        process::exit(err.exit_code());
    }
}
