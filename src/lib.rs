#[macro_use]
extern crate lazy_static;

mod debug;
mod mdnsd_error;
pub mod config;
pub mod dispatcher;
pub mod dns;
pub mod gateway;
pub mod hostname;
pub mod interfaces;
pub mod netlink;
pub mod responder;
pub mod socket;

pub use config::Config;
pub use dispatcher::Daemon;
pub use mdnsd_error::MdnsdError;
pub use responder::HostIdentity;
