//! DHCP message handling: dispatch, per type handlers, reply encoding and
//! the UDP transport.

pub mod dispatcher;
pub mod handler;
pub mod reply;
pub mod server;

#[cfg(test)]
pub mod test_helpers;

pub use dispatcher::{dispatch, process, reply_destination, Outgoing};
pub use reply::Reply;
pub use server::DhcpServer;
