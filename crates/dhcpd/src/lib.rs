pub mod config;
pub mod dhcp;
pub mod error;
pub mod lease;

pub use config::Config;
pub use dhcp::DhcpServer;
pub use error::{Error, Result};
pub use lease::{Allocation, Binding, BindingStatus, LeaseState};
