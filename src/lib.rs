pub mod config;
pub mod dns;
pub mod error;
pub mod handler;
pub mod record;
pub mod resolver;
pub mod server;
pub mod store;
pub mod upstream;

pub use dns::DNSPacket;
pub use resolver::{Answer, Resolver};
