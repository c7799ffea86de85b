pub mod client;
pub mod connection;

pub use client::RemotingClient;
pub use connection::Connection;
