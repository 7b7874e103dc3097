pub mod client;
pub mod forwarder;
