pub mod agent;
pub mod api;
pub mod config;
pub mod decoders;
pub mod facades;
pub mod messages;
pub mod mqtt;
pub mod prometheus;
pub mod router;
pub mod sender;
pub mod senml;
pub mod server;
pub mod time;
pub mod uplink;
pub mod v0_endpoint;
