pub mod blob_store;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod ids;
pub mod participant;
pub mod protocol;
pub mod registry;
pub mod room;
