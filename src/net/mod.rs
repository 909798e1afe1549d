//! The connection layer: wire codec, per-connection state, and the hub
//! that binds a TCP listener to the game manager and matchmaker
//! (`spec.md` §4.5/§4.6).

pub mod connection;
pub mod hub;
pub mod protocol;

pub use hub::ConnectionHub;
