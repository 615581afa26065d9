#![forbid(unsafe_code)]

//! Holoroom relay.
//!
//! A fan-out switch between WebSocket sessions. The relay:
//! 1. Assigns each socket a session id and announces it with `welcome`
//! 2. Broadcasts pose frames to every other session, verbatim
//! 3. Delivers signaling frames to their `target`, stamped with `sender`
//! 4. Announces `playerdisconnected` when a socket goes away
//!
//! It keeps no application state beyond the set of live sessions.

pub mod config;
pub mod envelope;
pub mod hub;
pub mod server;

pub use config::RelayConfig;
pub use hub::Hub;
