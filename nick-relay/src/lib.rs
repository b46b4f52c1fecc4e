//! Nickname-addressed text relay.
//!
//! Clients connect over TCP, answer the `auth` prompt with a nickname and then
//! send `<recipient>:<text>` lines that are delivered to whoever currently
//! holds that nickname. Each module owns one piece of that path:
//!
//! - [`cli`] parses the command-line interface for relay and client modes.
//! - [`server`] accepts TCP connections and spawns a handler per connection.
//! - [`connection`] runs the handshake, registers the session and guarantees
//!   its cleanup.
//! - [`session`] holds the per-connection receive and send loops.
//! - [`broker`] is the single task that owns the nickname registry and makes
//!   every routing decision.
//! - [`message`] defines the line protocol and async read/write helpers.
//! - [`client`] is a small terminal client for the protocol.
//! - [`error`] has the handshake and parse error types.
//!
//! Integration tests drive the relay over real sockets through this crate.

pub mod broker;
pub mod cli;
pub mod client;
pub mod connection;
pub mod error;
pub mod message;
pub mod server;
pub mod session;
