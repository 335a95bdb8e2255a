//! `chat_server`
//!
//! Directory server: registration table, group registry, broadcast
//! discipline, and the listener/mutator driver pair described in §4.3 and
//! §4.5 of the protocol this crate implements.

pub mod core;
pub mod server;
