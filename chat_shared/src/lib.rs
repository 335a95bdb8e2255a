//! `chat_shared`
//!
//! Shared libraries used by both the directory server and the peer client.
//!
//! Design goals:
//! - One wire codec, one reliability primitive, used by both roles.
//! - Clear separation of concerns (frame, model, reliable, shutdown, config).
//! - No `unsafe`.

pub mod config;
pub mod error;
pub mod frame;
pub mod model;
pub mod reliable;
pub mod shutdown;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::error::ChatError;
    pub use crate::frame::{decode_from_bytes, encode_to_bytes, Frame, FrameBody, Metadata};
    pub use crate::model::{ClientRecord, ClientStatus, GroupRegistry, RegistrationTable};
    pub use crate::reliable::{reliable_send, PendingAck, SendOutcome};
}
