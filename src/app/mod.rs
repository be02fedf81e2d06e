//! Application layer: service addressing, message framing and the
//! [`AppCommand`] abstraction carried inside SATL `DATA` frames.

mod command;
mod message;
mod service;

pub use command::{AppCommand, RawCommand};
pub use message::*;
pub use service::Service;
