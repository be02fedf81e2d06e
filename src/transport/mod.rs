//! Security & Transport Layer (SATL)
//!
//! This module frames, authenticates and moves SATL packets:
//!
//! - **Packet codec**: [`encode_packet`] and [`SatlPacket`] for the outer wire format
//! - **Keyed session**: [`PairingData`] sealing and opening frames with replay protection
//! - **Receive buffer**: [`FrameBuffer`] cutting the byte stream into packets
//! - **Link I/O**: the [`Link`] trait plus [`read_loop`] and [`write_loop`]
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Application Layer              │
//! ├─────────────────────────────────────────┤
//! │       Security & Transport Layer        │  ← This module
//! │   framing, CTR/MAC, CRC, nonces         │
//! ├─────────────────────────────────────────┤
//! │         Radio link (byte stream)        │
//! └─────────────────────────────────────────┘
//! ```

mod buffer;
mod frame;
mod link;
mod session;

pub use buffer::FrameBuffer;
pub use frame::{SatlCommand, SatlPacket, encode_packet, packet_size, transcript};
pub use link::{Link, LinkEvent, read_loop, write_loop};
pub use session::PairingData;
