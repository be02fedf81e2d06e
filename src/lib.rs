//! # insight-link
//!
//! Client side of the Accu-Chek Insight pump protocol.
//!
//! The crate pairs with a pump over any byte-stream [`Link`](transport::Link),
//! keeps the session encrypted and authenticated, and multiplexes typed
//! application commands over it:
//!
//! - **Pairing**: RSA key exchange, MD5/SHA-1 key derivation and operator
//!   confirmed verification codes
//! - **Transport**: SATL framing with Twofish-CTR encryption, truncated
//!   CBC-MAC, CRC-16 for unkeyed frames and strict nonce ordering
//! - **Commands**: a FIFO queue that activates pump services on demand and
//!   completes each caller with a typed response
//! - **Lifecycle**: reference counted connection requests, clean disconnects
//!   and automatic recovery of paired sessions
//!
//! ## Feature Flags
//!
//! - `storage` (default): [`JsonPairingStore`](storage::JsonPairingStore), a
//!   file backed pairing store using `serde_json`
//!
//! ## Modules
//!
//! - [`core`]: Constants, connection states and error types
//! - [`crypto`]: Cryptographic primitives used by pairing and framing
//! - [`transport`]: SATL packets, receive buffer and link I/O
//! - [`app`]: Application layer messages, services and the [`AppCommand`] trait
//! - [`client`]: The connection task and the [`InsightPump`] handle
//! - [`storage`]: Pairing persistence
//!
//! ## Example Usage
//!
//! ```no_run
//! use insight_link::prelude::*;
//!
//! # async fn run<L: Link>(link: L) -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryPairingStore::new();
//! let pump = InsightPump::builder(link)
//!     .store(store.clone())
//!     .pairing_data(store.load())
//!     .spawn();
//!
//! let mut states = pump.subscribe().await?;
//! let lock = ConnectionLock::new();
//! pump.request_connection(lock).await?;
//!
//! while let Some(state) = states.recv().await {
//!     match state {
//!         ConnectionState::WaitingForCodeConfirmation => {
//!             if let Some(code) = pump.verification_code().await? {
//!                 println!("pump should show {code}");
//!                 pump.confirm_code().await?;
//!             }
//!         }
//!         ConnectionState::Connected => break,
//!         _ => {}
//!     }
//! }
//!
//! let status = RawCommand::new(Service::Status, 0x0331, Vec::new());
//! let body = pump.enqueue_command(status).await?;
//! println!("response: {body:02x?}");
//!
//! pump.withdraw_connection_request(lock).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod app;
pub mod client;
pub mod core;
pub mod crypto;
pub mod storage;
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::app::{AppCommand, RawCommand, Service};
    pub use crate::client::{ConnectionLock, InsightPump, PumpConfig, PumpConfigBuilder, StateReceiver};
    pub use crate::core::{
        CommandError, ConnectionState, DecodeError, PumpError, SessionError,
    };
    pub use crate::storage::{MemoryPairingStore, PairingStore};
    #[cfg(feature = "storage")]
    pub use crate::storage::JsonPairingStore;
    pub use crate::transport::{Link, PairingData};
}

// Re-export commonly used items at crate root
pub use app::{AppCommand, Service};
pub use client::{ConnectionLock, InsightPump, PumpConfig};
pub use core::{CommandError, ConnectionState, PumpError, SessionError};
pub use transport::{Link, PairingData};
