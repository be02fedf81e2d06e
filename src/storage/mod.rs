//! Persistence of pairing data across restarts.
//!
//! The connection task hands every change to a [`PairingStore`] once pairing
//! has completed. Loading happens before the task starts: pass the stored
//! [`PairingData`] to the pump builder to resume a paired session.

#[cfg(feature = "storage")]
mod json;

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::transport::PairingData;

#[cfg(feature = "storage")]
pub use json::JsonPairingStore;

/// Errors raised by pairing stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be parsed.
    #[error("invalid pairing data: {0}")]
    Invalid(String),
}

/// Receives pairing data whenever it changes.
pub trait PairingStore: Send + 'static {
    /// Persist a snapshot of the pairing data.
    fn save(&mut self, data: PairingData) -> Result<(), StoreError>;

    /// Persist whether pairing completed.
    fn set_paired(&mut self, paired: bool) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct MemoryRecord {
    paired: bool,
    data: Option<PairingData>,
}

/// In-memory store; clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct MemoryPairingStore {
    inner: Arc<Mutex<MemoryRecord>>,
}

impl MemoryPairingStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if pairing completed.
    pub fn is_paired(&self) -> bool {
        self.inner.lock().paired
    }

    /// Last saved pairing data, if paired.
    pub fn load(&self) -> Option<PairingData> {
        let record = self.inner.lock();
        if record.paired { record.data.clone() } else { None }
    }

    /// Forget the pump.
    pub fn reset(&self) {
        *self.inner.lock() = MemoryRecord::default();
    }
}

impl PairingStore for MemoryPairingStore {
    fn save(&mut self, data: PairingData) -> Result<(), StoreError> {
        self.inner.lock().data = Some(data);
        Ok(())
    }

    fn set_paired(&mut self, paired: bool) -> Result<(), StoreError> {
        self.inner.lock().paired = paired;
        Ok(())
    }
}

/// Store that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPairingStore;

impl PairingStore for NoopPairingStore {
    fn save(&mut self, _data: PairingData) -> Result<(), StoreError> {
        Ok(())
    }

    fn set_paired(&mut self, _paired: bool) -> Result<(), StoreError> {
        Ok(())
    }
}
