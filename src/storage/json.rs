//! Pairing data stored as a JSON file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{PairingStore, StoreError};
use crate::crypto::{Nonce, SessionKey};
use crate::transport::PairingData;

const FILE_NAME: &str = "pump_pairing.json";
const FILE_VERSION: u32 = 1;

/// Hex-encoded pairing data.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PairingRecord {
    last_sent_nonce: String,
    last_received_nonce: String,
    comm_id: u32,
    incoming_key: String,
    outgoing_key: String,
}

impl PairingRecord {
    fn from_data(data: &PairingData) -> Self {
        Self {
            last_sent_nonce: hex::encode(data.last_sent_nonce.as_bytes()),
            last_received_nonce: hex::encode(data.last_received_nonce.as_bytes()),
            comm_id: data.comm_id,
            incoming_key: hex::encode(data.incoming_key.as_bytes()),
            outgoing_key: hex::encode(data.outgoing_key.as_bytes()),
        }
    }

    fn to_data(&self) -> Result<PairingData, StoreError> {
        let nonce = |field: &str, value: &str| -> Result<Nonce, StoreError> {
            let bytes = hex::decode(value).map_err(|e| StoreError::Invalid(format!("{field}: {e}")))?;
            Nonce::from_slice(&bytes).ok_or_else(|| StoreError::Invalid(format!("{field}: wrong length")))
        };
        let key = |field: &str, value: &str| -> Result<SessionKey, StoreError> {
            let bytes = hex::decode(value).map_err(|e| StoreError::Invalid(format!("{field}: {e}")))?;
            SessionKey::from_slice(&bytes).map_err(|e| StoreError::Invalid(format!("{field}: {e}")))
        };
        Ok(PairingData {
            last_sent_nonce: nonce("last_sent_nonce", &self.last_sent_nonce)?,
            last_received_nonce: nonce("last_received_nonce", &self.last_received_nonce)?,
            comm_id: self.comm_id,
            incoming_key: key("incoming_key", &self.incoming_key)?,
            outgoing_key: key("outgoing_key", &self.outgoing_key)?,
        })
    }
}

/// Pairing file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PairingFile {
    /// File format version.
    version: u32,
    /// Pairing completed.
    paired: bool,
    /// Last saved pairing data.
    pairing: Option<PairingRecord>,
}

impl Default for PairingFile {
    fn default() -> Self {
        Self {
            version: FILE_VERSION,
            paired: false,
            pairing: None,
        }
    }
}

/// Pairing store backed by `pump_pairing.json` in a data directory.
#[derive(Debug)]
pub struct JsonPairingStore {
    file_path: PathBuf,
    file: PairingFile,
}

impl JsonPairingStore {
    /// Open the store in `data_dir`, creating the directory if needed.
    pub fn new(data_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)?;
        let file_path = data_dir.join(FILE_NAME);
        let file = Self::read(&file_path)?;

        info!(path = ?file_path, paired = file.paired, "loaded pump pairing store");

        Ok(Self { file_path, file })
    }

    /// Returns true if pairing completed.
    pub fn is_paired(&self) -> bool {
        self.file.paired
    }

    /// Stored pairing data, if paired.
    pub fn load(&self) -> Result<Option<PairingData>, StoreError> {
        match (&self.file.paired, &self.file.pairing) {
            (true, Some(record)) => record.to_data().map(Some),
            _ => Ok(None),
        }
    }

    /// Forget the pump and delete the file.
    pub fn reset(&mut self) -> Result<(), StoreError> {
        self.file = PairingFile::default();
        if self.file_path.exists() {
            std::fs::remove_file(&self.file_path)?;
        }
        info!(path = ?self.file_path, "pump pairing removed");
        Ok(())
    }

    fn read(path: &Path) -> Result<PairingFile, StoreError> {
        if !path.exists() {
            debug!("pairing file doesn't exist, starting unpaired");
            return Ok(PairingFile::default());
        }
        let content = std::fs::read_to_string(path)?;
        let file: PairingFile =
            serde_json::from_str(&content).map_err(|e| StoreError::Invalid(e.to_string()))?;
        if file.version != FILE_VERSION {
            return Err(StoreError::Invalid(format!("unsupported version {}", file.version)));
        }
        Ok(file)
    }

    fn write(&self) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(&self.file)
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
        let tmp = self.file_path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.file_path)?;
        Ok(())
    }
}

impl PairingStore for JsonPairingStore {
    fn save(&mut self, data: PairingData) -> Result<(), StoreError> {
        self.file.pairing = Some(PairingRecord::from_data(&data));
        self.write()
    }

    fn set_paired(&mut self, paired: bool) -> Result<(), StoreError> {
        self.file.paired = paired;
        self.write()
    }
}
