//! Cryptographer: stateless primitives for pairing and frame protection.
//!
//! - [`KeyPair`]: ephemeral RSA-2048 pair, OAEP decryption of the pre-master secret
//! - [`derive_keys`]: MD5/SHA-1 multi-hash KDF producing [`SessionKey`]s and
//!   the verification code
//! - [`encrypt_or_decrypt`] / [`calculate_mac`]: Twofish-CTR and truncated CBC-MAC
//! - [`calculate_crc`]: CRC-16 for unkeyed frames
//! - [`Nonce`]: ordered 13-byte frame counter

mod cipher;
mod crc;
mod kdf;
mod keys;
mod nonce;

pub use cipher::{calculate_mac, encrypt_or_decrypt};
pub use crc::calculate_crc;
pub use kdf::{DerivedKeys, derive_keys, derive_session_keys, multi_hash_xor, service_password_hash};
pub use keys::{KeyPair, SessionKey};
pub use nonce::Nonce;
