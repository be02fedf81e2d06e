//! Key material for pairing and session encryption.

use std::fmt;

use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::core::{CryptoError, RSA_KEY_BITS, RSA_MODULUS_SIZE, RSA_PUBLIC_EXPONENT, SESSION_KEY_SIZE};

/// A 16-byte Twofish session key.
///
/// Zeroized on drop. `Debug` never prints the key bytes.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_SIZE]);

impl SessionKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; SESSION_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Copy key bytes out of a slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; SESSION_KEY_SIZE] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: SESSION_KEY_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self(key))
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Ephemeral RSA key pair for one pairing attempt.
///
/// The private key is zeroized on drop by `rsa` itself.
#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
}

impl KeyPair {
    /// Generate a fresh 2048-bit key pair with exponent 65537.
    pub fn generate() -> Result<Self, CryptoError> {
        let exponent = BigUint::from(RSA_PUBLIC_EXPONENT);
        let private = RsaPrivateKey::new_with_exp(&mut OsRng, RSA_KEY_BITS, &exponent)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(Self { private })
    }

    /// Public half of the pair.
    pub fn public_key(&self) -> RsaPublicKey {
        self.private.to_public_key()
    }

    /// Big-endian modulus, left-padded to 256 bytes.
    pub fn modulus(&self) -> [u8; RSA_MODULUS_SIZE] {
        let bytes = self.private.n().to_bytes_be();
        let mut modulus = [0u8; RSA_MODULUS_SIZE];
        let start = RSA_MODULUS_SIZE.saturating_sub(bytes.len());
        let skip = bytes.len().saturating_sub(RSA_MODULUS_SIZE);
        modulus[start..].copy_from_slice(&bytes[skip..]);
        modulus
    }

    /// RSA-OAEP (SHA-1, MGF1-SHA-1, empty label) decryption.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.private
            .decrypt(Oaep::new::<Sha1>(), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::InvalidCipherText)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("modulus_bits", &(self.private.size() * 8))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let pair = KeyPair::generate().unwrap();
        let modulus = pair.modulus();

        assert_eq!(pair.public_key().e(), &BigUint::from(65537u32));
        // 2048-bit moduli always have the top bit set
        assert!(modulus[0] & 0x80 != 0);
        assert_eq!(BigUint::from_bytes_be(&modulus), *pair.public_key().n());
    }

    #[test]
    fn test_oaep_decrypt() {
        let pair = KeyPair::generate().unwrap();
        let secret = [0x42u8; 48];
        let ciphertext = pair
            .public_key()
            .encrypt(&mut OsRng, Oaep::new::<Sha1>(), &secret)
            .unwrap();

        assert_eq!(ciphertext.len(), RSA_MODULUS_SIZE);
        assert_eq!(pair.decrypt(&ciphertext).unwrap().as_slice(), &secret);

        let mut tampered = ciphertext.clone();
        tampered[10] ^= 1;
        assert_eq!(pair.decrypt(&tampered).unwrap_err(), CryptoError::InvalidCipherText);
    }

    #[test]
    fn test_session_key_from_slice() {
        assert!(SessionKey::from_slice(&[1u8; 16]).is_ok());
        assert_eq!(
            SessionKey::from_slice(&[1u8; 15]).unwrap_err(),
            CryptoError::InvalidKeyLength { expected: 16, actual: 15 }
        );
        assert_eq!(format!("{:?}", SessionKey::from_bytes([7; 16])), "SessionKey(..)");
    }
}
