//! Twofish counter-mode encryption and the truncated CBC-MAC used by keyed
//! SATL frames.

use twofish::Twofish;
use twofish::cipher::generic_array::GenericArray;
use twofish::cipher::{BlockEncrypt, KeyInit};

use super::keys::SessionKey;
use super::nonce::Nonce;
use crate::core::{CryptoError, MAC_SIZE, NONCE_SIZE, SATL_HEADER_SIZE, SESSION_KEY_SIZE};

const BLOCK_SIZE: usize = 16;

/// Flag byte of counter blocks.
const CTR_FLAG: u8 = 0x01;

/// Flag byte of the MAC IV block.
const MAC_FLAG: u8 = 0x59;

fn block_cipher(key: &SessionKey) -> Result<Twofish, CryptoError> {
    cipher_from_slice(key.as_bytes())
}

fn cipher_from_slice(key: &[u8]) -> Result<Twofish, CryptoError> {
    Twofish::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: SESSION_KEY_SIZE,
        actual: key.len(),
    })
}

fn encrypt_block(cipher: &Twofish, block: [u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let mut block = GenericArray::from(block);
    cipher.encrypt_block(&mut block);
    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&block);
    out
}

/// `flag || nonce || u16_be(counter)`
fn nonce_block(flag: u8, nonce: &Nonce, counter: u16) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    block[0] = flag;
    block[1..1 + NONCE_SIZE].copy_from_slice(nonce.as_bytes());
    block[14..].copy_from_slice(&counter.to_be_bytes());
    block
}

/// Encrypt or decrypt `data` with Twofish-CTR.
///
/// Counter blocks start at 1. Applying the function twice with the same key
/// and nonce returns the input.
pub fn encrypt_or_decrypt(
    data: &[u8],
    key: &SessionKey,
    nonce: &Nonce,
) -> Result<Vec<u8>, CryptoError> {
    let cipher = block_cipher(key)?;
    let mut output = Vec::with_capacity(data.len());
    for (index, chunk) in data.chunks(BLOCK_SIZE).enumerate() {
        let counter = u16::try_from(index + 1).map_err(|_| CryptoError::MessageTooLong(data.len()))?;
        let keystream = encrypt_block(&cipher, nonce_block(CTR_FLAG, nonce, counter));
        output.extend(chunk.iter().zip(keystream).map(|(byte, key)| byte ^ key));
    }
    Ok(output)
}

fn zero_pad(mut bytes: Vec<u8>) -> Vec<u8> {
    let rem = bytes.len() % BLOCK_SIZE;
    if rem != 0 {
        bytes.resize(bytes.len() + BLOCK_SIZE - rem, 0);
    }
    bytes
}

/// Compute the 8-byte MAC over `header` and the plaintext `data`.
///
/// The IV is the encrypted `0x59 || nonce || u16_be(len(data))` block; the
/// CBC input is `pad(u16_be(21) || header) || pad(data)`. The first eight
/// bytes of the last ciphertext block are masked with the encrypted
/// counter-zero block.
pub fn calculate_mac(
    nonce: &Nonce,
    data: &[u8],
    header: &[u8; SATL_HEADER_SIZE],
    key: &SessionKey,
) -> Result<[u8; MAC_SIZE], CryptoError> {
    let cipher = block_cipher(key)?;
    let data_len = u16::try_from(data.len()).map_err(|_| CryptoError::MessageTooLong(data.len()))?;

    let mut chain = encrypt_block(&cipher, nonce_block(MAC_FLAG, nonce, data_len));

    let mut authenticated = (SATL_HEADER_SIZE as u16).to_be_bytes().to_vec();
    authenticated.extend_from_slice(header);
    let mut authenticated = zero_pad(authenticated);
    authenticated.extend_from_slice(&zero_pad(data.to_vec()));

    for chunk in authenticated.chunks(BLOCK_SIZE) {
        let mut block = [0u8; BLOCK_SIZE];
        for (i, byte) in chunk.iter().enumerate() {
            block[i] = byte ^ chain[i];
        }
        chain = encrypt_block(&cipher, block);
    }

    let mask = encrypt_block(&cipher, nonce_block(CTR_FLAG, nonce, 0));
    let mut mac = [0u8; MAC_SIZE];
    for (i, byte) in mac.iter_mut().enumerate() {
        *byte = chain[i] ^ mask[i];
    }
    Ok(mac)
}
