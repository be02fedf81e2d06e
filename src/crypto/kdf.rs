//! Key derivation: the MD5/SHA-1 multi-hash, session keys, verification
//! codes and service password hashes.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use zeroize::Zeroizing;

use super::keys::{KeyPair, SessionKey};
use crate::core::{
    CryptoError, KEY_SEED, SERVICE_PASSWORD_HASH_SIZE, SERVICE_PASSWORD_SEED, SESSION_KEY_SIZE,
    VERIFICATION_SEED,
};

const VERIFICATION_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Number of code characters in a verification string (spaces excluded).
const VERIFICATION_CHARS: usize = 10;

/// Output of a successful key exchange.
#[derive(Debug, Clone)]
pub struct DerivedKeys {
    /// Key for frames coming from the pump.
    pub incoming: SessionKey,
    /// Key for frames going to the pump.
    pub outgoing: SessionKey,
    /// Code both sides display, formatted `"abc def ghij"`.
    pub verification_code: String,
}

/// HMAC expansion: `A(0) = seed`, `A(i) = HMAC(A(i-1))`, output blocks are
/// `HMAC(A(i) || seed)`.
fn p_hash<M>(secret: &[u8], seed: &[u8], len: usize) -> Result<Vec<u8>, CryptoError>
where
    M: Mac + KeyInit + Clone,
{
    let keyed = <M as KeyInit>::new_from_slice(secret).map_err(|_| CryptoError::InvalidHmacKey)?;

    let mut output = Vec::with_capacity(len);
    let mut a = seed.to_vec();
    while output.len() < len {
        let mut mac = keyed.clone();
        mac.update(&a);
        a = mac.finalize().into_bytes().to_vec();

        let mut mac = keyed.clone();
        mac.update(&a);
        mac.update(seed);
        output.extend_from_slice(&mac.finalize().into_bytes());
    }
    output.truncate(len);
    Ok(output)
}

/// XOR of an HMAC-MD5 expansion keyed with the first half of `secret` and an
/// HMAC-SHA1 expansion keyed with the second half.
pub fn multi_hash_xor(secret: &[u8], seed: &[u8], len: usize) -> Result<Vec<u8>, CryptoError> {
    let (first, second) = secret.split_at(secret.len() / 2);
    let md5 = p_hash::<Hmac<Md5>>(first, seed, len)?;
    let sha1 = p_hash::<Hmac<Sha1>>(second, seed, len)?;
    Ok(md5.iter().zip(&sha1).map(|(a, b)| a ^ b).collect())
}

/// Hash a service password with the salt from a `SERVICE_CHALLENGE` response.
pub fn service_password_hash(
    password: &str,
    salt: &[u8],
) -> Result<[u8; SERVICE_PASSWORD_HASH_SIZE], CryptoError> {
    let seed = [SERVICE_PASSWORD_SEED, salt].concat();
    let hash = multi_hash_xor(password.as_bytes(), &seed, SERVICE_PASSWORD_HASH_SIZE)?;
    let mut out = [0u8; SERVICE_PASSWORD_HASH_SIZE];
    out.copy_from_slice(&hash);
    Ok(out)
}

/// Decrypt the pump's pre-master secret and derive the session keys.
///
/// `key_request` and `key_response` are the SATL packets without their
/// 8-byte prefix and trailer, exactly as they went over the wire.
pub fn derive_keys(
    key_pair: &KeyPair,
    key_request: &[u8],
    key_response: &[u8],
    encrypted_pre_master: &[u8],
    local_random: &[u8],
    peer_random: &[u8],
) -> Result<DerivedKeys, CryptoError> {
    let secret = key_pair.decrypt(encrypted_pre_master)?;
    derive_session_keys(&secret, key_request, key_response, local_random, peer_random)
}

/// Derive session keys from an already decrypted pre-master secret.
///
/// Deterministic; the pump performs the same computation on its side.
pub fn derive_session_keys(
    pre_master_secret: &[u8],
    key_request: &[u8],
    key_response: &[u8],
    local_random: &[u8],
    peer_random: &[u8],
) -> Result<DerivedKeys, CryptoError> {
    let seed = [KEY_SEED, local_random, peer_random].concat();
    let master = Zeroizing::new(multi_hash_xor(pre_master_secret, &seed, 2 * SESSION_KEY_SIZE)?);

    let incoming = SessionKey::from_slice(&master[..SESSION_KEY_SIZE])?;
    let outgoing = SessionKey::from_slice(&master[SESSION_KEY_SIZE..])?;
    let verification_code = verification_code(&master, key_request, key_response)?;

    Ok(DerivedKeys {
        incoming,
        outgoing,
        verification_code,
    })
}

fn verification_code(
    master: &[u8],
    key_request: &[u8],
    key_response: &[u8],
) -> Result<String, CryptoError> {
    let seed = [VERIFICATION_SEED, key_request, key_response].concat();
    let data = multi_hash_xor(master, &seed, 8)?;
    let mut value = [0u8; 8];
    value.copy_from_slice(&data);
    Ok(encode_verification(u64::from_le_bytes(value)))
}

/// Render 60 bits of `value` as ten base64 characters, low bits first,
/// grouped 3-3-4.
fn encode_verification(mut value: u64) -> String {
    let mut code = String::with_capacity(VERIFICATION_CHARS + 2);
    for index in 0..VERIFICATION_CHARS {
        if index == 3 || index == 6 {
            code.push(' ');
        }
        code.push(VERIFICATION_ALPHABET[(value & 63) as usize] as char);
        value >>= 6;
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p_hash_prefix_stable() {
        let short = p_hash::<Hmac<Sha1>>(b"key", b"seed", 10).unwrap();
        let long = p_hash::<Hmac<Sha1>>(b"key", b"seed", 45).unwrap();
        assert_eq!(short.len(), 10);
        assert_eq!(long.len(), 45);
        assert_eq!(&long[..10], &short[..]);
    }

    #[test]
    fn test_multi_hash_xor_uses_both_halves() {
        let base = multi_hash_xor(b"0123456789abcdef", b"seed", 32).unwrap();
        let first = multi_hash_xor(b"X123456789abcdef", b"seed", 32).unwrap();
        let second = multi_hash_xor(b"01234567X9abcdef", b"seed", 32).unwrap();
        assert_ne!(base, first);
        assert_ne!(base, second);
        assert_eq!(base.len(), 32);
    }

    #[test]
    fn test_derive_session_keys_deterministic() {
        let secret = [0x5Au8; 48];
        let a = derive_session_keys(&secret, b"request", b"response", &[1; 28], &[2; 28]).unwrap();
        let b = derive_session_keys(&secret, b"request", b"response", &[1; 28], &[2; 28]).unwrap();

        assert_eq!(a.incoming, b.incoming);
        assert_eq!(a.outgoing, b.outgoing);
        assert_eq!(a.verification_code, b.verification_code);
        assert_ne!(a.incoming, a.outgoing);

        let c = derive_session_keys(&secret, b"request", b"response", &[1; 28], &[3; 28]).unwrap();
        assert_ne!(a.incoming, c.incoming);
    }

    #[test]
    fn test_verification_depends_on_transcript() {
        let secret = [0x11u8; 48];
        let a = derive_session_keys(&secret, b"request", b"response", &[1; 28], &[2; 28]).unwrap();
        let b = derive_session_keys(&secret, b"request", b"respons3", &[1; 28], &[2; 28]).unwrap();
        assert_eq!(a.incoming, b.incoming);
        assert_ne!(a.verification_code, b.verification_code);
    }

    #[test]
    fn test_verification_format() {
        let keys = derive_session_keys(&[9u8; 48], b"a", b"b", &[0; 28], &[0; 28]).unwrap();
        let code = keys.verification_code;

        assert_eq!(code.len(), 12);
        assert_eq!(code.as_bytes()[3], b' ');
        assert_eq!(code.as_bytes()[7], b' ');
        assert!(code.chars().filter(|c| *c != ' ').all(|c| VERIFICATION_ALPHABET.contains(&(c as u8))));
    }

    #[test]
    fn test_encode_verification_bit_order() {
        assert_eq!(encode_verification(0), "AAA AAA AAAA");
        assert_eq!(encode_verification(1), "BAA AAA AAAA");
        assert_eq!(encode_verification(63 | (1 << 6)), "/BA AAA AAAA");
        assert_eq!(encode_verification(52 << 54), "AAA AAA AAA0");
    }

    #[test]
    fn test_session_keys_known_answer() {
        let keys = derive_session_keys(&[0x5A; 48], b"request", b"response", &[1; 28], &[2; 28]).unwrap();
        assert_eq!(hex::encode(keys.incoming.as_bytes()), "364bc297041a746e374bbb784d24546e");
        assert_eq!(hex::encode(keys.outgoing.as_bytes()), "55f5de7d68537a81af925b2d4eb12006");
        assert_eq!(keys.verification_code, "y8L GpN Nzce");
    }

    #[test]
    fn test_derive_keys_through_rsa() {
        use rand::rngs::OsRng;
        use rsa::Oaep;

        let pair = KeyPair::generate().unwrap();
        let secret = [0x77u8; 48];
        let encrypted = pair
            .public_key()
            .encrypt(&mut OsRng, Oaep::new::<Sha1>(), &secret)
            .unwrap();

        let via_rsa = derive_keys(&pair, b"req", b"resp", &encrypted, &[4; 28], &[5; 28]).unwrap();
        let direct = derive_session_keys(&secret, b"req", b"resp", &[4; 28], &[5; 28]).unwrap();
        assert_eq!(via_rsa.incoming, direct.incoming);
        assert_eq!(via_rsa.outgoing, direct.outgoing);
        assert_eq!(via_rsa.verification_code, direct.verification_code);

        assert!(derive_keys(&pair, b"req", b"resp", &[0u8; 256], &[4; 28], &[5; 28]).is_err());
    }

    #[test]
    fn test_service_password_hash_depends_on_salt() {
        let a = service_password_hash("u+5Fhz6Gw4j1Kkas", &[1; 16]).unwrap();
        let b = service_password_hash("u+5Fhz6Gw4j1Kkas", &[2; 16]).unwrap();
        let c = service_password_hash("MAbcV2X6PVjxuz+R", &[1; 16]).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(hex::encode(a), "a76151da87308c1640a41e9faf28b65f");
    }
}
