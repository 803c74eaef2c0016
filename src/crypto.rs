// ABOUTME: AEAD secret box for credentials at rest.
// ABOUTME: AES-256-GCM producing hex(iv):hex(tag):hex(ciphertext) triples.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key must be {} hex characters", KEY_LEN * 2)]
    BadKey,

    #[error("ciphertext is not in iv:tag:ciphertext form")]
    BadFormat,

    #[error("ciphertext failed authentication")]
    Tampered,

    #[error("decrypted payload is not valid UTF-8")]
    NotUtf8,
}

/// Symmetric secret box wrapping every credential written to the store.
#[derive(Clone)]
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBox").finish_non_exhaustive()
    }
}

impl SecretBox {
    /// Build from a 64-hex-character key.
    pub fn from_hex_key(hex_key: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_key).map_err(|_| CryptoError::BadKey)?;
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::BadKey);
        }
        let key = Key::<Aes256Gcm>::from_slice(&bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt a UTF-8 string into the `iv:tag:ct` wire form.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);

        // Aead::encrypt appends the 16-byte tag to the ciphertext.
        let sealed = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: &[],
                },
            )
            .expect("AES-GCM encryption is infallible for in-memory buffers");

        let (ct, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        format!("{}:{}:{}", hex::encode(iv), hex::encode(tag), hex::encode(ct))
    }

    /// Decrypt an `iv:tag:ct` triple back to the original string.
    pub fn decrypt(&self, wire: &str) -> Result<String, CryptoError> {
        let mut parts = wire.splitn(3, ':');
        let iv = parts.next().ok_or(CryptoError::BadFormat)?;
        let tag = parts.next().ok_or(CryptoError::BadFormat)?;
        let ct = parts.next().ok_or(CryptoError::BadFormat)?;

        let iv = hex::decode(iv).map_err(|_| CryptoError::BadFormat)?;
        let tag = hex::decode(tag).map_err(|_| CryptoError::BadFormat)?;
        let mut ct = hex::decode(ct).map_err(|_| CryptoError::BadFormat)?;

        if iv.len() != IV_LEN || tag.len() != TAG_LEN {
            return Err(CryptoError::BadFormat);
        }

        ct.extend_from_slice(&tag);
        let nonce = Nonce::from_slice(&iv);
        let plain = self
            .cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &ct,
                    aad: &[],
                },
            )
            .map_err(|_| CryptoError::Tampered)?;

        String::from_utf8(plain).map_err(|_| CryptoError::NotUtf8)
    }
}

/// Whether a stored value is in the encrypted triple form: exactly three
/// non-empty hex tokens separated by colons.
pub fn is_encrypted(value: &str) -> bool {
    let parts: Vec<&str> = value.split(':').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_box() -> SecretBox {
        SecretBox::from_hex_key(&"ab".repeat(32)).unwrap()
    }

    #[test]
    fn round_trip() {
        let sb = test_box();
        let wire = sb.encrypt("sk-ant-very-secret");
        assert!(is_encrypted(&wire));
        assert_eq!(sb.decrypt(&wire).unwrap(), "sk-ant-very-secret");
    }

    #[test]
    fn rejects_bad_key() {
        assert!(SecretBox::from_hex_key("deadbeef").is_err());
        assert!(SecretBox::from_hex_key(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn tamper_detection() {
        let sb = test_box();
        let wire = sb.encrypt("payload");
        // Flip one hex digit of the ciphertext segment.
        let mut chars: Vec<char> = wire.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '0' { '1' } else { '0' };
        let tampered: String = chars.into_iter().collect();
        assert!(matches!(sb.decrypt(&tampered), Err(CryptoError::Tampered)));
    }

    #[test]
    fn is_encrypted_shape() {
        assert!(is_encrypted("00ff:ab:1234"));
        assert!(!is_encrypted("plaintext"));
        assert!(!is_encrypted("a:b"));
        assert!(!is_encrypted("xx:yy:zz"));
        assert!(!is_encrypted("::"));
    }

    #[test]
    fn distinct_ivs_per_encryption() {
        let sb = test_box();
        let a = sb.encrypt("same");
        let b = sb.encrypt("same");
        assert_ne!(a, b);
    }
}
