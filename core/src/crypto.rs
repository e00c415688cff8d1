use crate::error::{Error, Result};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Ciphertext and IV, both base64 encoded for storage in text columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: String,
    pub iv: String,
}

/// AES-256-GCM keyed by the SHA-256 digest of a configured secret.
/// Every `encrypt` call draws a fresh nonce, which doubles as the IV.
#[derive(Clone)]
pub struct Cipher {
    cipher: Aes256Gcm,
}

impl Cipher {
    pub fn from_secret(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::Config("encryption secret must not be empty".into()));
        }
        let digest = Sha256::digest(secret.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<Sealed> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| Error::Crypto(format!("encrypt failed: {e}")))?;

        Ok(Sealed {
            ciphertext: STANDARD.encode(ciphertext),
            iv: STANDARD.encode(nonce),
        })
    }

    pub fn decrypt(&self, ciphertext_b64: &str, iv_b64: &str) -> Result<String> {
        let ciphertext = STANDARD
            .decode(ciphertext_b64)
            .map_err(|e| Error::Crypto(format!("invalid ciphertext encoding: {e}")))?;
        let iv = STANDARD
            .decode(iv_b64)
            .map_err(|e| Error::Crypto(format!("invalid iv encoding: {e}")))?;
        if iv.len() != 12 {
            return Err(Error::Crypto(format!("iv must be 12 bytes, got {}", iv.len())));
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_ref())
            .map_err(|_| Error::Crypto("decryption failed (wrong key or tampered data)".into()))?;

        String::from_utf8(plaintext).map_err(|e| Error::Crypto(format!("plaintext is not utf-8: {e}")))
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cipher(..)")
    }
}
