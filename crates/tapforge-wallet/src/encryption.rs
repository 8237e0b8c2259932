//! Password-encrypted backup records.
//!
//! The key is stretched with Argon2id and the payload sealed with
//! AES-256-GCM. The KDF parameters travel with the record, and the header
//! fields are authenticated as associated data, so tampering with any of
//! them fails decryption the same way a wrong password does.
//!
//! # Record format (JSON, binary fields hex-encoded)
//! ```text
//! {
//!   "version": 1,
//!   "kdf": { "algorithm": "argon2id", "salt": "..", "iterations": 2,
//!            "memory_kib": 19456, "parallelism": 1 },
//!   "nonce": "..", "ciphertext": "..", "authentication_tag": ".."
//! }
//! ```

use std::fs;
use std::path::Path;

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::WalletError;

/// Current record version.
pub const BACKUP_VERSION: u32 = 1;

pub const KDF_ALGORITHM: &str = "argon2id";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Upper bound accepted when reading a record (4 GiB).
const MAX_MEMORY_KIB: u32 = 4 * 1024 * 1024;
const MAX_ITERATIONS: u32 = 1_000;

/// Argon2id cost parameters and salt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: String,
    #[serde(with = "hex::serde")]
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub memory_kib: u32,
    pub parallelism: u32,
}

impl KdfParams {
    /// Fresh random salt with the given costs.
    pub fn new(iterations: u32, memory_kib: u32, parallelism: u32) -> Self {
        let mut salt = vec![0u8; SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        Self {
            algorithm: KDF_ALGORITHM.to_string(),
            salt,
            iterations,
            memory_kib,
            parallelism,
        }
    }

    fn validate(&self) -> Result<(), WalletError> {
        if self.algorithm != KDF_ALGORITHM {
            return Err(WalletError::CorruptedFile(format!(
                "unsupported kdf '{}'",
                self.algorithm
            )));
        }
        if self.salt.len() < argon2::RECOMMENDED_SALT_LEN {
            return Err(WalletError::CorruptedFile(format!(
                "salt too short: {} bytes",
                self.salt.len()
            )));
        }
        if self.iterations == 0 || self.iterations > MAX_ITERATIONS {
            return Err(WalletError::CorruptedFile(format!(
                "iterations out of range: {}",
                self.iterations
            )));
        }
        if self.memory_kib > MAX_MEMORY_KIB {
            return Err(WalletError::CorruptedFile(format!(
                "memory cost out of range: {} KiB",
                self.memory_kib
            )));
        }
        Ok(())
    }

    /// Stretch `password` into an AES-256 key.
    fn derive_key(&self, password: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>, WalletError> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| WalletError::CorruptedFile(format!("kdf parameters: {e}")))?;
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        argon
            .hash_password_into(password, &self.salt, key.as_mut())
            .map_err(|e| WalletError::Encryption(format!("kdf: {e}")))?;
        Ok(key)
    }
}

impl Default for KdfParams {
    /// OWASP baseline for Argon2id: 19 MiB, two passes, one lane.
    fn default() -> Self {
        Self::new(2, 19 * 1024, 1)
    }
}

/// An encrypted backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub version: u32,
    pub kdf: KdfParams,
    #[serde(with = "hex::serde")]
    pub nonce: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub authentication_tag: Vec<u8>,
}

impl BackupRecord {
    /// Encrypt `plaintext` under `password` with default KDF costs.
    pub fn seal(plaintext: &[u8], password: &[u8]) -> Result<Self, WalletError> {
        Self::seal_with_params(plaintext, password, KdfParams::default())
    }

    pub fn seal_with_params(
        plaintext: &[u8],
        password: &[u8],
        kdf: KdfParams,
    ) -> Result<Self, WalletError> {
        kdf.validate()?;
        let key = kdf.derive_key(password)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| WalletError::Encryption(e.to_string()))?;

        let mut nonce = vec![0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let aad = associated_data(BACKUP_VERSION, &kdf);
        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), &aad, &mut buffer)
            .map_err(|e| WalletError::Encryption(e.to_string()))?;

        debug!(bytes = plaintext.len(), "sealed backup record");
        Ok(Self {
            version: BACKUP_VERSION,
            kdf,
            nonce,
            ciphertext: buffer,
            authentication_tag: tag.to_vec(),
        })
    }

    /// Decrypt the record.
    ///
    /// A wrong password and a tampered record are indistinguishable and
    /// both yield [`WalletError::InvalidPassword`]; structurally malformed
    /// records yield [`WalletError::CorruptedFile`].
    pub fn open(&self, password: &[u8]) -> Result<Zeroizing<Vec<u8>>, WalletError> {
        if self.version != BACKUP_VERSION {
            return Err(WalletError::CorruptedFile(format!(
                "unsupported backup version {}",
                self.version
            )));
        }
        self.kdf.validate()?;
        if self.nonce.len() != NONCE_LEN {
            return Err(WalletError::CorruptedFile(format!(
                "nonce must be {NONCE_LEN} bytes, got {}",
                self.nonce.len()
            )));
        }
        if self.authentication_tag.len() != TAG_LEN {
            return Err(WalletError::CorruptedFile(format!(
                "authentication tag must be {TAG_LEN} bytes, got {}",
                self.authentication_tag.len()
            )));
        }

        let key = self.kdf.derive_key(password)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| WalletError::Decryption(e.to_string()))?;
        let aad = associated_data(self.version, &self.kdf);
        let mut buffer = Zeroizing::new(self.ciphertext.clone());
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&self.nonce),
                &aad,
                &mut *buffer,
                Tag::from_slice(&self.authentication_tag),
            )
            .map_err(|_| WalletError::InvalidPassword)?;
        Ok(buffer)
    }

    pub fn to_json(&self) -> Result<String, WalletError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, WalletError> {
        serde_json::from_str(json).map_err(|e| WalletError::CorruptedFile(e.to_string()))
    }

    /// Write the record, replacing any existing file atomically.
    pub fn write_to(&self, path: &Path) -> Result<(), WalletError> {
        let json = self.to_json()?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        info!(path = %path.display(), "wrote encrypted backup");
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self, WalletError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

/// Header fields bound to the ciphertext.
fn associated_data(version: u32, kdf: &KdfParams) -> Vec<u8> {
    let mut aad = Vec::with_capacity(32 + kdf.salt.len());
    aad.extend_from_slice(b"tapforge-backup");
    aad.extend_from_slice(&version.to_le_bytes());
    aad.extend_from_slice(kdf.algorithm.as_bytes());
    aad.extend_from_slice(&kdf.salt);
    aad.extend_from_slice(&kdf.iterations.to_le_bytes());
    aad.extend_from_slice(&kdf.memory_kib.to_le_bytes());
    aad.extend_from_slice(&kdf.parallelism.to_le_bytes());
    aad
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> KdfParams {
        KdfParams::new(1, 64, 1)
    }

    fn seal(plaintext: &[u8], password: &[u8]) -> BackupRecord {
        BackupRecord::seal_with_params(plaintext, password, cheap()).unwrap()
    }

    #[test]
    fn seal_open_roundtrip() {
        let record = seal(b"abandon abandon about", b"correct horse battery staple");
        let plain = record.open(b"correct horse battery staple").unwrap();
        assert_eq!(plain.as_slice(), b"abandon abandon about");
    }

    #[test]
    fn empty_payload() {
        let record = seal(b"", b"pw");
        assert!(record.ciphertext.is_empty());
        assert!(record.open(b"pw").unwrap().is_empty());
    }

    #[test]
    fn wrong_password_fails() {
        let record = seal(b"secret", b"correct");
        assert_eq!(record.open(b"wrong").unwrap_err(), WalletError::InvalidPassword);
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let mut record = seal(b"secret data", b"pw");
        record.ciphertext[0] ^= 0xff;
        assert_eq!(record.open(b"pw").unwrap_err(), WalletError::InvalidPassword);
    }

    #[test]
    fn tampered_header_fails() {
        let mut record = seal(b"secret data", b"pw");
        record.kdf.iterations = 2;
        assert_eq!(record.open(b"pw").unwrap_err(), WalletError::InvalidPassword);
    }

    #[test]
    fn fresh_salt_and_nonce_per_record() {
        let a = seal(b"same", b"pw");
        let b = seal(b"same", b"pw");
        assert_ne!(a.kdf.salt, b.kdf.salt);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn malformed_records_are_corrupted() {
        let good = seal(b"secret", b"pw");

        let mut r = good.clone();
        r.version = 9;
        assert!(matches!(r.open(b"pw"), Err(WalletError::CorruptedFile(_))));

        let mut r = good.clone();
        r.kdf.algorithm = "scrypt".into();
        assert!(matches!(r.open(b"pw"), Err(WalletError::CorruptedFile(_))));

        let mut r = good.clone();
        r.nonce.truncate(4);
        assert!(matches!(r.open(b"pw"), Err(WalletError::CorruptedFile(_))));

        let mut r = good.clone();
        r.authentication_tag.pop();
        assert!(matches!(r.open(b"pw"), Err(WalletError::CorruptedFile(_))));

        let mut r = good;
        r.kdf.salt = vec![1, 2];
        assert!(matches!(r.open(b"pw"), Err(WalletError::CorruptedFile(_))));
    }

    #[test]
    fn json_shape() {
        let record = seal(b"x", b"pw");
        let json: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["kdf"]["algorithm"], "argon2id");
        assert_eq!(json["kdf"]["memory_kib"], 64);
        assert_eq!(json["nonce"].as_str().unwrap().len(), NONCE_LEN * 2);
        assert_eq!(json["authentication_tag"].as_str().unwrap().len(), TAG_LEN * 2);
        assert_eq!(BackupRecord::from_json(&json.to_string()).unwrap(), record);
    }

    #[test]
    fn garbage_json_is_corrupted() {
        assert!(matches!(
            BackupRecord::from_json("{\"version\": 1}"),
            Err(WalletError::CorruptedFile(_))
        ));
        assert!(matches!(
            BackupRecord::from_json("{\"version\":1,\"kdf\":{},\"nonce\":\"zz\"}"),
            Err(WalletError::CorruptedFile(_))
        ));
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.backup.json");
        let record = seal(b"seed words", b"pw");
        record.write_to(&path).unwrap();
        assert!(!path.with_extension("tmp").exists());

        let loaded = BackupRecord::read_from(&path).unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.open(b"pw").unwrap().as_slice(), b"seed words");
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BackupRecord::read_from(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, WalletError::IoError(_)));
    }
}
