//! Wallet error types.

use tapforge_core::error::{
    AddressError, EncodingError, ScriptError, SighashError, TaprootError, TransactionError,
};
use thiserror::Error;

/// Errors that can occur in wallet operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// BIP32 seeds are 16 to 64 bytes.
    #[error("invalid seed length: {0} bytes")]
    InvalidSeedLength(usize),

    /// Mnemonic words are valid but the checksum does not match.
    #[error("invalid mnemonic checksum")]
    InvalidMnemonicChecksum,

    /// Invalid BIP-39 mnemonic phrase (unknown word, bad word count).
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// Malformed derivation path or exhausted index range.
    #[error("invalid derivation path: {0}")]
    InvalidDerivationPath(String),

    /// Hardened child requested from a public-only parent.
    #[error("cannot derive hardened child from a public key")]
    HardenedFromPublic,

    /// Key derivation failure.
    #[error("key derivation: {0}")]
    KeyDerivation(String),

    #[error("invalid script: {0}")]
    InvalidScript(#[from] ScriptError),

    /// An output pays less than its script's dust threshold.
    #[error("output {index} of {amount} sats is below the dust threshold of {threshold}")]
    DustOutput {
        index: usize,
        amount: u64,
        threshold: u64,
    },

    /// Insufficient funds to cover the transaction amount plus fees.
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds {
        /// Available value in sats.
        have: u64,
        /// Required value in sats.
        need: u64,
    },

    /// No UTXOs available for spending.
    #[error("no UTXOs available")]
    NoUtxos,

    /// Invalid monetary amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Invalid address string or address for another network.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Signing input `index` failed; the whole transaction is discarded.
    #[error("signing input {index} failed: {reason}")]
    SignatureFailure { index: usize, reason: String },

    /// The node refused the transaction.
    #[error("broadcast rejected: {0}")]
    BroadcastRejected(String),

    /// Node client failure other than a rejection.
    #[error("node error: {0}")]
    Node(String),

    /// Transaction build error.
    #[error("build error: {0}")]
    BuildError(String),

    /// Encryption failure.
    #[error("encryption: {0}")]
    Encryption(String),

    /// Decryption failure.
    #[error("decryption: {0}")]
    Decryption(String),

    /// Wrong password for a backup record.
    #[error("invalid password")]
    InvalidPassword,

    /// Backup record is corrupted or has an invalid format.
    #[error("corrupted file: {0}")]
    CorruptedFile(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Serialization error.
    #[error("serialization: {0}")]
    Serialization(String),

    /// Configuration could not be loaded.
    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Taproot(#[from] TaprootError),

    #[error(transparent)]
    Sighash(#[from] SighashError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl From<std::io::Error> for WalletError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<config::ConfigError> for WalletError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_insufficient_funds() {
        let e = WalletError::InsufficientFunds { have: 100, need: 200 };
        assert_eq!(e.to_string(), "insufficient funds: have 100, need 200");
    }

    #[test]
    fn display_dust_output() {
        let e = WalletError::DustOutput { index: 1, amount: 100, threshold: 294 };
        assert_eq!(
            e.to_string(),
            "output 1 of 100 sats is below the dust threshold of 294"
        );
    }

    #[test]
    fn display_signature_failure() {
        let e = WalletError::SignatureFailure { index: 0, reason: "no key".into() };
        assert_eq!(e.to_string(), "signing input 0 failed: no key");
    }

    #[test]
    fn clone_and_eq() {
        let e1 = WalletError::InvalidAmount("zero".into());
        let e2 = e1.clone();
        assert_eq!(e1, e2);
    }

    #[test]
    fn from_script_error() {
        let wallet: WalletError = ScriptError::PushTooLarge(5).into();
        assert_eq!(wallet, WalletError::InvalidScript(ScriptError::PushTooLarge(5)));
    }

    #[test]
    fn from_taproot_error() {
        let wallet: WalletError = TaprootError::LeafNotFound.into();
        assert_eq!(wallet, WalletError::Taproot(TaprootError::LeafNotFound));
    }

    #[test]
    fn from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let wallet: WalletError = io.into();
        assert!(matches!(wallet, WalletError::IoError(msg) if msg.contains("gone")));
    }
}
