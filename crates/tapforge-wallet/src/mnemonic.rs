//! BIP-39 mnemonic generation, validation and seed derivation.

use bip39::{Language, Mnemonic};
use zeroize::{Zeroize, Zeroizing};

use crate::error::WalletError;
use crate::keys::Seed;

/// Word counts BIP-39 allows.
pub const VALID_WORD_COUNTS: [usize; 5] = [12, 15, 18, 21, 24];

/// Collapse whitespace and lowercase a phrase before parsing.
pub fn normalize(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn map_bip39_error(e: bip39::Error) -> WalletError {
    match e {
        bip39::Error::InvalidChecksum => WalletError::InvalidMnemonicChecksum,
        other => WalletError::InvalidMnemonic(other.to_string()),
    }
}

fn parse(phrase: &str) -> Result<Mnemonic, WalletError> {
    let normalized = Zeroizing::new(normalize(phrase));
    Mnemonic::parse_in(Language::English, normalized.as_str()).map_err(map_bip39_error)
}

/// Generate a fresh English mnemonic with `word_count` words from the OS RNG.
pub fn generate_mnemonic(word_count: usize) -> Result<Zeroizing<String>, WalletError> {
    use rand::RngCore;
    if !VALID_WORD_COUNTS.contains(&word_count) {
        return Err(WalletError::InvalidMnemonic(format!(
            "unsupported word count {word_count}"
        )));
    }
    let mut entropy = Zeroizing::new(vec![0u8; word_count / 3 * 4]);
    rand::rngs::OsRng.fill_bytes(&mut entropy);
    entropy_to_mnemonic(&entropy)
}

/// Encode 16 to 32 bytes of entropy as a mnemonic.
pub fn entropy_to_mnemonic(entropy: &[u8]) -> Result<Zeroizing<String>, WalletError> {
    let m = Mnemonic::from_entropy_in(Language::English, entropy).map_err(map_bip39_error)?;
    Ok(Zeroizing::new(m.to_string()))
}

/// Check words and checksum without deriving a seed.
pub fn validate_mnemonic(phrase: &str) -> Result<(), WalletError> {
    parse(phrase).map(|_| ())
}

/// Recover the entropy encoded by a mnemonic.
pub fn mnemonic_to_entropy(phrase: &str) -> Result<Zeroizing<Vec<u8>>, WalletError> {
    Ok(Zeroizing::new(parse(phrase)?.to_entropy()))
}

/// Derive the 64-byte BIP-39 seed (PBKDF2-HMAC-SHA512, 2048 rounds,
/// salt `"mnemonic" + passphrase`).
///
/// Whitespace and case in `phrase` are normalized before parsing.
pub fn mnemonic_to_seed(phrase: &str, passphrase: &str) -> Result<Seed, WalletError> {
    let m = parse(phrase)?;
    let mut bytes = m.to_seed(passphrase);
    let seed = Seed::from_bytes(&bytes);
    bytes.zeroize();
    seed
}
