//! Sign-request/sign-response boundary for keys held outside the process
//! (hardware wallets, remote signers).

use serde::{Deserialize, Serialize};

use tapforge_core::script::Script;
use tapforge_core::types::Hash256;

use crate::hd::DerivationPath;

/// Which signature algorithm the digest is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
    /// DER-encoded, low-S.
    Ecdsa,
    /// BIP340 with the untweaked key (Tapscript leaf).
    Schnorr,
    /// BIP340 with the key tweaked into a Taproot output key by
    /// `tap_merkle_root` (BIP341 key path).
    TaprootKeySpend,
}

/// One digest to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    pub input_index: usize,
    pub sighash: Hash256,
    pub kind: SignatureKind,
    /// Script tree root committed to by the output, for key-path spends.
    pub tap_merkle_root: Option<Hash256>,
    /// Hint for where the device finds the key.
    pub derivation_path: Option<DerivationPath>,
    pub script_pubkey: Script,
    pub amount: u64,
}

/// The device's answer.
///
/// `signature` is DER without the sighash byte for ECDSA, or the 64-byte
/// Schnorr signature. `public_key` is the 33-byte compressed key for ECDSA
/// and the 32-byte x-only untweaked key for Schnorr.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResponse {
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub public_key: Vec<u8>,
}

/// A signer that never exposes its secrets.
///
/// Errors are opaque strings; the signer reports them as a
/// `SignatureFailure` for the input concerned.
pub trait ExternalSigner: Send + Sync {
    fn sign(&self, request: &SignRequest) -> Result<SignResponse, String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_json_shape() {
        let req = SignRequest {
            input_index: 2,
            sighash: Hash256([0xab; 32]),
            kind: SignatureKind::TaprootKeySpend,
            tap_merkle_root: None,
            derivation_path: Some("m/86'/0'/0'/0/1".parse().unwrap()),
            script_pubkey: Script::p2tr(&[1; 32]),
            amount: 5_000,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["kind"], "taproot_key_spend");
        assert_eq!(json["derivation_path"], "m/86'/0'/0'/0/1");
        let back: SignRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn response_hex_fields() {
        let resp = SignResponse { signature: vec![0x30, 0x44], public_key: vec![0x02; 33] };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"3044\""));
        assert_eq!(serde_json::from_str::<SignResponse>(&json).unwrap(), resp);
    }
}
