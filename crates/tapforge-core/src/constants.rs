//! Protocol constants. All monetary values in satoshis (1 BTC = 10^8 sats).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const COIN: u64 = 100_000_000;

/// Maximum script size for legacy script execution.
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Largest transaction weight relayed by default policy.
pub const MAX_STANDARD_TX_WEIGHT: u64 = 400_000;

/// Witness bytes count once, non-witness bytes four times (BIP141).
pub const WITNESS_SCALE_FACTOR: u64 = 4;

/// Sequence that disables relative locktime and RBF.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// Sequence signalling BIP125 replaceability while keeping locktime enabled.
pub const SEQUENCE_RBF: u32 = 0xffff_fffd;

/// Default dust relay fee in sat/kvB.
pub const DEFAULT_DUST_RELAY_FEE: u64 = 3_000;

/// Default minimum relay fee in sat/kvB.
pub const DEFAULT_MIN_RELAY_FEE: u64 = 1_000;

/// Leaf version for BIP342 Tapscript.
pub const TAPROOT_LEAF_TAPSCRIPT: u8 = 0xc0;

/// Maximum depth of a Taproot script tree.
pub const TAPROOT_CONTROL_MAX_NODE_COUNT: usize = 128;

/// First hardened BIP32 child index.
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

/// Convert a BTC-denominated float to satoshis, rounding to the nearest sat.
///
/// Only for values arriving from RPC boundaries; everything internal is sats.
/// Returns `None` for negative, non-finite, or out-of-range input.
///
/// # Examples
///
/// ```
/// use tapforge_core::constants::{btc_to_sat, COIN};
/// assert_eq!(btc_to_sat(0.001), Some(100_000));
/// assert_eq!(btc_to_sat(21.0), Some(21 * COIN));
/// assert_eq!(btc_to_sat(-1.0), None);
/// ```
pub fn btc_to_sat(btc: f64) -> Option<u64> {
    if !btc.is_finite() || btc < 0.0 {
        return None;
    }
    let sats = (btc * COIN as f64).round();
    if sats > 21_000_000.0 * COIN as f64 {
        return None;
    }
    Some(sats as u64)
}

/// Convert satoshis to BTC for display.
///
/// # Examples
///
/// ```
/// use tapforge_core::constants::sat_to_btc;
/// assert_eq!(sat_to_btc(150_000_000), 1.5);
/// ```
pub fn sat_to_btc(sats: u64) -> f64 {
    sats as f64 / COIN as f64
}

/// Bitcoin network selector.
///
/// # Examples
///
/// ```
/// use tapforge_core::constants::Network;
/// let net = Network::default();
/// assert_eq!(net, Network::Mainnet);
/// assert_eq!(net.hrp(), "bc");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    /// Bech32 human-readable part.
    ///
    /// # Examples
    ///
    /// ```
    /// use tapforge_core::constants::Network;
    /// assert_eq!(Network::Testnet.hrp(), "tb");
    /// assert_eq!(Network::Regtest.hrp(), "bcrt");
    /// ```
    pub fn hrp(&self) -> &'static str {
        match self {
            Self::Mainnet => "bc",
            Self::Testnet => "tb",
            Self::Regtest => "bcrt",
        }
    }

    /// Network for a Bech32 human-readable part.
    pub fn from_hrp(hrp: &str) -> Option<Self> {
        match hrp {
            "bc" => Some(Self::Mainnet),
            "tb" => Some(Self::Testnet),
            "bcrt" => Some(Self::Regtest),
            _ => None,
        }
    }

    /// Base58 version byte for P2PKH addresses.
    ///
    /// # Examples
    ///
    /// ```
    /// use tapforge_core::constants::Network;
    /// assert_eq!(Network::Mainnet.p2pkh_prefix(), 0x00);
    /// assert_eq!(Network::Regtest.p2pkh_prefix(), 0x6f);
    /// ```
    pub fn p2pkh_prefix(&self) -> u8 {
        match self {
            Self::Mainnet => 0x00,
            Self::Testnet | Self::Regtest => 0x6f,
        }
    }

    /// Base58 version byte for P2SH addresses.
    pub fn p2sh_prefix(&self) -> u8 {
        match self {
            Self::Mainnet => 0x05,
            Self::Testnet | Self::Regtest => 0xc4,
        }
    }

    /// BIP32 serialization version for extended private keys.
    pub fn xprv_version(&self) -> [u8; 4] {
        match self {
            Self::Mainnet => [0x04, 0x88, 0xAD, 0xE4],
            Self::Testnet | Self::Regtest => [0x04, 0x35, 0x83, 0x94],
        }
    }

    /// BIP32 serialization version for extended public keys.
    pub fn xpub_version(&self) -> [u8; 4] {
        match self {
            Self::Mainnet => [0x04, 0x88, 0xB2, 0x1E],
            Self::Testnet | Self::Regtest => [0x04, 0x35, 0x87, 0xCF],
        }
    }

    /// SLIP-44 coin type used in BIP44-style paths.
    ///
    /// # Examples
    ///
    /// ```
    /// use tapforge_core::constants::Network;
    /// assert_eq!(Network::Mainnet.coin_type(), 0);
    /// assert_eq!(Network::Testnet.coin_type(), 1);
    /// ```
    pub fn coin_type(&self) -> u32 {
        match self {
            Self::Mainnet => 0,
            Self::Testnet | Self::Regtest => 1,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        })
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" | "bitcoin" => Ok(Self::Mainnet),
            "testnet" | "test" => Ok(Self::Testnet),
            "regtest" => Ok(Self::Regtest),
            other => Err(format!("unknown network: {other}")),
        }
    }
}
