//! Wallet configuration.
//!
//! [`WalletConfig`] has usable defaults for every field. [`WalletConfig::load`]
//! layers an optional TOML file and `TAPFORGE__*` environment variables on
//! top of them, e.g. `TAPFORGE__NETWORK=testnet`.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

use tapforge_core::constants::{Network, DEFAULT_DUST_RELAY_FEE};
use tapforge_core::fee::FeeRate;

use crate::coin_selection::SelectionStrategy;
use crate::error::WalletError;
use crate::hd::Purpose;

pub const ENV_PREFIX: &str = "TAPFORGE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub network: Network,
    /// BIP44 account index.
    pub account: u32,
    /// Script type for new receive and change addresses.
    pub default_purpose: Purpose,
    pub coin_selection: SelectionStrategy,
    /// Confirmation target passed to the node's fee estimator.
    pub fee_target_blocks: u16,
    /// Used when the node has no estimate (sat/vB).
    pub fallback_sat_per_vb: u64,
    /// Dust relay fee (sat/kvB).
    pub dust_relay_fee: u64,
    /// Signal BIP125 replaceability on new transactions.
    pub enable_rbf: bool,
    /// Unused addresses to watch past the last used one when syncing.
    pub gap_limit: u32,
    pub backup_path: Option<PathBuf>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            account: 0,
            default_purpose: Purpose::Bip84,
            coin_selection: SelectionStrategy::BranchAndBound,
            fee_target_blocks: 6,
            fallback_sat_per_vb: 2,
            dust_relay_fee: DEFAULT_DUST_RELAY_FEE,
            enable_rbf: true,
            gap_limit: 20,
            backup_path: None,
        }
    }
}

impl WalletConfig {
    /// `<config dir>/tapforge/wallet.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tapforge")
            .join("wallet.toml")
    }

    /// Load from `path` (missing file is fine) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, WalletError> {
        Self::load_from(path, Environment::with_prefix(ENV_PREFIX))
    }

    fn load_from(path: Option<&Path>, env: Environment) -> Result<Self, WalletError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        debug!(path = %path.display(), "loading wallet config");
        let settings = Config::builder()
            .add_source(File::from(path.as_path()).required(false))
            .add_source(env.separator("__").try_parsing(true))
            .build()?;
        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        if self.fee_target_blocks == 0 {
            return Err(WalletError::Config("fee_target_blocks must be at least 1".into()));
        }
        if self.gap_limit == 0 {
            return Err(WalletError::Config("gap_limit must be at least 1".into()));
        }
        if self.account >= 1 << 31 {
            return Err(WalletError::Config(format!("account {} is out of range", self.account)));
        }
        Ok(())
    }

    pub fn fallback_fee_rate(&self) -> FeeRate {
        FeeRate::from_sat_per_vb(self.fallback_sat_per_vb)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Environment::with_prefix(ENV_PREFIX).source(Some(map))
    }

    #[test]
    fn defaults() {
        let cfg = WalletConfig::default();
        assert_eq!(cfg.network, Network::Mainnet);
        assert_eq!(cfg.default_purpose, Purpose::Bip84);
        assert_eq!(cfg.coin_selection, SelectionStrategy::BranchAndBound);
        assert_eq!(cfg.fallback_fee_rate(), FeeRate::from_sat_per_vb(2));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn default_path_ends_with_wallet_toml() {
        assert!(WalletConfig::default_path().ends_with("tapforge/wallet.toml"));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = WalletConfig::load_from(Some(&dir.path().join("absent.toml")), env(&[])).unwrap();
        assert_eq!(cfg, WalletConfig::default());
    }

    #[test]
    fn file_then_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.toml");
        std::fs::write(
            &path,
            "network = \"testnet\"\naccount = 3\ndefault_purpose = \"bip86\"\ngap_limit = 50\n",
        )
        .unwrap();

        let cfg = WalletConfig::load_from(
            Some(&path),
            env(&[("TAPFORGE__GAP_LIMIT", "7"), ("TAPFORGE__ENABLE_RBF", "false")]),
        )
        .unwrap();
        assert_eq!(cfg.network, Network::Testnet);
        assert_eq!(cfg.account, 3);
        assert_eq!(cfg.default_purpose, Purpose::Bip86);
        assert_eq!(cfg.gap_limit, 7);
        assert!(!cfg.enable_rbf);
        assert_eq!(cfg.fee_target_blocks, 6);
    }

    #[test]
    fn invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.toml");
        std::fs::write(&path, "fee_target_blocks = 0\n").unwrap();
        assert!(matches!(
            WalletConfig::load_from(Some(&path), env(&[])),
            Err(WalletError::Config(_))
        ));

        std::fs::write(&path, "network = \"moon\"\n").unwrap();
        assert!(matches!(
            WalletConfig::load_from(Some(&path), env(&[])),
            Err(WalletError::Config(_))
        ));
    }
}
