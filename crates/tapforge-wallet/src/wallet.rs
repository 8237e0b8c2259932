//! Wallet composition: key tree, UTXO tracking, transaction creation.
//!
//! The [`Wallet`] ties together HD derivation, coin selection, building,
//! signing and encrypted backups. Chain access goes through a
//! [`NodeClient`]; everything else is synchronous and offline.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use tapforge_core::address::{Address, Network};
use tapforge_core::constants::sat_to_btc;
use tapforge_core::fee::FeeRate;
use tapforge_core::script::{Script, ScriptType};
use tapforge_core::types::{Hash256, OutPoint, Utxo};

use crate::builder::{SpendInfo, TransactionBuilder};
use crate::config::WalletConfig;
use crate::encryption::{BackupRecord, KdfParams};
use crate::error::WalletError;
use crate::hd::{ExtendedKey, HdKeyTree, Purpose};
use crate::mnemonic::generate_mnemonic;
use crate::node::NodeClient;
use crate::signer::{SignedTransaction, Signer};

/// Words in a freshly generated mnemonic.
pub const DEFAULT_WORD_COUNT: usize = 12;

/// One payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub address: Address,
    pub amount: u64,
}

impl Recipient {
    pub fn new(address: Address, amount: u64) -> Self {
        Self { address, amount }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalletBalance {
    /// Total value in sats.
    pub total: u64,
    pub utxo_count: usize,
}

impl WalletBalance {
    /// Display helper.
    pub fn btc(&self) -> f64 {
        sat_to_btc(self.total)
    }
}

/// Plaintext inside a backup record.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct BackupPayload {
    master_xprv: String,
    account: u32,
    #[zeroize(skip)]
    indices: Vec<IndexState>,
}

#[derive(Serialize, Deserialize)]
struct IndexState {
    purpose: Purpose,
    receive: u32,
    change: u32,
}

/// HD wallet over a single account.
pub struct Wallet {
    tree: HdKeyTree,
    config: WalletConfig,
    utxos: BTreeMap<OutPoint, Utxo>,
    signer: Signer,
}

impl Wallet {
    pub fn new(tree: HdKeyTree, config: WalletConfig) -> Self {
        Self { tree, config, utxos: BTreeMap::new(), signer: Signer::new() }
    }

    /// Create a wallet from a fresh mnemonic. The phrase is returned once
    /// for the user to write down.
    pub fn create(config: WalletConfig) -> Result<(Self, Zeroizing<String>), WalletError> {
        let phrase = generate_mnemonic(DEFAULT_WORD_COUNT)?;
        let wallet = Self::from_mnemonic(&phrase, "", config)?;
        info!(fingerprint = %hex::encode(wallet.tree.master_fingerprint()), "created wallet");
        Ok((wallet, phrase))
    }

    pub fn from_mnemonic(
        phrase: &str,
        passphrase: &str,
        config: WalletConfig,
    ) -> Result<Self, WalletError> {
        config.validate()?;
        let tree = HdKeyTree::from_mnemonic(phrase, passphrase, config.network, config.account)?;
        Ok(Self::new(tree, config))
    }

    /// Use a specific signer, e.g. [`Signer::deterministic`] in tests.
    pub fn with_signer(mut self, signer: Signer) -> Self {
        self.signer = signer;
        self
    }

    pub fn network(&self) -> Network {
        self.tree.network()
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn tree(&self) -> &HdKeyTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut HdKeyTree {
        &mut self.tree
    }

    pub fn receive_address(&mut self) -> Result<Address, WalletError> {
        self.tree.next_address(self.config.default_purpose)
    }

    pub fn change_address(&mut self) -> Result<Address, WalletError> {
        self.tree.next_change_address(self.config.default_purpose)
    }

    /// Track an output. Returns `false` for outputs the wallet cannot spend.
    pub fn add_utxo(&mut self, utxo: Utxo) -> bool {
        if !self.tree.is_mine(&utxo.script_pubkey) {
            return false;
        }
        self.utxos.insert(utxo.outpoint, utxo);
        true
    }

    /// Replace the tracked set with the owned subset of `utxos`.
    pub fn set_utxos(&mut self, utxos: impl IntoIterator<Item = Utxo>) {
        self.utxos.clear();
        for utxo in utxos {
            self.add_utxo(utxo);
        }
    }

    pub fn utxos(&self) -> impl Iterator<Item = &Utxo> {
        self.utxos.values()
    }

    pub fn balance(&self) -> WalletBalance {
        WalletBalance {
            total: self.utxos.values().map(|u| u.value).sum(),
            utxo_count: self.utxos.len(),
        }
    }

    fn spend_info_for(&self, utxo: &Utxo) -> Result<SpendInfo, WalletError> {
        let spk = &utxo.script_pubkey;
        let mut info = SpendInfo::default();
        if spk.script_type() == ScriptType::P2sh {
            let key = self.tree.key_for_script(spk)?;
            info = SpendInfo::p2sh(Script::p2wpkh_from_key(&key.public_key()));
        }
        if let Some(path) = self.tree.path_for_script(spk) {
            info = info.with_derivation_path(path);
        }
        Ok(info)
    }

    /// Select coins, build and sign a transaction paying `recipients`.
    ///
    /// The transaction is not broadcast and the UTXO set is unchanged. The
    /// change index only advances when a change output was created.
    pub fn create_transaction(
        &mut self,
        recipients: &[Recipient],
        fee_rate: FeeRate,
    ) -> Result<SignedTransaction, WalletError> {
        if recipients.is_empty() {
            return Err(WalletError::BuildError("no recipients".into()));
        }
        if self.utxos.is_empty() {
            return Err(WalletError::NoUtxos);
        }

        let purpose = self.config.default_purpose;
        let change_index = self.tree.next_index(purpose, true);
        let change = self.tree.address_at(purpose, true, change_index)?;
        let candidates = self
            .utxos
            .values()
            .map(|u| Ok((u.clone(), self.spend_info_for(u)?)))
            .collect::<Result<Vec<_>, WalletError>>()?;

        let mut builder = TransactionBuilder::new(self.network());
        for r in recipients {
            builder.add_output(&r.address, r.amount);
        }
        builder
            .set_change(&change)
            .estimate_fee(fee_rate)
            .dust_relay_fee(self.config.dust_relay_fee);
        if self.config.enable_rbf {
            builder.enable_rbf();
        }
        builder.fund_with(&candidates, self.config.coin_selection)?;
        let partial = builder.build()?;
        let used_change = partial.change_index().is_some();

        let signed = self.signer.sign(partial, &self.tree)?;
        if used_change {
            self.tree.mark_used(purpose, true, change_index);
        }
        info!(
            txid = %signed.txid(),
            fee = signed.fee(),
            vsize = signed.vsize(),
            "created transaction"
        );
        Ok(signed)
    }

    /// Forget spent inputs and start tracking our own outputs of `tx`.
    pub fn apply_transaction(&mut self, signed: &SignedTransaction) {
        let tx = signed.transaction();
        for input in &tx.inputs {
            self.utxos.remove(&input.previous_output);
        }
        let txid = signed.txid();
        for (vout, output) in tx.outputs.iter().enumerate() {
            if output.value > 0 && self.tree.is_mine(&output.script_pubkey) {
                let utxo = Utxo {
                    outpoint: OutPoint::new(txid, vout as u32),
                    value: output.value,
                    script_pubkey: output.script_pubkey.clone(),
                };
                self.utxos.insert(utxo.outpoint, utxo);
            }
        }
    }

    /// Scan receive and change chains up to the gap limit and replace the
    /// tracked UTXOs with what the node reports. Returns the UTXO count.
    pub async fn sync(&mut self, node: &dyn NodeClient) -> Result<usize, WalletError> {
        let purpose = self.config.default_purpose;
        let gap = self.config.gap_limit;
        let mut found = Vec::new();

        for change in [false, true] {
            let mut start = 0u32;
            let mut last_used: Option<u32> = None;
            loop {
                let used_end = last_used.map_or(0, |i| i + 1);
                let end = used_end.max(self.tree.next_index(purpose, change)).saturating_add(gap);
                if start >= end {
                    break;
                }
                let mut batch = Vec::with_capacity((end - start) as usize);
                let mut index_of = BTreeMap::new();
                for index in start..end {
                    let address = self.tree.address_at(purpose, change, index)?;
                    index_of.insert(address.script_pubkey(), index);
                    batch.push(address);
                }
                for utxo in node.list_unspent(&batch).await? {
                    if let Some(&index) = index_of.get(&utxo.script_pubkey) {
                        last_used = Some(last_used.map_or(index, |l| l.max(index)));
                        found.push(utxo);
                    }
                }
                start = end;
            }
            if let Some(index) = last_used {
                self.tree.mark_used(purpose, change, index);
            }
        }

        self.set_utxos(found);
        let balance = self.balance();
        info!(utxos = balance.utxo_count, total = balance.total, "synced wallet");
        Ok(balance.utxo_count)
    }

    /// The node's fee estimate, or the configured fallback when it has none.
    /// Never below the minimum relay fee.
    pub async fn estimate_fee_rate(&self, node: &dyn NodeClient) -> FeeRate {
        match node.estimate_smart_fee(self.config.fee_target_blocks).await {
            Ok(rate) => rate.max(FeeRate::MIN_RELAY),
            Err(e) => {
                let fallback = self.config.fallback_fee_rate().max(FeeRate::MIN_RELAY);
                warn!(error = %e, %fallback, "fee estimate unavailable, using fallback");
                fallback
            }
        }
    }

    /// Create, sign and broadcast a payment.
    pub async fn send(
        &mut self,
        node: &dyn NodeClient,
        recipients: &[Recipient],
    ) -> Result<Hash256, WalletError> {
        let rate = self.estimate_fee_rate(node).await;
        let signed = self.create_transaction(recipients, rate)?;
        let txid = signed.txid();
        let reported = node.send_raw_transaction(&signed.to_hex()).await?;
        if reported != txid {
            warn!(%txid, %reported, "node reported a different txid");
        }
        self.apply_transaction(&signed);
        info!(%txid, "broadcast transaction");
        Ok(txid)
    }

    /// Encrypt the master key and address indices under `password`.
    pub fn backup(&self, password: &[u8]) -> Result<BackupRecord, WalletError> {
        self.backup_with_params(password, KdfParams::default())
    }

    pub fn backup_with_params(
        &self,
        password: &[u8],
        kdf: KdfParams,
    ) -> Result<BackupRecord, WalletError> {
        let xprv = self.tree.master().to_xprv()?;
        let payload = BackupPayload {
            master_xprv: xprv.as_str().to_owned(),
            account: self.tree.account(),
            indices: Purpose::ALL
                .iter()
                .map(|&purpose| IndexState {
                    purpose,
                    receive: self.tree.next_index(purpose, false),
                    change: self.tree.next_index(purpose, true),
                })
                .filter(|s| s.receive > 0 || s.change > 0)
                .collect(),
        };
        let plaintext = Zeroizing::new(serde_json::to_vec(&payload)?);
        let record = BackupRecord::seal_with_params(&plaintext, password, kdf)?;
        debug!(account = payload.account, "wallet backup sealed");
        Ok(record)
    }

    /// Rebuild a wallet from a backup. The network comes from the key.
    pub fn restore(
        record: &BackupRecord,
        password: &[u8],
        mut config: WalletConfig,
    ) -> Result<Self, WalletError> {
        let plaintext = record.open(password)?;
        let payload: BackupPayload = serde_json::from_slice(&plaintext)
            .map_err(|e| WalletError::CorruptedFile(format!("backup payload: {e}")))?;
        let master: ExtendedKey = payload.master_xprv.parse()?;
        if !master.is_private() {
            return Err(WalletError::CorruptedFile("backup holds a public key".into()));
        }
        if master.network() != config.network {
            warn!(
                configured = %config.network,
                backup = %master.network(),
                "backup network overrides config"
            );
            config.network = master.network();
        }
        config.account = payload.account;

        let mut tree = HdKeyTree::new(master, payload.account);
        for state in &payload.indices {
            tree.restore_indices(state.purpose, state.receive, state.change)?;
        }
        info!(fingerprint = %hex::encode(tree.master_fingerprint()), "restored wallet");
        Ok(Self::new(tree, config))
    }

    /// Write an encrypted backup to `path`.
    pub fn backup_to(&self, path: &Path, password: &[u8]) -> Result<(), WalletError> {
        self.backup(password)?.write_to(path)
    }

    pub fn restore_from(
        path: &Path,
        password: &[u8],
        config: WalletConfig,
    ) -> Result<Self, WalletError> {
        Self::restore(&BackupRecord::read_from(path)?, password, config)
    }
}
