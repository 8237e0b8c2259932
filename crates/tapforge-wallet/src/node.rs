//! Async boundary to a Bitcoin node.
//!
//! The wallet never talks to the network itself; callers plug in a
//! [`NodeClient`] (JSON-RPC, Electrum, an indexer). Errors from the backend
//! pass through as opaque strings.

use async_trait::async_trait;
use thiserror::Error;

use tapforge_core::address::Address;
use tapforge_core::fee::FeeRate;
use tapforge_core::types::{Hash256, TxOut, Utxo};

use crate::error::WalletError;

/// Failure reported by a node backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The node validated the transaction and refused it.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Connection, timeout or protocol failure.
    #[error("transport: {0}")]
    Transport(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<NodeError> for WalletError {
    fn from(e: NodeError) -> Self {
        match e {
            NodeError::Rejected(reason) => WalletError::BroadcastRejected(reason),
            other => WalletError::Node(other.to_string()),
        }
    }
}

/// What the wallet needs to know about a broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInfo {
    /// Zero while in the mempool.
    pub confirmations: u32,
    pub outputs: Vec<TxOut>,
}

impl TxInfo {
    pub fn is_confirmed(&self) -> bool {
        self.confirmations > 0
    }
}

#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Unspent outputs paying any of `addresses`.
    async fn list_unspent(&self, addresses: &[Address]) -> Result<Vec<Utxo>, NodeError>;

    /// Fee rate expected to confirm within `blocks` blocks.
    async fn estimate_smart_fee(&self, blocks: u16) -> Result<FeeRate, NodeError>;

    /// Submit a serialized transaction; returns its txid.
    async fn send_raw_transaction(&self, tx_hex: &str) -> Result<Hash256, NodeError>;

    async fn get_raw_transaction(&self, txid: &Hash256) -> Result<TxInfo, NodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_maps_to_broadcast_rejected() {
        let e: WalletError = NodeError::Rejected("min relay fee not met".into()).into();
        assert_eq!(e, WalletError::BroadcastRejected("min relay fee not met".into()));
    }

    #[test]
    fn other_errors_map_to_node() {
        let e: WalletError = NodeError::Transport("connection refused".into()).into();
        assert_eq!(e, WalletError::Node("transport: connection refused".into()));
        let e: WalletError = NodeError::NotFound("tx".into()).into();
        assert!(matches!(e, WalletError::Node(msg) if msg.contains("not found")));
    }

    #[test]
    fn confirmation_state() {
        let info = TxInfo { confirmations: 0, outputs: Vec::new() };
        assert!(!info.is_confirmed());
        assert!(TxInfo { confirmations: 3, ..info }.is_confirmed());
    }
}
