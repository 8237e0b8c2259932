//! Fee-aware coin selection.
//!
//! Every candidate is valued at its *effective* amount: face value minus
//! the fee its own input adds at the target fee rate. Candidates that
//! cannot pay for themselves are never selected.
//!
//! Two strategies are offered. `LargestFirst` greedily adds the biggest
//! coins until the target and fee are covered. `BranchAndBound` runs a
//! bounded depth-first search for a changeless input set whose excess over
//! the target is smaller than the cost of creating and later spending a
//! change output, and falls back to `LargestFirst` when none exists.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use tapforge_core::constants::DEFAULT_DUST_RELAY_FEE;
use tapforge_core::fee::{
    FeeRate, dust_threshold, input_weight, output_weight, spends_with_witness, tx_overhead_weight,
};
use tapforge_core::script::Script;
use tapforge_core::types::{OutPoint, TxOut, Utxo};

use crate::error::WalletError;

/// Depth-first search budget for branch and bound.
pub const BNB_TOTAL_TRIES: usize = 100_000;

/// Segwit marker and flag bytes, in weight units.
const SEGWIT_MARKER_WEIGHT: u64 = 2;

/// How to pick coins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Biggest coins first until the target is met.
    LargestFirst,
    /// Search for a changeless match, then fall back to largest-first.
    #[default]
    BranchAndBound,
}

/// Fee and change parameters for one selection.
#[derive(Debug, Clone)]
pub struct SelectionParams {
    pub fee_rate: FeeRate,
    /// Script a change output would pay to.
    pub change_script: Script,
    /// Dust relay fee in sat/kvB, used for the change threshold.
    pub dust_relay_fee: u64,
    /// Weight of the transaction without any inputs or change: version,
    /// locktime, counts and recipient outputs.
    pub base_weight: u64,
    /// Input weights for outputs whose spend shape is not the default for
    /// their script type (e.g. multisig P2WSH).
    pub input_weights: BTreeMap<OutPoint, u64>,
    /// Whether change below the dust threshold may be paid as fee. When
    /// off, only selections leaving no change or a spendable one qualify.
    pub fold_dust_change: bool,
}

impl SelectionParams {
    pub fn new(fee_rate: FeeRate, change_script: Script) -> Self {
        Self {
            fee_rate,
            change_script,
            dust_relay_fee: DEFAULT_DUST_RELAY_FEE,
            base_weight: tx_overhead_weight(1, 1, false),
            input_weights: BTreeMap::new(),
            fold_dust_change: true,
        }
    }

    /// Base weight for a transaction paying `outputs` plus a possible change output.
    pub fn with_outputs(mut self, outputs: &[TxOut]) -> Self {
        self.base_weight = tx_overhead_weight(1, outputs.len() + 1, false)
            + outputs.iter().map(|o| output_weight(&o.script_pubkey)).sum::<u64>();
        self
    }

    pub fn with_base_weight(mut self, weight: u64) -> Self {
        self.base_weight = weight;
        self
    }

    pub fn with_dust_relay_fee(mut self, sat_per_kvb: u64) -> Self {
        self.dust_relay_fee = sat_per_kvb;
        self
    }

    pub fn with_input_weight(mut self, outpoint: OutPoint, weight: u64) -> Self {
        self.input_weights.insert(outpoint, weight);
        self
    }

    /// Reject selections whose leftover would be dust instead of folding
    /// it into the fee. Used with fixed fees.
    pub fn without_dust_folding(mut self) -> Self {
        self.fold_dust_change = false;
        self
    }

    fn change_dust(&self) -> u64 {
        dust_threshold(&self.change_script, self.dust_relay_fee)
    }

    fn change_output_weight(&self) -> u64 {
        output_weight(&self.change_script)
    }

    /// Fee of adding a change output now and spending it later.
    fn cost_of_change(&self) -> u64 {
        let spend = input_weight(self.change_script.script_type()).unwrap_or(0);
        self.fee_rate.fee_for_weight(self.change_output_weight())
            + self.fee_rate.fee_for_weight(spend)
    }
}

/// Outcome of a successful selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinSelection {
    /// Chosen coins, in selection order.
    pub selected: Vec<Utxo>,
    /// Sum of the chosen coins' values.
    pub total: u64,
    /// Fee paid; includes any change dropped as dust.
    pub fee: u64,
    /// Change value, when a change output is worth creating.
    pub change: Option<u64>,
    /// Estimated weight of the final transaction.
    pub weight: u64,
    /// Strategy that produced the result (after any fallback).
    pub strategy: SelectionStrategy,
}

impl CoinSelection {
    /// `total == target + fee + change` for the target this came from.
    pub fn spent(&self) -> u64 {
        self.fee + self.change.unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    utxo: Utxo,
    weight: u64,
    effective: u64,
    witness: bool,
}

/// Stateless coin selector.
pub struct CoinSelector;

impl CoinSelector {
    /// Choose coins from `utxos` to pay `target` plus fees.
    pub fn select(
        utxos: &[Utxo],
        target: u64,
        params: &SelectionParams,
        strategy: SelectionStrategy,
    ) -> Result<CoinSelection, WalletError> {
        if target == 0 {
            return Err(WalletError::InvalidAmount("target must be non-zero".into()));
        }
        if utxos.is_empty() {
            return Err(WalletError::NoUtxos);
        }

        let candidates = Self::candidates(utxos, params);
        if candidates.is_empty() {
            return Err(WalletError::InsufficientFunds {
                have: 0,
                need: target.saturating_add(params.fee_rate.fee_for_weight(params.base_weight)),
            });
        }

        let result = match strategy {
            SelectionStrategy::LargestFirst => Self::largest_first(&candidates, target, params),
            SelectionStrategy::BranchAndBound => match Self::branch_and_bound(&candidates, target, params) {
                Some(found) => Ok(found),
                None => {
                    debug!(target, "no changeless match, falling back to largest-first");
                    Self::largest_first(&candidates, target, params)
                }
            },
        }?;

        info!(
            inputs = result.selected.len(),
            total = result.total,
            fee = result.fee,
            change = result.change.unwrap_or(0),
            strategy = ?result.strategy,
            "coins selected"
        );
        Ok(result)
    }

    /// Spendable candidates ordered by value descending, then outpoint.
    fn candidates(utxos: &[Utxo], params: &SelectionParams) -> Vec<Candidate> {
        let mut out: Vec<Candidate> = utxos
            .iter()
            .filter_map(|utxo| {
                let script_type = utxo.script_pubkey.script_type();
                let weight = params
                    .input_weights
                    .get(&utxo.outpoint)
                    .copied()
                    .or_else(|| input_weight(script_type))?;
                let fee = params.fee_rate.fee_for_weight(weight);
                if utxo.value <= fee {
                    debug!(outpoint = %utxo.outpoint, value = utxo.value, fee, "skipping uneconomic coin");
                    return None;
                }
                Some(Candidate {
                    utxo: utxo.clone(),
                    weight,
                    effective: utxo.value - fee,
                    witness: spends_with_witness(script_type),
                })
            })
            .collect();
        out.sort_by(|a, b| {
            b.utxo
                .value
                .cmp(&a.utxo.value)
                .then_with(|| a.utxo.outpoint.cmp(&b.utxo.outpoint))
        });
        out
    }

    fn input_set_weight(chosen: &[&Candidate], params: &SelectionParams) -> u64 {
        let inputs: u64 = chosen.iter().map(|c| c.weight).sum();
        let marker = if chosen.iter().any(|c| c.witness) { SEGWIT_MARKER_WEIGHT } else { 0 };
        params.base_weight + inputs + marker
    }

    /// Price `chosen` exactly; `None` when it does not cover the target.
    fn finalize(
        chosen: &[&Candidate],
        target: u64,
        params: &SelectionParams,
        strategy: SelectionStrategy,
    ) -> Option<CoinSelection> {
        let total = chosen.iter().fold(0u64, |acc, c| acc.saturating_add(c.utxo.value));
        let weight = Self::input_set_weight(chosen, params);
        let fee_without_change = params.fee_rate.fee_for_weight(weight);
        let excess = total.checked_sub(target)?.checked_sub(fee_without_change)?;

        let weight_with_change = weight + params.change_output_weight();
        let fee_with_change = params.fee_rate.fee_for_weight(weight_with_change);
        let change = (total - target).saturating_sub(fee_with_change);
        let selected = chosen.iter().map(|c| c.utxo.clone()).collect();

        if fee_with_change <= total - target && change >= params.change_dust() && change > 0 {
            Some(CoinSelection {
                selected,
                total,
                fee: fee_with_change,
                change: Some(change),
                weight: weight_with_change,
                strategy,
            })
        } else {
            if excess > 0 && !params.fold_dust_change {
                return None;
            }
            if excess > 0 {
                debug!(excess, "change below dust threshold, added to fee");
            }
            Some(CoinSelection {
                selected,
                total,
                fee: total - target,
                change: None,
                weight,
                strategy,
            })
        }
    }

    fn largest_first(
        candidates: &[Candidate],
        target: u64,
        params: &SelectionParams,
    ) -> Result<CoinSelection, WalletError> {
        let mut chosen: Vec<&Candidate> = Vec::new();
        for candidate in candidates {
            chosen.push(candidate);
            if let Some(found) = Self::finalize(&chosen, target, params, SelectionStrategy::LargestFirst) {
                return Ok(found);
            }
        }
        let have = chosen.iter().fold(0u64, |acc, c| acc.saturating_add(c.utxo.value));
        let mut need = target.saturating_add(
            params.fee_rate.fee_for_weight(Self::input_set_weight(&chosen, params)),
        );
        if !params.fold_dust_change && have > need {
            // Enough to pay, not enough for a spendable change output.
            need = need.saturating_add(params.change_dust());
        }
        Err(WalletError::InsufficientFunds { have, need })
    }

    /// Depth-first search over include/exclude decisions, largest effective
    /// value first. A match has effective value in
    /// `[target + base fee, target + base fee + cost_of_change]`; the one
    /// with the least excess wins.
    fn branch_and_bound(
        candidates: &[Candidate],
        target: u64,
        params: &SelectionParams,
    ) -> Option<CoinSelection> {
        let mut pool: Vec<&Candidate> = candidates.iter().collect();
        pool.sort_by(|a, b| {
            b.effective
                .cmp(&a.effective)
                .then_with(|| a.utxo.outpoint.cmp(&b.utxo.outpoint))
        });

        // The marker is always counted; at worst this overpays half a vbyte.
        let base_fee = params.fee_rate.fee_for_weight(params.base_weight + SEGWIT_MARKER_WEIGHT);
        let selection_target = target.checked_add(base_fee)?;
        let upper = selection_target.saturating_add(params.cost_of_change());

        let mut available: u64 = pool.iter().map(|c| c.effective).sum();
        if available < selection_target {
            return None;
        }

        let mut current: Vec<usize> = Vec::new();
        let mut value: u64 = 0;
        let mut best: Option<(Vec<usize>, u64)> = None;
        let mut index = 0usize;

        for _ in 0..BNB_TOTAL_TRIES {
            let mut backtrack = false;
            if value + available < selection_target || value > upper {
                backtrack = true;
            } else if value >= selection_target {
                let waste = value - selection_target;
                if best.as_ref().is_none_or(|(_, w)| waste <= *w) {
                    best = Some((current.clone(), waste));
                }
                backtrack = true;
            }

            if backtrack {
                let Some(&last) = current.last() else {
                    break;
                };
                // Coins skipped after `last` become available again.
                index -= 1;
                while index > last {
                    available += pool[index].effective;
                    index -= 1;
                }
                value -= pool[last].effective;
                current.pop();
            } else {
                let c = pool[index];
                available -= c.effective;
                // Skip a coin equivalent to an excluded predecessor.
                let equivalent_excluded = index > 0
                    && current.last() != Some(&(index - 1))
                    && pool[index - 1].effective == c.effective
                    && pool[index - 1].weight == c.weight;
                if !equivalent_excluded {
                    current.push(index);
                    value += c.effective;
                }
            }
            index += 1;
        }

        let (indices, waste) = best?;
        debug!(inputs = indices.len(), waste, "branch and bound found changeless match");
        let chosen: Vec<&Candidate> = indices.iter().map(|&i| pool[i]).collect();
        let mut found = Self::finalize(&chosen, target, params, SelectionStrategy::BranchAndBound)?;
        // Changeless by construction: any excess is below the cost of change.
        if let Some(change) = found.change.take() {
            found.fee += change;
            found.weight -= params.change_output_weight();
        }
        Some(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tapforge_core::types::Hash256;

    fn utxo(n: u8, value: u64) -> Utxo {
        Utxo::new(OutPoint::new(Hash256([n; 32]), 0), value, Script::p2wpkh(&[n; 20])).unwrap()
    }

    fn params(rate: u64) -> SelectionParams {
        SelectionParams::new(FeeRate::from_sat_per_vb(rate), Script::p2wpkh(&[0xcc; 20]))
            .with_outputs(&[TxOut { value: 0, script_pubkey: Script::p2wpkh(&[0xdd; 20]) }])
    }

    #[test]
    fn zero_target_rejected() {
        let err = CoinSelector::select(&[utxo(1, 10_000)], 0, &params(1), SelectionStrategy::LargestFirst);
        assert!(matches!(err, Err(WalletError::InvalidAmount(_))));
    }

    #[test]
    fn empty_pool_rejected() {
        let err = CoinSelector::select(&[], 1_000, &params(1), SelectionStrategy::LargestFirst);
        assert_eq!(err.unwrap_err(), WalletError::NoUtxos);
    }

    #[test]
    fn largest_first_takes_biggest() {
        let pool = [utxo(1, 10_000), utxo(2, 50_000), utxo(3, 20_000)];
        let sel = CoinSelector::select(&pool, 30_000, &params(1), SelectionStrategy::LargestFirst).unwrap();
        assert_eq!(sel.selected.len(), 1);
        assert_eq!(sel.selected[0].value, 50_000);
        assert_eq!(sel.total, 30_000 + sel.spent());
        assert!(sel.change.is_some());
    }

    #[test]
    fn dust_change_folded_unless_disabled() {
        let zero = SelectionParams::new(FeeRate::ZERO, Script::p2wpkh(&[0xcc; 20]));
        let folded = CoinSelector::select(&[utxo(1, 10_600)], 10_500, &zero, SelectionStrategy::LargestFirst).unwrap();
        assert_eq!(folded.change, None);
        assert_eq!(folded.fee, 100);

        let strict = zero.without_dust_folding();
        assert_eq!(
            CoinSelector::select(&[utxo(1, 10_600)], 10_500, &strict, SelectionStrategy::LargestFirst).unwrap_err(),
            WalletError::InsufficientFunds { have: 10_600, need: 10_794 }
        );
        let sel = CoinSelector::select(
            &[utxo(1, 10_600), utxo(2, 5_000)],
            10_500,
            &strict,
            SelectionStrategy::LargestFirst,
        )
        .unwrap();
        assert_eq!(sel.selected.len(), 2);
        assert_eq!(sel.change, Some(5_100));
        assert_eq!(sel.fee, 0);
    }

    #[test]
    fn fee_grows_with_inputs() {
        let pool = [utxo(1, 20_000), utxo(2, 20_000), utxo(3, 20_000)];
        let one = CoinSelector::select(&pool, 10_000, &params(2), SelectionStrategy::LargestFirst).unwrap();
        let two = CoinSelector::select(&pool, 30_000, &params(2), SelectionStrategy::LargestFirst).unwrap();
        assert_eq!(one.selected.len(), 1);
        assert_eq!(two.selected.len(), 2);
        assert!(two.fee > one.fee);
        // 68 vB per P2WPKH input at 2 sat/vB.
        assert_eq!(two.fee - one.fee, 136);
    }

    #[test]
    fn dust_change_goes_to_fee() {
        let p = params(1);
        let pool = [utxo(1, 10_200)];
        let sel = CoinSelector::select(&pool, 10_000, &p, SelectionStrategy::LargestFirst).unwrap();
        assert_eq!(sel.change, None);
        assert_eq!(sel.fee, 200);
    }

    #[test]
    fn insufficient_funds_reports_have_and_need() {
        let pool = [utxo(1, 5_000), utxo(2, 4_000)];
        match CoinSelector::select(&pool, 20_000, &params(1), SelectionStrategy::LargestFirst) {
            Err(WalletError::InsufficientFunds { have, need }) => {
                assert_eq!(have, 9_000);
                assert!(need > 20_000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn uneconomic_coins_skipped() {
        // 68 vB at 10 sat/vB is 680 sats.
        let pool = [utxo(1, 600), utxo(2, 50_000)];
        let sel = CoinSelector::select(&pool, 40_000, &params(10), SelectionStrategy::LargestFirst).unwrap();
        assert!(sel.selected.iter().all(|u| u.value != 600));

        let only_dust = [utxo(1, 600)];
        assert!(matches!(
            CoinSelector::select(&only_dust, 100, &params(10), SelectionStrategy::LargestFirst),
            Err(WalletError::InsufficientFunds { have: 0, .. })
        ));
    }

    #[test]
    fn branch_and_bound_finds_exact_match() {
        let p = params(1);
        // Effective value of a P2WPKH coin at 1 sat/vB is value - 68.
        let base_fee = p.fee_rate.fee_for_weight(p.base_weight + 2);
        let target = 30_000;
        let exact = target + base_fee + 68;
        let pool = [utxo(1, 100_000), utxo(2, exact), utxo(3, 45_000), utxo(4, 12_000)];
        let sel = CoinSelector::select(&pool, target, &p, SelectionStrategy::BranchAndBound).unwrap();
        assert_eq!(sel.strategy, SelectionStrategy::BranchAndBound);
        assert_eq!(sel.change, None);
        assert_eq!(sel.selected.len(), 1);
        assert_eq!(sel.selected[0].value, exact);
        assert_eq!(sel.total, target + sel.fee);
    }

    #[test]
    fn branch_and_bound_combines_coins() {
        let p = params(1);
        let base_fee = p.fee_rate.fee_for_weight(p.base_weight + 2);
        let target = 50_000;
        let a = 20_000 + 68;
        let b = 30_000 + base_fee + 68;
        let pool = [utxo(1, 80_000), utxo(2, a), utxo(3, b)];
        let sel = CoinSelector::select(&pool, target, &p, SelectionStrategy::BranchAndBound).unwrap();
        assert_eq!(sel.strategy, SelectionStrategy::BranchAndBound);
        let mut values: Vec<u64> = sel.selected.iter().map(|u| u.value).collect();
        values.sort();
        assert_eq!(values, vec![a, b]);
        assert_eq!(sel.change, None);
    }

    #[test]
    fn branch_and_bound_falls_back() {
        let pool = [utxo(1, 1_000_000)];
        let sel = CoinSelector::select(&pool, 10_000, &params(1), SelectionStrategy::BranchAndBound).unwrap();
        assert_eq!(sel.strategy, SelectionStrategy::LargestFirst);
        assert!(sel.change.is_some());
    }

    #[test]
    fn input_weight_override_is_used() {
        let pool = [utxo(1, 100_000)];
        let default = CoinSelector::select(&pool, 10_000, &params(1), SelectionStrategy::LargestFirst).unwrap();
        let heavy = params(1).with_input_weight(pool[0].outpoint, 1_000);
        let custom = CoinSelector::select(&pool, 10_000, &heavy, SelectionStrategy::LargestFirst).unwrap();
        assert_eq!(custom.weight - default.weight, 1_000 - 272);
    }

    #[test]
    fn strategy_serde() {
        assert_eq!(serde_json::to_string(&SelectionStrategy::BranchAndBound).unwrap(), "\"branch_and_bound\"");
        assert_eq!(
            serde_json::from_str::<SelectionStrategy>("\"largest_first\"").unwrap(),
            SelectionStrategy::LargestFirst
        );
    }

    proptest! {
        #[test]
        fn selection_covers_target_or_reports_shortfall(
            values in prop::collection::vec(1_000u64..2_000_000, 1..12),
            target in 1_000u64..5_000_000,
            rate in 1u64..50,
            bnb in any::<bool>(),
        ) {
            let pool: Vec<Utxo> = values.iter().enumerate().map(|(i, &v)| utxo(i as u8, v)).collect();
            let strategy = if bnb { SelectionStrategy::BranchAndBound } else { SelectionStrategy::LargestFirst };
            let p = params(rate);
            match CoinSelector::select(&pool, target, &p, strategy) {
                Ok(sel) => {
                    prop_assert_eq!(sel.total, target + sel.fee + sel.change.unwrap_or(0));
                    prop_assert!(sel.fee >= p.fee_rate.fee_for_weight(sel.weight));
                    if let Some(change) = sel.change {
                        prop_assert!(change >= dust_threshold(&p.change_script, p.dust_relay_fee));
                    }
                }
                Err(WalletError::InsufficientFunds { have, need }) => prop_assert!(have < need),
                Err(e) => prop_assert!(false, "unexpected error {e:?}"),
            }
        }

        #[test]
        fn selection_is_order_independent(
            values in prop::collection::vec(1_000u64..500_000, 2..10),
            target in 1_000u64..1_000_000,
        ) {
            let pool: Vec<Utxo> = values.iter().enumerate().map(|(i, &v)| utxo(i as u8, v)).collect();
            let mut reversed = pool.clone();
            reversed.reverse();
            let p = params(3);
            let a = CoinSelector::select(&pool, target, &p, SelectionStrategy::BranchAndBound);
            let b = CoinSelector::select(&reversed, target, &p, SelectionStrategy::BranchAndBound);
            prop_assert_eq!(a, b);
        }
    }
}
