// src/models.rs
use crate::quantize::Quantizer;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Exact decimal token quantity. Never a float.
pub type Amount = Decimal;

/// One partial balance as yielded by a balance source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountBalance {
    pub account: String,
    pub amount: Amount,
}

impl AccountBalance {
    pub fn new(account: impl Into<String>, amount: Amount) -> Self {
        Self {
            account: account.into(),
            amount,
        }
    }
}

/// Token metadata from the `tokens/tokens` table.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenInfo {
    pub symbol: String,
    pub issuer: String,
    pub precision: u32,
}

/// Point-in-time holder balances for one symbol.
///
/// `entries` only ever holds positive amounts. `total` is the advertised
/// grand total: for a freshly aggregated snapshot it equals the quantized sum
/// of the entries, for a decoded file it is whatever the trailer declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub symbol: String,
    pub entries: BTreeMap<String, Amount>,
    pub total: Amount,
}

impl Snapshot {
    /// Builds a snapshot from merged balances, dropping non-positive entries
    /// and computing the total.
    pub fn from_balances(
        symbol: impl Into<String>,
        balances: BTreeMap<String, Amount>,
        quantizer: &Quantizer,
    ) -> Self {
        let entries: BTreeMap<String, Amount> = balances
            .into_iter()
            .map(|(account, amount)| (account, quantizer.quantize(amount)))
            .filter(|(_, amount)| *amount > Decimal::ZERO)
            .collect();
        let total = quantizer.quantize(entries.values().copied().sum());
        Self {
            symbol: symbol.into(),
            entries,
            total,
        }
    }

    pub fn recomputed_total(&self, quantizer: &Quantizer) -> Amount {
        quantizer.quantize(self.entries.values().copied().sum())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A single payout in a transfer plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTransfer {
    pub account: String,
    pub amount: Amount,
}

/// Payouts ordered by account ascending, every amount > 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub snapshot_symbol: String,
    pub send_symbol: String,
    pub transfers: Vec<PlannedTransfer>,
    /// Total the treasury must cover.
    pub total: Amount,
}

impl TransferPlan {
    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}

/// Final result for one recipient. Recorded once, never revised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub account: String,
    pub amount: Amount,
    pub attempts: u32,
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn from_balances_drops_non_positive_and_sums() {
        let q = Quantizer::new(8).unwrap();
        let mut balances = BTreeMap::new();
        balances.insert("alice".to_string(), d("12.5"));
        balances.insert("bob".to_string(), d("0"));
        balances.insert("carol".to_string(), d("7.25"));
        balances.insert("dave".to_string(), d("-1"));
        balances.insert("erin".to_string(), d("0.000000001"));

        let snap = Snapshot::from_balances("SYM", balances, &q);
        assert_eq!(snap.entries.keys().collect::<Vec<_>>(), vec!["alice", "carol"]);
        assert_eq!(snap.total.to_string(), "19.75000000");
        assert_eq!(snap.total, snap.recomputed_total(&q));
    }
}
