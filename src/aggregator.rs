use crate::config::SnapshotConfig;
use crate::error::Result;
use crate::models::Amount;
use crate::quantize::Quantizer;
use crate::source::{fetch_all, BalanceSource, PageGap, PagePolicy, SourceKind};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Accounts that never appear in a snapshot: configured system accounts plus
/// the token's issuer (usually the account paying out the airdrop).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    accounts: BTreeSet<String>,
}

impl ExclusionSet {
    pub fn new<I, S>(accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accounts: accounts.into_iter().map(Into::into).collect(),
        }
    }

    pub fn insert(&mut self, account: impl Into<String>) -> bool {
        self.accounts.insert(account.into())
    }

    pub fn contains(&self, account: &str) -> bool {
        self.accounts.contains(account)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

/// Tables merged for `symbol`. The settlement token also counts funds locked
/// in buy orders and withdrawals still in flight.
pub fn source_kinds(symbol: &str, cfg: &SnapshotConfig) -> Vec<SourceKind> {
    let mut kinds = vec![SourceKind::SpotBalance {
        symbol: symbol.to_string(),
    }];
    if symbol == cfg.settlement_symbol {
        kinds.push(SourceKind::MarketBuyOrderLock);
        kinds.push(SourceKind::PendingWithdrawal {
            peg_contract: cfg.settlement_peg_contract.clone(),
            withdrawal_type: cfg.settlement_withdrawal_type.clone(),
        });
    } else {
        kinds.push(SourceKind::MarketSellOrder {
            symbol: symbol.to_string(),
        });
    }
    kinds
}

/// Result of one aggregation pass.
#[derive(Debug, Default)]
pub struct Aggregation {
    /// Positive, quantized totals keyed by account.
    pub balances: BTreeMap<String, Amount>,
    /// Excluded accounts and what they would have held.
    pub excluded: BTreeMap<String, Amount>,
    /// Pages skipped under `OnPageFailure::Skip`.
    pub gaps: Vec<PageGap>,
    pub records: usize,
}

impl Aggregation {
    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty()
    }
}

pub struct BalanceAggregator {
    quantizer: Quantizer,
    page_size: usize,
    page_policy: PagePolicy,
}

impl BalanceAggregator {
    pub fn new(quantizer: Quantizer, page_size: usize, page_policy: PagePolicy) -> Self {
        Self {
            quantizer,
            page_size,
            page_policy,
        }
    }

    /// Sums every source into one total per account, then drops excluded
    /// accounts and anything not strictly positive.
    pub async fn aggregate(
        &self,
        sources: &[Box<dyn BalanceSource>],
        exclusions: &ExclusionSet,
    ) -> Result<Aggregation> {
        let mut totals: BTreeMap<String, Amount> = BTreeMap::new();
        let mut agg = Aggregation::default();

        for source in sources {
            let pull = fetch_all(source.as_ref(), self.page_size, &self.page_policy).await?;
            info!(
                "{}: {} records in {} pages",
                source.name(),
                pull.balances.len(),
                pull.pages
            );
            agg.records += pull.balances.len();

            for bal in pull.balances {
                let amount = self.quantizer.quantize(bal.amount);
                *totals.entry(bal.account).or_insert(Decimal::ZERO) += amount;
            }
            agg.gaps.extend(pull.gap);
        }

        for (account, amount) in totals {
            if exclusions.contains(&account) {
                agg.excluded.insert(account, amount);
            } else if amount > Decimal::ZERO {
                agg.balances.insert(account, amount);
            }
        }

        if !agg.excluded.is_empty() {
            info!("Excluded accounts: {:?}", agg.excluded.keys().collect::<Vec<_>>());
        }
        for gap in &agg.gaps {
            warn!(
                "Gap in {} from offset {}: {}",
                gap.source, gap.offset, gap.reason
            );
        }

        Ok(agg)
    }
}
