// src/source.rs
//! Balance sources: each one pages through a single chain table and yields
//! `(account, amount)` pairs that the aggregator adds together.

use crate::error::{Error, Result};
use crate::models::AccountBalance;
use crate::quantize::parse_decimal_value;
use crate::rpc::ContractsApi;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// One origin of partial balances.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Label used in logs and gap reports.
    fn name(&self) -> String;

    /// One page starting at `offset`. A transport failure must surface as
    /// `Error::FetchPage`; any other error is treated as fatal by the pager.
    async fn fetch(&self, offset: usize, limit: usize) -> Result<Vec<AccountBalance>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnPageFailure {
    /// Stop the whole aggregation.
    Abort,
    /// Record a gap and end that source as if the page had been empty.
    Skip,
}

/// What to do when a page keeps failing after `retries` extra attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePolicy {
    pub on_failure: OnPageFailure,
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for PagePolicy {
    fn default() -> Self {
        Self {
            on_failure: OnPageFailure::Abort,
            retries: 2,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// A page that could not be read and was skipped. Any balances past this
/// offset in that source are missing from the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageGap {
    pub source: String,
    pub offset: usize,
    pub reason: String,
}

/// Everything one source produced.
#[derive(Debug, Default)]
pub struct SourcePull {
    pub balances: Vec<AccountBalance>,
    pub pages: usize,
    pub gap: Option<PageGap>,
}

/// Pages through `source` until a page comes back shorter than `page_size`.
pub async fn fetch_all(
    source: &dyn BalanceSource,
    page_size: usize,
    policy: &PagePolicy,
) -> Result<SourcePull> {
    let mut pull = SourcePull::default();
    let mut offset = 0;

    loop {
        let page = match fetch_page(source, offset, page_size, policy).await {
            Ok(page) => page,
            Err(Error::FetchPage { reason, .. }) if policy.on_failure == OnPageFailure::Skip => {
                warn!(
                    "Skipping {} from offset {}: {} (snapshot will be incomplete)",
                    source.name(),
                    offset,
                    reason
                );
                pull.gap = Some(PageGap {
                    source: source.name(),
                    offset,
                    reason,
                });
                break;
            }
            Err(e) => return Err(e),
        };

        pull.pages += 1;
        let count = page.len();
        pull.balances.extend(page);
        debug!("{}: offset {} → {} records", source.name(), offset, count);

        if count < page_size {
            break;
        }
        offset += page_size;
    }

    Ok(pull)
}

async fn fetch_page(
    source: &dyn BalanceSource,
    offset: usize,
    limit: usize,
    policy: &PagePolicy,
) -> Result<Vec<AccountBalance>> {
    let mut attempt = 0;
    loop {
        match source.fetch(offset, limit).await {
            Ok(page) => return Ok(page),
            // Only page-level failures are retried.
            Err(e) if !e.is_fatal() && attempt < policy.retries => {
                attempt += 1;
                warn!("{} (retry {} of {})", e, attempt, policy.retries);
                sleep(policy.retry_delay).await;
            }
            Err(e) => {
                if !e.is_fatal() {
                    error!("{}", e);
                }
                return Err(e);
            }
        }
    }
}

/// The chain tables a snapshot can draw from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// `tokens/balances`: liquid balance plus staked, unstaking, delegated
    /// and undelegating amounts.
    SpotBalance { symbol: String },
    /// `market/sellBook`: quantity listed for sale.
    MarketSellOrder { symbol: String },
    /// `market/buyBook`: settlement-token funds locked behind buy orders of
    /// every symbol.
    MarketBuyOrderLock,
    /// `<peg contract>/withdrawals`: amounts still on their way out,
    /// credited back to the recipient.
    PendingWithdrawal {
        peg_contract: String,
        withdrawal_type: String,
    },
}

/// Staking and delegation fields counted toward a holder's spot balance.
/// `delegatedStake` is the pre-delegationsOut way of recording delegations.
const STAKE_FIELDS: [&str; 5] = [
    "stake",
    "pendingUnstake",
    "delegationsOut",
    "pendingUndelegations",
    "delegatedStake",
];

impl SourceKind {
    fn contract(&self) -> &str {
        match self {
            SourceKind::SpotBalance { .. } => "tokens",
            SourceKind::MarketSellOrder { .. } | SourceKind::MarketBuyOrderLock => "market",
            SourceKind::PendingWithdrawal { peg_contract, .. } => peg_contract.as_str(),
        }
    }

    fn table(&self) -> &'static str {
        match self {
            SourceKind::SpotBalance { .. } => "balances",
            SourceKind::MarketSellOrder { .. } => "sellBook",
            SourceKind::MarketBuyOrderLock => "buyBook",
            SourceKind::PendingWithdrawal { .. } => "withdrawals",
        }
    }

    fn query(&self) -> Value {
        match self {
            SourceKind::SpotBalance { symbol } | SourceKind::MarketSellOrder { symbol } => {
                json!({ "symbol": symbol })
            }
            SourceKind::MarketBuyOrderLock => json!({}),
            SourceKind::PendingWithdrawal {
                withdrawal_type, ..
            } => json!({ "type": withdrawal_type }),
        }
    }

    fn account_field(&self) -> &'static str {
        match self {
            SourceKind::PendingWithdrawal { .. } => "recipient",
            _ => "account",
        }
    }

    /// Turns one table row into the holder and the amount it contributes.
    pub fn extract(&self, row: &Value) -> Result<AccountBalance> {
        let account = row
            .get(self.account_field())
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Rpc(format!(
                    "{}/{} row without {}: {}",
                    self.contract(),
                    self.table(),
                    self.account_field(),
                    row
                ))
            })?;

        let amount = match self {
            SourceKind::SpotBalance { .. } => {
                let mut total = optional_amount(row, "balance")?;
                for field in STAKE_FIELDS {
                    total += optional_amount(row, field)?;
                }
                total
            }
            SourceKind::MarketSellOrder { .. } | SourceKind::PendingWithdrawal { .. } => {
                required_amount(row, "quantity")?
            }
            SourceKind::MarketBuyOrderLock => required_amount(row, "tokensLocked")?,
        };

        Ok(AccountBalance::new(account, amount))
    }
}

fn optional_amount(row: &Value, field: &str) -> Result<Decimal> {
    match row.get(field) {
        None => Ok(Decimal::ZERO),
        Some(v) => parse_decimal_value(v),
    }
}

fn required_amount(row: &Value, field: &str) -> Result<Decimal> {
    match row.get(field) {
        None => Err(Error::InvalidAmount(format!("missing {} in {}", field, row))),
        Some(v) => parse_decimal_value(v),
    }
}

/// A `SourceKind` read through the sidechain contracts API.
pub struct TableSource {
    kind: SourceKind,
    api: Arc<dyn ContractsApi>,
}

impl TableSource {
    pub fn new(kind: SourceKind, api: Arc<dyn ContractsApi>) -> Self {
        Self { kind, api }
    }
}

#[async_trait]
impl BalanceSource for TableSource {
    fn name(&self) -> String {
        format!("{}/{}", self.kind.contract(), self.kind.table())
    }

    async fn fetch(&self, offset: usize, limit: usize) -> Result<Vec<AccountBalance>> {
        let rows = self
            .api
            .find(
                self.kind.contract(),
                self.kind.table(),
                self.kind.query(),
                offset,
                limit,
            )
            .await
            .map_err(|e| Error::FetchPage {
                source_name: self.name(),
                offset,
                reason: e.to_string(),
            })?;

        rows.iter().map(|row| self.kind.extract(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn instant(on_failure: OnPageFailure, retries: u32) -> PagePolicy {
        PagePolicy {
            on_failure,
            retries,
            retry_delay: Duration::ZERO,
        }
    }

    /// Serves `total` one-unit balances and fails the calls listed in `fail_calls`.
    struct Counted {
        total: usize,
        calls: AtomicUsize,
        fail_calls: Mutex<Vec<usize>>,
    }

    impl Counted {
        fn new(total: usize, fail_calls: Vec<usize>) -> Self {
            Self {
                total,
                calls: AtomicUsize::new(0),
                fail_calls: Mutex::new(fail_calls),
            }
        }
    }

    #[async_trait]
    impl BalanceSource for Counted {
        fn name(&self) -> String {
            "counted".into()
        }

        async fn fetch(&self, offset: usize, limit: usize) -> Result<Vec<AccountBalance>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_calls.lock().unwrap().contains(&call) {
                return Err(Error::FetchPage {
                    source_name: self.name(),
                    offset,
                    reason: "503".into(),
                });
            }
            Ok((offset..self.total.min(offset + limit))
                .map(|i| AccountBalance::new(format!("acct{:04}", i), Decimal::ONE))
                .collect())
        }
    }

    #[tokio::test]
    async fn pages_until_short_page() {
        let src = Counted::new(25, vec![]);
        let pull = fetch_all(&src, 10, &instant(OnPageFailure::Abort, 0)).await.unwrap();
        assert_eq!(pull.balances.len(), 25);
        assert_eq!(pull.pages, 3);
        assert!(pull.gap.is_none());
    }

    #[tokio::test]
    async fn exact_multiple_needs_one_empty_page() {
        let src = Counted::new(20, vec![]);
        let pull = fetch_all(&src, 10, &instant(OnPageFailure::Abort, 0)).await.unwrap();
        assert_eq!(pull.balances.len(), 20);
        assert_eq!(pull.pages, 3);
    }

    #[tokio::test]
    async fn retried_page_recovers() {
        let src = Counted::new(15, vec![1]);
        let pull = fetch_all(&src, 10, &instant(OnPageFailure::Abort, 1)).await.unwrap();
        assert_eq!(pull.balances.len(), 15);
        assert!(pull.gap.is_none());
    }

    #[tokio::test]
    async fn abort_policy_fails_the_pull() {
        let src = Counted::new(15, vec![1, 2]);
        let err = fetch_all(&src, 10, &instant(OnPageFailure::Abort, 1)).await.unwrap_err();
        assert!(matches!(err, Error::FetchPage { offset: 10, .. }));
    }

    #[tokio::test]
    async fn skip_policy_records_the_gap() {
        let src = Counted::new(35, vec![1]);
        let pull = fetch_all(&src, 10, &instant(OnPageFailure::Skip, 0)).await.unwrap();
        assert_eq!(pull.balances.len(), 10);
        let gap = pull.gap.unwrap();
        assert_eq!(gap.offset, 10);
        assert_eq!(gap.source, "counted");
    }

    /// Returns rows the extractor cannot read.
    struct Malformed {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BalanceSource for Malformed {
        fn name(&self) -> String {
            "malformed".into()
        }

        async fn fetch(&self, _offset: usize, _limit: usize) -> Result<Vec<AccountBalance>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::InvalidAmount("lots".into()))
        }
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried_or_skipped() {
        let src = Malformed {
            calls: AtomicUsize::new(0),
        };
        let err = fetch_all(&src, 10, &instant(OnPageFailure::Skip, 3)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidAmount(_)));
        assert_eq!(src.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn spot_balance_sums_stake_fields() {
        let kind = SourceKind::SpotBalance { symbol: "BEE".into() };
        let row = json!({
            "account": "alice",
            "symbol": "BEE",
            "balance": "1.5",
            "stake": "2",
            "pendingUnstake": "0.25",
            "delegationsOut": "3",
            "pendingUndelegations": "0.125",
            "delegatedStake": "1",
        });
        let bal = kind.extract(&row).unwrap();
        assert_eq!(bal.account, "alice");
        assert_eq!(bal.amount, d("7.875"));

        let plain = json!({ "account": "bob", "balance": "4" });
        assert_eq!(kind.extract(&plain).unwrap().amount, d("4"));
    }

    #[test]
    fn order_and_withdrawal_rows() {
        let sell = SourceKind::MarketSellOrder { symbol: "BEE".into() };
        let row = json!({ "account": "carol", "quantity": "10.1", "price": "0.5" });
        assert_eq!(sell.extract(&row).unwrap(), AccountBalance::new("carol", d("10.1")));

        let buy = SourceKind::MarketBuyOrderLock;
        let row = json!({ "account": "dave", "symbol": "BEE", "quantity": "99", "tokensLocked": "4.2" });
        assert_eq!(buy.extract(&row).unwrap(), AccountBalance::new("dave", d("4.2")));

        let wd = SourceKind::PendingWithdrawal {
            peg_contract: "hivepegged".into(),
            withdrawal_type: "HIVE".into(),
        };
        let row = json!({ "id": "tx1", "type": "HIVE", "recipient": "erin", "quantity": "3.000" });
        assert_eq!(wd.extract(&row).unwrap(), AccountBalance::new("erin", d("3")));
    }

    #[test]
    fn malformed_rows_are_errors() {
        let kind = SourceKind::SpotBalance { symbol: "BEE".into() };
        assert!(matches!(
            kind.extract(&json!({ "account": "a", "balance": "lots" })),
            Err(Error::InvalidAmount(_))
        ));
        assert!(matches!(
            kind.extract(&json!({ "balance": "1" })),
            Err(Error::Rpc(_))
        ));
        assert!(matches!(
            SourceKind::MarketBuyOrderLock.extract(&json!({ "account": "a" })),
            Err(Error::InvalidAmount(_))
        ));
    }

    #[test]
    fn table_routing() {
        let wd = SourceKind::PendingWithdrawal {
            peg_contract: "steempegged".into(),
            withdrawal_type: "STEEM".into(),
        };
        assert_eq!(wd.contract(), "steempegged");
        assert_eq!(wd.table(), "withdrawals");
        assert_eq!(wd.query(), json!({ "type": "STEEM" }));
        assert_eq!(SourceKind::MarketBuyOrderLock.query(), json!({}));
    }
}
