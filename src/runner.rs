use crate::aggregator::{source_kinds, Aggregation, BalanceAggregator, ExclusionSet};
use crate::config::{AirdropConfig, SnapshotConfig};
use crate::error::{Error, Result};
use crate::executor::{RetryPolicy, TransferExecutor};
use crate::ledger::{RunLedger, RunSummary};
use crate::models::{Snapshot, TokenInfo};
use crate::planner::{DistributionPlanner, RunMode, Sufficiency};
use crate::quantize::Quantizer;
use crate::rpc::ContractsApi;
use crate::snapshot::{DuplicatePolicy, EntryOrder, SnapshotCodec};
use crate::source::{BalanceSource, TableSource};
use crate::wallet::WalletConnector;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// A finished snapshot plus what the operator should know about it.
#[derive(Debug)]
pub struct SnapshotReport {
    pub token: TokenInfo,
    pub snapshot: Snapshot,
    pub aggregation: Aggregation,
    /// Encoded file contents.
    pub text: String,
}

/// Builds the snapshot for `symbol` from every source in its profile.
pub async fn take_snapshot(
    cfg: &SnapshotConfig,
    api: Arc<dyn ContractsApi>,
    symbol: &str,
    order: EntryOrder,
) -> Result<SnapshotReport> {
    let token = api
        .token_info(symbol)
        .await?
        .ok_or_else(|| Error::UnknownSymbol(symbol.to_string()))?;
    let quantizer = Quantizer::new(token.precision)?;
    info!(
        "Snapshotting {} (precision {}, issuer @{})",
        token.symbol, token.precision, token.issuer
    );

    // The issuer is most likely the account paying the airdrop.
    let mut exclusions = ExclusionSet::new(cfg.excluded_accounts.iter().cloned());
    exclusions.insert(token.issuer.clone());

    let sources: Vec<Box<dyn BalanceSource>> = source_kinds(symbol, cfg)
        .into_iter()
        .map(|kind| Box::new(TableSource::new(kind, Arc::clone(&api))) as Box<dyn BalanceSource>)
        .collect();

    let aggregator = BalanceAggregator::new(quantizer, cfg.page_size, cfg.page_policy);
    let aggregation = aggregator.aggregate(&sources, &exclusions).await?;

    let snapshot = Snapshot::from_balances(symbol, aggregation.balances.clone(), &quantizer);
    let codec = SnapshotCodec::new(quantizer, DuplicatePolicy::Reject);
    let text = codec.encode(&snapshot, order);
    info!(
        "{} accounts hold {} {} ({} records read)",
        snapshot.len(),
        quantizer.format(snapshot.total),
        symbol,
        aggregation.records
    );

    Ok(SnapshotReport {
        token,
        snapshot,
        aggregation,
        text,
    })
}

#[derive(Debug, Clone)]
pub struct AirdropRequest {
    pub input: PathBuf,
    pub account: String,
    pub mode: RunMode,
    /// Symbol for snapshot files without a header line.
    pub symbol: Option<String>,
    /// Token to pay out; defaults to the snapshot's symbol.
    pub send_symbol: Option<String>,
    pub memo: Option<String>,
}

/// Reads a snapshot, checks the treasury, and sends the airdrop.
///
/// Whole-run errors (parse, connection, insufficient funds) are written to
/// the ledger and returned before any transfer goes out. Per-recipient
/// failures end up in the summary.
pub async fn run_airdrop(
    cfg: &AirdropConfig,
    api: &dyn ContractsApi,
    connector: &dyn WalletConnector,
    policy: &dyn RetryPolicy,
    req: &AirdropRequest,
    mut ledger: RunLedger,
) -> Result<RunSummary> {
    match airdrop(cfg, api, connector, policy, req, &mut ledger).await {
        Ok(()) => ledger.finish(),
        Err(e) => {
            ledger.error(format!("FAILED!! {}. Quitting...", e))?;
            ledger.info(format!("success count: {}", ledger.success_count()))?;
            ledger.info(format!("failure count: {}", ledger.failure_count()))?;
            Err(e)
        }
    }
}

async fn airdrop(
    cfg: &AirdropConfig,
    api: &dyn ContractsApi,
    connector: &dyn WalletConnector,
    policy: &dyn RetryPolicy,
    req: &AirdropRequest,
    ledger: &mut RunLedger,
) -> Result<()> {
    if req.mode.is_simulation() {
        ledger.info("Simulation mode: no transfers will be broadcast")?;
    }
    ledger.info(format!("Will send tokens from @{}", req.account))?;
    ledger.info(format!("Reading snapshot data from {}", req.input.display()))?;

    let text = std::fs::read_to_string(&req.input)?;
    let symbol = req
        .symbol
        .clone()
        .or_else(|| SnapshotCodec::declared_symbol(&text).map(str::to_string))
        .ok_or_else(|| Error::Parse {
            line: 0,
            reason: "no `<symbol> snapshot` header; pass --symbol".into(),
        })?;
    let send_symbol = req.send_symbol.clone().unwrap_or_else(|| symbol.clone());

    let send_token = lookup(api, &send_symbol)
        .await?
        .ok_or_else(|| Error::UnknownSymbol(send_symbol.clone()))?;
    let send_quantizer = Quantizer::new(send_token.precision)?;
    // A snapshot token from another chain may be unknown here; read it at
    // the payout precision then.
    let snap_quantizer = match lookup(api, &symbol).await? {
        Some(token) => Quantizer::new(token.precision)?,
        None => send_quantizer,
    };

    let planner = DistributionPlanner::new(
        SnapshotCodec::new(snap_quantizer, cfg.duplicate_policy),
        send_quantizer,
    );
    let snapshot = planner.read(&text, Some(&symbol))?;
    let plan = planner.plan(&snapshot, &send_symbol);
    if send_symbol != symbol {
        ledger.info(format!("Airdrop pays {} for {} holdings", send_symbol, symbol))?;
    } else {
        ledger.info(format!("Airdrop is for {} tokens", symbol))?;
    }
    ledger.info(format!(
        "Counted {} accounts with {} {} total",
        plan.len(),
        send_quantizer.format(plan.total),
        send_symbol
    ))?;

    let mut wallet = connector.connect(&req.account).await.map_err(|e| match e {
        Error::Connection(_) => e,
        other => Error::Connection(other.to_string()),
    })?;
    let balance = send_quantizer.quantize(wallet.balance(&send_symbol));
    ledger.info(format!(
        "{} balance of @{} = {}",
        send_symbol,
        wallet.account(),
        send_quantizer.format(balance)
    ))?;

    if let Sufficiency::Short { shortfall } = planner.validate(&plan, balance, req.mode)? {
        ledger.warn(format!(
            "@{} is {} {} short of the airdrop total; a live run would stop here",
            req.account,
            send_quantizer.format(shortfall),
            send_symbol
        ))?;
    }

    let memo = req
        .memo
        .clone()
        .unwrap_or_else(|| format!("airdrop based on {} holdings", symbol));
    let mut executor = TransferExecutor::new(wallet.as_mut(), policy, send_quantizer, req.mode, memo);
    executor.execute(&plan, ledger).await
}

async fn lookup(api: &dyn ContractsApi, symbol: &str) -> Result<Option<TokenInfo>> {
    api.token_info(symbol)
        .await
        .map_err(|e| Error::Connection(format!("token lookup for {} failed: {}", symbol, e)))
}
