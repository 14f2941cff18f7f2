use crate::error::{Error, Result};
use crate::snapshot::DuplicatePolicy;
use crate::source::{OnPageFailure, PagePolicy};
use dotenvy::dotenv;
use std::collections::BTreeSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub url: String, // sidechain `contracts` JSON-RPC endpoint
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub signer_url: String,
    pub password: Option<String>,
    pub chain_id: String,
}

#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub page_size: usize,
    pub page_policy: PagePolicy,
    pub excluded_accounts: BTreeSet<String>,
    pub settlement_symbol: String,
    pub settlement_peg_contract: String,
    pub settlement_withdrawal_type: String,
}

#[derive(Debug, Clone)]
pub struct AirdropConfig {
    pub max_attempts: u32,
    pub retry_backoff_secs: u64,
    pub pacing_secs: u64,
    pub duplicate_policy: DuplicatePolicy,
    pub audit_log: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc: RpcConfig,
    pub wallet: WalletConfig,
    pub snapshot: SnapshotConfig,
    pub airdrop: AirdropConfig,
}

pub fn load() -> Result<Config> {
    dotenv().ok(); // .env is optional

    let cfg = Config::from_lookup(|key| env::var(key).ok())?;

    info!(
        "Loaded config: rpc={} signer={} chain={} page_size={} page_policy={:?} excluded={:?}",
        cfg.rpc.url,
        cfg.wallet.signer_url,
        cfg.wallet.chain_id,
        cfg.snapshot.page_size,
        cfg.snapshot.page_policy,
        cfg.snapshot.excluded_accounts
    );

    Ok(cfg)
}

impl Config {
    /// Builds a config from any key lookup; `load` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| -> String {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let rpc = RpcConfig {
            url: get("SIDECHAIN_RPC_URL", "https://api.hive-engine.com/rpc/contracts"),
            timeout_secs: parse_var("RPC_TIMEOUT_SECS", &get("RPC_TIMEOUT_SECS", "15"))?,
        };

        let wallet = WalletConfig {
            signer_url: get("SIGNER_URL", "http://127.0.0.1:8091"),
            password: lookup("WALLET_PASSWORD").filter(|p| !p.is_empty()),
            chain_id: get("CHAIN_ID", "ssc-mainnet-hive"),
        };

        let page_retries: u32 = parse_var("PAGE_RETRIES", &get("PAGE_RETRIES", "2"))?;
        let on_failure = match get("PAGE_FAILURE_POLICY", "abort").as_str() {
            "abort" => OnPageFailure::Abort,
            "skip" => OnPageFailure::Skip,
            other => {
                return Err(Error::Config(format!(
                    "PAGE_FAILURE_POLICY must be abort or skip, got {:?}",
                    other
                )))
            }
        };
        let page_policy = PagePolicy {
            on_failure,
            retries: page_retries,
            retry_delay: Duration::from_secs(parse_var(
                "PAGE_RETRY_DELAY_SECS",
                &get("PAGE_RETRY_DELAY_SECS", "2"),
            )?),
        };

        let page_size: usize = parse_var("PAGE_SIZE", &get("PAGE_SIZE", "1000"))?;
        if page_size == 0 {
            return Err(Error::Config("PAGE_SIZE must be positive".into()));
        }

        let snapshot = SnapshotConfig {
            page_size,
            page_policy,
            excluded_accounts: get("EXCLUDED_ACCOUNTS", "null")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            settlement_symbol: get("SETTLEMENT_SYMBOL", "SWAP.HIVE"),
            settlement_peg_contract: get("SETTLEMENT_PEG_CONTRACT", "hivepegged"),
            settlement_withdrawal_type: get("SETTLEMENT_WITHDRAWAL_TYPE", "HIVE"),
        };

        let max_attempts: u32 = parse_var("MAX_ATTEMPTS", &get("MAX_ATTEMPTS", "3"))?;
        if max_attempts == 0 {
            return Err(Error::Config("MAX_ATTEMPTS must be at least 1".into()));
        }

        let airdrop = AirdropConfig {
            max_attempts,
            retry_backoff_secs: parse_var("RETRY_BACKOFF_SECS", &get("RETRY_BACKOFF_SECS", "5"))?,
            pacing_secs: parse_var("PACING_SECS", &get("PACING_SECS", "5"))?,
            duplicate_policy: get("DUPLICATE_POLICY", "reject").parse()?,
            audit_log: get("AUDIT_LOG", "airdrop_output.log"),
        };

        Ok(Config {
            rpc,
            wallet,
            snapshot,
            airdrop,
        })
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::Config(format!("{} has invalid value {:?}", key, raw)))
}
