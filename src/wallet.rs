// src/wallet.rs
use crate::config::WalletConfig;
use crate::error::{Error, Result};
use crate::models::Amount;
use crate::quantize::parse_decimal_value;
use crate::rpc::ContractsApi;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Outbound side of the chain: the treasury account's session.
///
/// Calls are fallible and not assumed idempotent; a failed `transfer` may
/// still have been broadcast.
#[async_trait]
pub trait Wallet: Send {
    /// Account the wallet sends from.
    fn account(&self) -> &str;

    /// Re-reads the account's token balances.
    async fn refresh(&mut self) -> Result<()>;

    /// Liquid balance of `symbol` as of the last refresh (zero when absent).
    fn balance(&self, symbol: &str) -> Amount;

    /// Submits a token transfer and returns the broadcast receipt text.
    async fn transfer(&mut self, to: &str, amount: &str, symbol: &str, memo: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct UnlockResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct BroadcastResponse {
    #[serde(alias = "id")]
    trx_id: String,
}

/// Wallet backed by a remote signing service that holds the account's
/// active key and broadcasts `custom_json` operations on its behalf.
pub struct SignerWallet {
    account: String,
    chain_id: String,
    signer_url: String,
    session: Option<String>,
    http: Client,
    api: Arc<dyn ContractsApi>,
    balances: HashMap<String, Amount>,
}

impl SignerWallet {
    /// Opens a signer session for `account`, unlocking it when a password is
    /// configured, and loads the initial balances.
    pub async fn connect(
        cfg: &WalletConfig,
        account: &str,
        api: Arc<dyn ContractsApi>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Connection(e.to_string()))?;

        let session = match &cfg.password {
            Some(password) => {
                let resp = http
                    .post(format!("{}/unlock", cfg.signer_url.trim_end_matches('/')))
                    .json(&json!({ "account": account, "password": password }))
                    .send()
                    .await
                    .map_err(|e| Error::Connection(e.to_string()))?;
                if resp.status() != StatusCode::OK {
                    return Err(Error::Connection(format!(
                        "signer refused to unlock @{}: HTTP {}",
                        account,
                        resp.status()
                    )));
                }
                let body: UnlockResponse = resp
                    .json()
                    .await
                    .map_err(|e| Error::Connection(e.to_string()))?;
                Some(body.token)
            }
            None => None,
        };

        let mut wallet = Self {
            account: account.to_string(),
            chain_id: cfg.chain_id.clone(),
            signer_url: cfg.signer_url.trim_end_matches('/').to_string(),
            session,
            http,
            api,
            balances: HashMap::new(),
        };
        wallet
            .refresh()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        info!("Signer session open for @{} on {}", wallet.account, wallet.chain_id);
        Ok(wallet)
    }
}

#[async_trait]
impl Wallet for SignerWallet {
    fn account(&self) -> &str {
        &self.account
    }

    async fn refresh(&mut self) -> Result<()> {
        let mut balances = HashMap::new();
        let mut offset = 0;
        let limit = 1000;
        loop {
            let rows = self
                .api
                .find(
                    "tokens",
                    "balances",
                    json!({ "account": self.account }),
                    offset,
                    limit,
                )
                .await?;
            for row in &rows {
                if let (Some(symbol), Some(balance)) = (row["symbol"].as_str(), row.get("balance")) {
                    // Raw value; callers quantize with the token's own precision.
                    balances.insert(symbol.to_string(), parse_decimal_value(balance)?);
                }
            }
            if rows.len() < limit {
                break;
            }
            offset += limit;
        }
        debug!("Refreshed @{}: {} token balances", self.account, balances.len());
        self.balances = balances;
        Ok(())
    }

    fn balance(&self, symbol: &str) -> Amount {
        self.balances.get(symbol).copied().unwrap_or_default()
    }

    async fn transfer(&mut self, to: &str, amount: &str, symbol: &str, memo: &str) -> Result<String> {
        let payload = json!({
            "contractName": "tokens",
            "contractAction": "transfer",
            "contractPayload": {
                "symbol": symbol,
                "to": to,
                "quantity": amount,
                "memo": memo,
            },
        });
        let body = json!({
            "account": self.account,
            "id": self.chain_id,
            "required_auths": [self.account],
            "required_posting_auths": Value::Array(vec![]),
            "json": payload.to_string(),
        });

        let mut req = self
            .http
            .post(format!("{}/broadcast", self.signer_url))
            .json(&body);
        if let Some(token) = &self.session {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(|e| Error::Transfer(e.to_string()))?;
        if resp.status() != StatusCode::OK {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Transfer(format!("HTTP {}: {}", status, text)));
        }
        let receipt: BroadcastResponse = resp
            .json()
            .await
            .map_err(|e| Error::Transfer(e.to_string()))?;
        Ok(format!("broadcast {}", receipt.trx_id))
    }
}

/// Opens the treasury wallet once the snapshot has been read and planned.
#[async_trait]
pub trait WalletConnector: Send + Sync {
    async fn connect(&self, account: &str) -> Result<Box<dyn Wallet>>;
}

pub struct SignerConnector {
    cfg: WalletConfig,
    api: Arc<dyn ContractsApi>,
}

impl SignerConnector {
    pub fn new(cfg: WalletConfig, api: Arc<dyn ContractsApi>) -> Self {
        Self { cfg, api }
    }
}

#[async_trait]
impl WalletConnector for SignerConnector {
    async fn connect(&self, account: &str) -> Result<Box<dyn Wallet>> {
        let wallet = SignerWallet::connect(&self.cfg, account, Arc::clone(&self.api)).await?;
        Ok(Box::new(wallet))
    }
}
