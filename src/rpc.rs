// src/rpc.rs
use crate::config::RpcConfig;
use crate::error::{Error, Result};
use crate::models::TokenInfo;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Read access to sidechain contract tables.
#[async_trait]
pub trait ContractsApi: Send + Sync {
    /// One page of `contract/table` rows matching `query`, in `_id` order.
    async fn find(
        &self,
        contract: &str,
        table: &str,
        query: Value,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>>;

    /// First row matching `query`, if any.
    async fn find_one(&self, contract: &str, table: &str, query: Value) -> Result<Option<Value>>;

    async fn token_info(&self, symbol: &str) -> Result<Option<TokenInfo>> {
        match self
            .find_one("tokens", "tokens", json!({ "symbol": symbol }))
            .await?
        {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RpcResponse<T> {
    Success { result: T },
    Error { error: RpcError },
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// JSON-RPC client for the sidechain `contracts` endpoint.
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: Client,
    url: String,
}

impl RpcClient {
    pub fn new(cfg: &RpcConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| Error::Connection(e.to_string()))?;
        Ok(Self {
            client,
            url: cfg.url.clone(),
        })
    }

    async fn call<T: for<'de> Deserialize<'de>>(&self, method: &str, params: Value) -> Result<T> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        debug!("Sending {} → {} {}", method, self.url, params);

        let resp = self.client.post(&self.url).json(&payload).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(Error::Rpc(format!("HTTP {}", resp.status())));
        }
        let text = resp.text().await?;

        match serde_json::from_str::<RpcResponse<T>>(&text)? {
            RpcResponse::Success { result } => Ok(result),
            RpcResponse::Error { error } => Err(Error::Rpc(format!(
                "{} (code {})",
                error.message, error.code
            ))),
        }
    }
}

#[async_trait]
impl ContractsApi for RpcClient {
    async fn find(
        &self,
        contract: &str,
        table: &str,
        query: Value,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>> {
        self.call(
            "find",
            json!({
                "contract": contract,
                "table": table,
                "query": query,
                "limit": limit,
                "offset": offset,
                "indexes": [{ "index": "_id", "descending": false }],
            }),
        )
        .await
    }

    async fn find_one(&self, contract: &str, table: &str, query: Value) -> Result<Option<Value>> {
        // findOne answers `null` when nothing matches.
        let row: Value = self
            .call(
                "findOne",
                json!({
                    "contract": contract,
                    "table": table,
                    "query": query,
                }),
            )
            .await?;
        Ok(if row.is_null() { None } else { Some(row) })
    }
}
