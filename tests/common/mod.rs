#![allow(dead_code)]

use async_trait::async_trait;
use engine_airdrop::models::Amount;
use engine_airdrop::rpc::ContractsApi;
use engine_airdrop::wallet::{Wallet, WalletConnector};
use engine_airdrop::{Error, Result};
use rust_decimal::prelude::FromStr;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// In-memory contract tables with `find` semantics close to the real node:
/// every key of the query must equal the row's field.
#[derive(Default)]
pub struct FakeChain {
    tables: HashMap<(String, String), Vec<Value>>,
    failing: Mutex<HashSet<(String, usize)>>,
    pub calls: Mutex<Vec<(String, usize)>>,
}

impl FakeChain {
    pub fn with_rows(mut self, contract: &str, table: &str, rows: Vec<Value>) -> Self {
        self.tables
            .entry((contract.to_string(), table.to_string()))
            .or_default()
            .extend(rows);
        self
    }

    /// Every read of `table` at `offset` fails.
    pub fn fail_page(self, table: &str, offset: usize) -> Self {
        self.failing.lock().unwrap().insert((table.to_string(), offset));
        self
    }

    fn matching(&self, contract: &str, table: &str, query: &Value) -> Vec<Value> {
        let rows = match self.tables.get(&(contract.to_string(), table.to_string())) {
            Some(rows) => rows,
            None => return Vec::new(),
        };
        let filter = query.as_object().cloned().unwrap_or_default();
        rows.iter()
            .filter(|row| filter.iter().all(|(k, v)| row.get(k) == Some(v)))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ContractsApi for FakeChain {
    async fn find(
        &self,
        contract: &str,
        table: &str,
        query: Value,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>> {
        self.calls.lock().unwrap().push((table.to_string(), offset));
        if self.failing.lock().unwrap().contains(&(table.to_string(), offset)) {
            return Err(Error::Rpc("HTTP 502 Bad Gateway".into()));
        }
        Ok(self
            .matching(contract, table, &query)
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn find_one(&self, contract: &str, table: &str, query: Value) -> Result<Option<Value>> {
        Ok(self.matching(contract, table, &query).into_iter().next())
    }
}

/// What a scripted wallet saw, shared with the test after the run.
#[derive(Default)]
pub struct WalletLog {
    pub refreshes: u32,
    pub attempts: HashMap<String, u32>,
    pub sent: Vec<(String, String, String, String)>,
}

pub struct ScriptedWallet {
    pub account: String,
    pub balances: HashMap<String, Amount>,
    /// Transfers to these accounts fail this many times before succeeding.
    pub failures: HashMap<String, u32>,
    pub log: Arc<Mutex<WalletLog>>,
}

#[async_trait]
impl Wallet for ScriptedWallet {
    fn account(&self) -> &str {
        &self.account
    }

    async fn refresh(&mut self) -> Result<()> {
        self.log.lock().unwrap().refreshes += 1;
        Ok(())
    }

    fn balance(&self, symbol: &str) -> Amount {
        self.balances.get(symbol).copied().unwrap_or_default()
    }

    async fn transfer(&mut self, to: &str, amount: &str, symbol: &str, memo: &str) -> Result<String> {
        let mut log = self.log.lock().unwrap();
        let n = {
            let n = log.attempts.entry(to.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        if n <= self.failures.get(to).copied().unwrap_or(0) {
            return Err(Error::Transfer(format!("rejected transfer to {}", to)));
        }
        log.sent
            .push((to.to_string(), amount.to_string(), symbol.to_string(), memo.to_string()));
        Ok(format!("broadcast tx-{}", log.sent.len()))
    }
}

pub struct ScriptedConnector {
    pub balances: HashMap<String, Amount>,
    pub failures: HashMap<String, u32>,
    pub refuse: bool,
    pub log: Arc<Mutex<WalletLog>>,
}

impl ScriptedConnector {
    pub fn with_balance(symbol: &str, amount: &str) -> Self {
        let mut balances = HashMap::new();
        balances.insert(symbol.to_string(), d(amount));
        Self {
            balances,
            failures: HashMap::new(),
            refuse: false,
            log: Arc::default(),
        }
    }
}

#[async_trait]
impl WalletConnector for ScriptedConnector {
    async fn connect(&self, account: &str) -> Result<Box<dyn Wallet>> {
        if self.refuse {
            return Err(Error::Connection("signer unreachable".into()));
        }
        Ok(Box::new(ScriptedWallet {
            account: account.to_string(),
            balances: self.balances.clone(),
            failures: self.failures.clone(),
            log: Arc::clone(&self.log),
        }))
    }
}
