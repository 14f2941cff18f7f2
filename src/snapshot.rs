// src/snapshot.rs
//! Flat text snapshot format.
//!
//! ```text
//! BEE snapshot
//!
//! alice 12.50000000
//! carol 7.25000000
//!
//! 2 accounts total
//! 19.75000000 BEE
//! ```
//!
//! Every two-token line is an `<account> <amount>` entry, except the
//! `<symbol> snapshot` header and the `<total> <symbol>` trailer. The count
//! line and the older `<total> <symbol> total` trailer are also understood.

use crate::error::{Error, Result};
use crate::models::{Amount, Snapshot};
use crate::quantize::Quantizer;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;
use tracing::{debug, warn};

const HEADER_KEYWORD: &str = "snapshot";

/// What decode does when an account appears on more than one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Fail the decode.
    Reject,
    /// Add the amounts together.
    Sum,
    /// Keep the later line.
    LastWins,
}

impl FromStr for DuplicatePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reject" => Ok(DuplicatePolicy::Reject),
            "sum" => Ok(DuplicatePolicy::Sum),
            "last-wins" => Ok(DuplicatePolicy::LastWins),
            other => Err(Error::Config(format!(
                "DUPLICATE_POLICY must be reject, sum or last-wins, got {:?}",
                other
            ))),
        }
    }
}

/// Line order for encoded entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryOrder {
    #[default]
    Account,
    /// Largest balance first, ties broken by account.
    BalanceDesc,
}

#[derive(Debug, Clone)]
pub struct SnapshotCodec {
    quantizer: Quantizer,
    duplicates: DuplicatePolicy,
}

impl SnapshotCodec {
    pub fn new(quantizer: Quantizer, duplicates: DuplicatePolicy) -> Self {
        Self {
            quantizer,
            duplicates,
        }
    }

    pub fn quantizer(&self) -> &Quantizer {
        &self.quantizer
    }

    /// Symbol named by the `<symbol> snapshot` header, if the file has one.
    pub fn declared_symbol(text: &str) -> Option<&str> {
        text.lines().find_map(|line| {
            let mut tokens = line.split_whitespace();
            match (tokens.next(), tokens.next(), tokens.next()) {
                (Some(sym), Some(HEADER_KEYWORD), None) => Some(sym),
                _ => None,
            }
        })
    }

    pub fn encode(&self, snapshot: &Snapshot, order: EntryOrder) -> String {
        let mut entries: Vec<(&String, &Amount)> = snapshot.entries.iter().collect();
        if order == EntryOrder::BalanceDesc {
            entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        }

        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = writeln!(out, "{} {}", snapshot.symbol, HEADER_KEYWORD);
        out.push('\n');
        for (account, amount) in &entries {
            let _ = writeln!(out, "{} {}", account, self.quantizer.format(**amount));
        }
        out.push('\n');
        let _ = writeln!(out, "{} accounts total", entries.len());
        let _ = writeln!(
            out,
            "{} {}",
            self.quantizer.format(snapshot.total),
            snapshot.symbol
        );
        out
    }

    /// Parses snapshot text. `symbol` registers the trailer keyword for
    /// files without a header line; a header overrides it only if they agree.
    pub fn decode(&self, text: &str, symbol: Option<&str>) -> Result<Snapshot> {
        let mut symbol: Option<String> = symbol.map(str::to_string);
        let mut entries: BTreeMap<String, Amount> = BTreeMap::new();
        let mut seen: BTreeMap<String, usize> = BTreeMap::new();
        let mut total: Option<Amount> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let tokens: Vec<&str> = raw.split_whitespace().collect();

            match tokens.as_slice() {
                [] => continue,
                [sym, kw] if *kw == HEADER_KEYWORD => {
                    if let Some(existing) = &symbol {
                        if existing.as_str() != *sym {
                            return Err(parse_err(
                                line_no,
                                format!("file is for {} but {} was expected", sym, existing),
                            ));
                        }
                    }
                    symbol = Some(sym.to_string());
                }
                [amount, sym] if symbol.as_deref() == Some(*sym) => {
                    total = Some(self.amount(line_no, amount)?);
                }
                [amount, sym, "total"] if symbol.as_deref() == Some(*sym) => {
                    total = Some(self.amount(line_no, amount)?);
                }
                [count, "accounts", "total"] if count.parse::<usize>().is_ok() => {}
                [account, amount] => {
                    let amount = self.amount(line_no, amount)?;
                    if let Some(first) = seen.insert(account.to_string(), line_no) {
                        match self.duplicates {
                            DuplicatePolicy::Reject => {
                                return Err(parse_err(
                                    line_no,
                                    format!("duplicate account {} (first on line {})", account, first),
                                ))
                            }
                            DuplicatePolicy::Sum => {
                                let prev = entries.get(*account).copied().unwrap_or_default();
                                let sum = self.quantizer.quantize(prev + amount);
                                set_entry(&mut entries, account, sum);
                                continue;
                            }
                            DuplicatePolicy::LastWins => {
                                warn!("Duplicate account {} on line {}, keeping the later amount", account, line_no);
                            }
                        }
                    }
                    set_entry(&mut entries, account, amount);
                }
                _ => {
                    return Err(parse_err(
                        line_no,
                        format!("unrecognised line {:?}", raw.trim()),
                    ))
                }
            }
        }

        let symbol = symbol.ok_or_else(|| parse_err(0, "snapshot does not declare a symbol".into()))?;
        let total = match total {
            Some(t) => t,
            None => {
                warn!("No {} total line; using the sum of entries", symbol);
                self.quantizer.quantize(entries.values().copied().sum())
            }
        };
        debug!("Decoded {} snapshot: {} entries, total {}", symbol, entries.len(), total);

        Ok(Snapshot {
            symbol,
            entries,
            total,
        })
    }

    fn amount(&self, line: usize, raw: &str) -> Result<Amount> {
        self.quantizer
            .parse(raw)
            .map_err(|_| parse_err(line, format!("{:?} is not a decimal amount", raw)))
    }
}

/// Non-positive amounts are never kept; a later duplicate can remove an entry.
fn set_entry(entries: &mut BTreeMap<String, Amount>, account: &str, amount: Amount) {
    if amount > Decimal::ZERO {
        entries.insert(account.to_string(), amount);
    } else {
        entries.remove(account);
    }
}

fn parse_err(line: usize, reason: String) -> Error {
    Error::Parse { line, reason }
}
