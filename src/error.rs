// src/error.rs
use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid amount {0:?}")]
    InvalidAmount(String),

    #[error("snapshot line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("{symbol}: treasury holds {available} but the snapshot needs {required}")]
    InsufficientFunds {
        symbol: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("page fetch failed for {source_name} at offset {offset}: {reason}")]
    FetchPage {
        source_name: String,
        offset: usize,
        reason: String,
    },

    #[error("{0} is not a valid symbol")]
    UnknownSymbol(String),

    #[error("config: {0}")]
    Config(String),

    #[error("rpc: {0}")]
    Rpc(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whole-run errors abort before any transfer is sent. Per-item errors
    /// (one transfer, one page) are collected and the run continues.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Transfer(_) | Error::FetchPage { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Rpc(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Rpc(format!("malformed response: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_item_errors_are_not_fatal() {
        assert!(!Error::Transfer("timeout".into()).is_fatal());
        assert!(!Error::FetchPage {
            source_name: "balances".into(),
            offset: 0,
            reason: "502".into()
        }
        .is_fatal());
        assert!(Error::Connection("refused".into()).is_fatal());
        assert!(Error::Parse { line: 3, reason: "bad".into() }.is_fatal());
    }
}
