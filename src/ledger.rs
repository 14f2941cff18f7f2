// src/ledger.rs
use crate::error::Result;
use crate::models::TransferOutcome;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{error, info, warn};

/// Per-run audit trail. Every line goes to the console through `tracing`
/// and to the audit sink, flushed immediately so a crash leaves a truthful
/// partial record.
pub struct RunLedger {
    sink: Box<dyn Write + Send>,
    outcomes: Vec<TransferOutcome>,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub failed_accounts: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

impl RunLedger {
    /// Opens `path` for appending; earlier runs stay in the file.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Self::from_writer(Box::new(file))
    }

    pub fn from_writer(sink: Box<dyn Write + Send>) -> Result<Self> {
        let mut ledger = Self {
            sink,
            outcomes: Vec::new(),
            started_at: Utc::now(),
        };
        let banner = format!("--- run started {} ---", ledger.started_at.to_rfc3339());
        ledger.info(banner)?;
        Ok(ledger)
    }

    pub fn info(&mut self, line: impl AsRef<str>) -> Result<()> {
        info!("{}", line.as_ref());
        self.append(line.as_ref())
    }

    pub fn warn(&mut self, line: impl AsRef<str>) -> Result<()> {
        warn!("{}", line.as_ref());
        self.append(line.as_ref())
    }

    pub fn error(&mut self, line: impl AsRef<str>) -> Result<()> {
        error!("{}", line.as_ref());
        self.append(line.as_ref())
    }

    fn append(&mut self, line: &str) -> Result<()> {
        writeln!(self.sink, "{}", line)?;
        self.sink.flush()?;
        Ok(())
    }

    pub fn record(&mut self, outcome: TransferOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[TransferOutcome] {
        &self.outcomes
    }

    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.len() - self.success_count()
    }

    /// Writes the closing report and returns the counts.
    pub fn finish(mut self) -> Result<RunSummary> {
        let failed_accounts: Vec<String> = self
            .outcomes
            .iter()
            .filter(|o| !o.success)
            .map(|o| o.account.clone())
            .collect();

        let summary = RunSummary {
            succeeded: self.success_count(),
            failed: failed_accounts.len(),
            failed_accounts,
            started_at: self.started_at,
            finished_at: Utc::now(),
        };

        if summary.all_succeeded() {
            self.info("all transfers SUCCESS")?;
        } else {
            self.error("at least one transfer FAILED!! please review log")?;
            for outcome in self.outcomes.clone().iter().filter(|o| !o.success) {
                self.error(format!(
                    "needs manual re-send: {} {}",
                    outcome.account, outcome.amount
                ))?;
            }
        }
        self.info(format!("success count: {}", summary.succeeded))?;
        self.info(format!("failure count: {}", summary.failed))?;

        Ok(summary)
    }
}
