// src/executor.rs
use crate::config::AirdropConfig;
use crate::error::Result;
use crate::ledger::RunLedger;
use crate::models::{PlannedTransfer, TransferOutcome, TransferPlan};
use crate::planner::RunMode;
use crate::quantize::Quantizer;
use crate::wallet::Wallet;
use std::time::Duration;
use tokio::time::sleep;

/// Retry and rate-limit timing for transfers.
pub trait RetryPolicy: Send + Sync {
    /// Total attempts per recipient, including the first.
    fn max_attempts(&self) -> u32;

    /// Wait after failed attempt number `attempt` before the next one.
    fn backoff(&self, attempt: u32) -> Duration;

    /// Wait between two different recipients.
    fn pacing(&self) -> Duration;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub pacing: Duration,
}

impl FixedBackoff {
    pub fn from_config(cfg: &AirdropConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            backoff: Duration::from_secs(cfg.retry_backoff_secs),
            pacing: Duration::from_secs(cfg.pacing_secs),
        }
    }

    /// No waiting at all.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Duration::ZERO,
            pacing: Duration::ZERO,
        }
    }
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
            pacing: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy for FixedBackoff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn backoff(&self, _attempt: u32) -> Duration {
        self.backoff
    }

    fn pacing(&self) -> Duration {
        self.pacing
    }
}

/// Lifecycle of one recipient's transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Pending,
    Sending { attempt: u32 },
    Retrying { attempt: u32 },
    Succeeded { attempts: u32 },
    Failed { attempts: u32 },
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Succeeded { .. } | TransferState::Failed { .. })
    }

    /// Pending → Sending, Retrying → Sending with the next attempt number.
    pub fn send(self) -> Self {
        match self {
            TransferState::Pending => TransferState::Sending { attempt: 1 },
            TransferState::Retrying { attempt } => TransferState::Sending { attempt: attempt + 1 },
            other => other,
        }
    }

    pub fn succeeded(self) -> Self {
        match self {
            TransferState::Sending { attempt } => TransferState::Succeeded { attempts: attempt },
            other => other,
        }
    }

    /// Retrying while attempts remain, Failed once `max_attempts` is used up.
    pub fn failed(self, max_attempts: u32) -> Self {
        match self {
            TransferState::Sending { attempt } if attempt < max_attempts => {
                TransferState::Retrying { attempt }
            }
            TransferState::Sending { attempt } => TransferState::Failed { attempts: attempt },
            other => other,
        }
    }
}

pub struct TransferExecutor<'a> {
    wallet: &'a mut dyn Wallet,
    policy: &'a dyn RetryPolicy,
    quantizer: Quantizer,
    mode: RunMode,
    memo: String,
}

impl<'a> TransferExecutor<'a> {
    pub fn new(
        wallet: &'a mut dyn Wallet,
        policy: &'a dyn RetryPolicy,
        quantizer: Quantizer,
        mode: RunMode,
        memo: impl Into<String>,
    ) -> Self {
        Self {
            wallet,
            policy,
            quantizer,
            mode,
            memo: memo.into(),
        }
    }

    /// Sends every planned transfer in order. A failed recipient is recorded
    /// and the run moves on; only audit-log write errors stop it.
    pub async fn execute(&mut self, plan: &TransferPlan, ledger: &mut RunLedger) -> Result<()> {
        for (idx, transfer) in plan.transfers.iter().enumerate() {
            if idx > 0 && !self.mode.is_simulation() {
                sleep(self.policy.pacing()).await;
            }

            let outcome = self.send_one(transfer, &plan.send_symbol, ledger).await?;
            if outcome.success {
                ledger.info("transfer SUCCESS")?;
            } else {
                ledger.error("transfer FAILED!!")?;
            }
            ledger.record(outcome);
        }
        Ok(())
    }

    /// Drives one recipient through the retry state machine.
    pub async fn send_one(
        &mut self,
        transfer: &PlannedTransfer,
        symbol: &str,
        ledger: &mut RunLedger,
    ) -> Result<TransferOutcome> {
        let amount = self.quantizer.format(transfer.amount);
        ledger.info(format!("sending {} {} to {}", amount, symbol, transfer.account))?;

        let mut state = TransferState::Pending;
        while !state.is_terminal() {
            state = state.send();
            let TransferState::Sending { attempt } = state else {
                break;
            };

            if self.mode.is_simulation() {
                ledger.info(format!(
                    "[dry-run] would send {} {} to {} (attempt {})",
                    amount, symbol, transfer.account, attempt
                ))?;
                state = state.succeeded();
                continue;
            }

            match self.attempt(&transfer.account, &amount, symbol).await {
                Ok(receipt) => {
                    ledger.info(receipt)?;
                    state = state.succeeded();
                }
                Err(e) => {
                    ledger.error(format!(
                        "transfer attempt {} to {} failed: {}",
                        attempt, transfer.account, e
                    ))?;
                    state = state.failed(self.policy.max_attempts());
                    if let TransferState::Retrying { attempt } = state {
                        sleep(self.policy.backoff(attempt)).await;
                    }
                }
            }
        }

        let (attempts, success) = match state {
            TransferState::Succeeded { attempts } => (attempts, true),
            TransferState::Failed { attempts } => (attempts, false),
            _ => (0, false),
        };
        Ok(TransferOutcome {
            account: transfer.account.clone(),
            amount: transfer.amount,
            attempts,
            success,
        })
    }

    async fn attempt(&mut self, to: &str, amount: &str, symbol: &str) -> Result<String> {
        // Re-read the wallet first so the transfer is built on fresh state.
        self.wallet.refresh().await?;
        self.wallet.transfer(to, amount, symbol, &self.memo).await
    }
}
