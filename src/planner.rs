use crate::error::{Error, Result};
use crate::models::{Amount, PlannedTransfer, Snapshot, TransferPlan};
use crate::quantize::Quantizer;
use crate::snapshot::SnapshotCodec;
use rust_decimal::Decimal;
use std::path::Path;
use tracing::warn;

/// Whether transfers are really sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Live,
    /// Validates and logs everything, sends nothing.
    Simulation,
}

impl RunMode {
    pub fn is_simulation(self) -> bool {
        self == RunMode::Simulation
    }
}

/// Result of a passed sufficiency check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sufficiency {
    Covered,
    /// Only possible in simulation: the treasury is short by `shortfall`.
    Short { shortfall: Amount },
}

pub struct DistributionPlanner {
    codec: SnapshotCodec,
    send_quantizer: Quantizer,
}

impl DistributionPlanner {
    /// `codec` reads the snapshot; `send_quantizer` carries the precision of
    /// the token being paid out.
    pub fn new(codec: SnapshotCodec, send_quantizer: Quantizer) -> Self {
        Self {
            codec,
            send_quantizer,
        }
    }

    /// Reads and decodes a snapshot file.
    pub fn load(&self, path: &Path, symbol: Option<&str>) -> Result<Snapshot> {
        let text = std::fs::read_to_string(path)?;
        self.read(&text, symbol)
    }

    pub fn read(&self, text: &str, symbol: Option<&str>) -> Result<Snapshot> {
        self.codec.decode(text, symbol)
    }

    /// Turns a snapshot into payouts of `send_symbol`, ordered by account.
    pub fn plan(&self, snapshot: &Snapshot, send_symbol: &str) -> TransferPlan {
        let recomputed = snapshot.recomputed_total(self.codec.quantizer());
        if recomputed != snapshot.total {
            warn!(
                "Declared {} total {} differs from the sum of entries {}",
                snapshot.symbol, snapshot.total, recomputed
            );
        }

        let transfers: Vec<PlannedTransfer> = snapshot
            .entries
            .iter()
            .map(|(account, amount)| PlannedTransfer {
                account: account.clone(),
                amount: self.send_quantizer.quantize(*amount),
            })
            .filter(|t| t.amount > Decimal::ZERO)
            .collect();

        // Rounding each payout on its own can add up to more than the rounded
        // declared total; the treasury has to cover whichever is larger.
        let declared = self.send_quantizer.quantize(snapshot.total);
        let payable = self
            .send_quantizer
            .quantize(transfers.iter().map(|t| t.amount).sum());
        if payable > declared {
            warn!(
                "Payouts in {} add up to {}, more than the declared total {}; validating against the payouts",
                send_symbol, payable, declared
            );
        }

        TransferPlan {
            snapshot_symbol: snapshot.symbol.clone(),
            send_symbol: send_symbol.to_string(),
            transfers,
            total: declared.max(payable),
        }
    }

    pub fn plan_file(&self, path: &Path, symbol: Option<&str>, send_symbol: Option<&str>) -> Result<TransferPlan> {
        let snapshot = self.load(path, symbol)?;
        let send_symbol = send_symbol.unwrap_or(snapshot.symbol.as_str()).to_string();
        Ok(self.plan(&snapshot, &send_symbol))
    }

    /// Fails with `InsufficientFunds` when the plan total exceeds the
    /// treasury balance, unless running a simulation.
    pub fn validate(&self, plan: &TransferPlan, treasury: Amount, mode: RunMode) -> Result<Sufficiency> {
        let available = self.send_quantizer.quantize(treasury);
        if plan.total <= available {
            return Ok(Sufficiency::Covered);
        }
        if mode.is_simulation() {
            let shortfall = plan.total - available;
            warn!(
                "Treasury holds {} {} but the airdrop needs {} (short {}); continuing because this is a simulation",
                available, plan.send_symbol, plan.total, shortfall
            );
            return Ok(Sufficiency::Short { shortfall });
        }
        Err(Error::InsufficientFunds {
            symbol: plan.send_symbol.clone(),
            required: plan.total,
            available,
        })
    }
}
