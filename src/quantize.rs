// src/quantize.rs
use crate::error::{Error, Result};
use rust_decimal::prelude::FromStr;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;

/// Fixed-point rules for one token: every balance read from the chain or
/// written to a snapshot goes through `quantize`, using round-half-down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantizer {
    scale: u32,
}

impl Quantizer {
    /// Largest scale `rust_decimal` can represent.
    pub const MAX_SCALE: u32 = 28;

    pub fn new(scale: u32) -> Result<Self> {
        if scale > Self::MAX_SCALE {
            return Err(Error::Config(format!(
                "token precision {} exceeds the supported maximum of {}",
                scale,
                Self::MAX_SCALE
            )));
        }
        Ok(Self { scale })
    }

    /// Rounds to `scale` fractional digits; an exact half at the cutoff digit
    /// goes toward zero. The result always carries exactly `scale` digits so
    /// that formatting is stable (`12.5` becomes `12.50000000` at scale 8).
    pub fn quantize(&self, amount: Decimal) -> Decimal {
        let mut q = amount.round_dp_with_strategy(self.scale, RoundingStrategy::MidpointTowardZero);
        q.rescale(self.scale);
        if q.is_zero() {
            q.set_sign_positive(true);
        }
        q
    }

    /// Parses decimal text (plain or scientific notation) and quantizes it.
    pub fn parse(&self, raw: &str) -> Result<Decimal> {
        parse_decimal(raw).map(|d| self.quantize(d))
    }

    pub fn parse_value(&self, value: &Value) -> Result<Decimal> {
        parse_decimal_value(value).map(|d| self.quantize(d))
    }

    /// Fixed-point text with no exponent and no separators.
    pub fn format(&self, amount: Decimal) -> String {
        self.quantize(amount).to_string()
    }
}

/// Exact parse without rounding. Malformed text is an error, never zero.
pub fn parse_decimal(raw: &str) -> Result<Decimal> {
    let trimmed = raw.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| Error::InvalidAmount(raw.to_string()))
}

/// Chain tables return quantities either as JSON strings or numbers.
pub fn parse_decimal_value(value: &Value) -> Result<Decimal> {
    match value {
        Value::String(s) => parse_decimal(s),
        Value::Number(n) => parse_decimal(&n.to_string()),
        other => Err(Error::InvalidAmount(other.to_string())),
    }
}
