//! Monetary and calendar value types shared across the message catalog.
//!
//! Monetary amounts are decimals paired with an ISO-4217 currency code.
//! Engagement rates and audience shares are percentages in `[0, 100]`; a
//! distribution must sum to 100 within a ±1 tolerance.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Validation errors for value types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// Currency code is not three uppercase ASCII letters.
    #[error("invalid currency code '{0}'")]
    InvalidCurrency(String),

    /// A monetary amount was negative where only non-negative is allowed.
    #[error("negative amount: {0}")]
    NegativeAmount(Decimal),

    /// A percentage fell outside `[0, 100]`.
    #[error("percentage out of range: {0}")]
    PercentOutOfRange(Decimal),

    /// A distribution did not sum to 100 within tolerance.
    #[error("distribution sums to {0}, expected 100 ±1")]
    DistributionSum(Decimal),

    /// A period ends before it starts.
    #[error("period end precedes start")]
    PeriodInverted,
}

/// A decimal amount with its currency code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Decimal amount.
    pub amount: Decimal,
    /// ISO-4217 currency code, e.g. `"USD"`.
    pub currency: String,
}

impl Money {
    /// Build a validated non-negative amount.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::InvalidCurrency`] unless the code is three
    /// uppercase ASCII letters, or [`ValueError::NegativeAmount`] for
    /// negative amounts.
    pub fn new(amount: Decimal, currency: &str) -> Result<Self, ValueError> {
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ValueError::InvalidCurrency(currency.to_string()));
        }
        if amount.is_sign_negative() {
            return Err(ValueError::NegativeAmount(amount));
        }
        Ok(Self {
            amount,
            currency: currency.to_string(),
        })
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// A business date range; the end is open-ended when `None`.
///
/// Business dates travel as ISO-8601 UTC on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Optional inclusive end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl Period {
    /// Build a validated period.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::PeriodInverted`] if `end < start`.
    pub fn new(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Result<Self, ValueError> {
        if let Some(end) = end
            && end < start
        {
            return Err(ValueError::PeriodInverted);
        }
        Ok(Self { start, end })
    }

    /// An open-ended period starting now-ish.
    #[must_use]
    pub const fn open_from(start: DateTime<Utc>) -> Self {
        Self { start, end: None }
    }
}

/// Commission pricing model for a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommissionKind {
    /// Cost per acquisition.
    Cpa,
    /// Cost per lead.
    Cpl,
    /// Cost per click.
    Cpc,
}

/// A campaign's commission: pricing model plus amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commission {
    /// Pricing model.
    pub kind: CommissionKind,
    /// Amount paid per unit of the model.
    pub amount: Money,
}

/// Contract engagement model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    /// Single deliverable engagement.
    OneOff,
    /// Fixed-term engagement.
    Temporary,
    /// Exclusive engagement for the period.
    Exclusive,
    /// Ongoing collaboration.
    Collaboration,
}

/// Validate a percentage in `[0, 100]`.
///
/// # Errors
///
/// Returns [`ValueError::PercentOutOfRange`] outside the range.
pub fn validate_percent(value: Decimal) -> Result<(), ValueError> {
    if value.is_sign_negative() || value > Decimal::ONE_HUNDRED {
        return Err(ValueError::PercentOutOfRange(value));
    }
    Ok(())
}

/// Validate that shares sum to 100 within ±1.
///
/// An empty distribution is valid (nothing was declared).
///
/// # Errors
///
/// Returns [`ValueError::PercentOutOfRange`] for any share outside
/// `[0, 100]`, or [`ValueError::DistributionSum`] when the total misses 100
/// by more than 1.
pub fn validate_distribution(shares: &[Decimal]) -> Result<(), ValueError> {
    if shares.is_empty() {
        return Ok(());
    }
    let mut total = Decimal::ZERO;
    for share in shares {
        validate_percent(*share)?;
        total += *share;
    }
    if (total - Decimal::ONE_HUNDRED).abs() > Decimal::ONE {
        return Err(ValueError::DistributionSum(total));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn money_rejects_bad_currency() {
        assert!(matches!(
            Money::new(d("10.00"), "usd"),
            Err(ValueError::InvalidCurrency(_))
        ));
        assert!(matches!(
            Money::new(d("10.00"), "DOLLARS"),
            Err(ValueError::InvalidCurrency(_))
        ));
        assert!(Money::new(d("10.00"), "USD").is_ok());
    }

    #[test]
    fn money_rejects_negative_amount() {
        assert!(matches!(
            Money::new(d("-1"), "USD"),
            Err(ValueError::NegativeAmount(_))
        ));
    }

    #[test]
    fn money_serializes_amount_as_string() {
        let money = Money::new(d("100.50"), "USD").unwrap();
        let json = serde_json::to_value(&money).unwrap();
        assert_eq!(json["amount"], serde_json::json!("100.50"));
        assert_eq!(json["currency"], serde_json::json!("USD"));
    }

    #[test]
    fn period_rejects_inverted_range() {
        let start = Utc::now();
        let end = start - chrono::Duration::days(1);
        assert!(matches!(
            Period::new(start, Some(end)),
            Err(ValueError::PeriodInverted)
        ));
        assert!(Period::new(start, None).is_ok());
    }

    #[test]
    fn commission_kind_wire_names() {
        let json = serde_json::to_string(&CommissionKind::Cpa).unwrap();
        assert_eq!(json, "\"cpa\"");
        let kind: CommissionKind = serde_json::from_str("\"cpl\"").unwrap();
        assert_eq!(kind, CommissionKind::Cpl);
    }

    #[test]
    fn contract_kind_wire_names() {
        let json = serde_json::to_string(&ContractKind::OneOff).unwrap();
        assert_eq!(json, "\"one_off\"");
        let kind: ContractKind = serde_json::from_str("\"collaboration\"").unwrap();
        assert_eq!(kind, ContractKind::Collaboration);
    }

    #[test]
    fn distribution_tolerance_is_one_percent() {
        let ok = [d("50.5"), d("49.0")];
        assert!(validate_distribution(&ok).is_ok());

        let off = [d("50.0"), d("47.0")];
        assert!(matches!(
            validate_distribution(&off),
            Err(ValueError::DistributionSum(_))
        ));

        // Empty distribution means nothing was declared.
        assert!(validate_distribution(&[]).is_ok());
    }

    #[test]
    fn percent_range_is_enforced() {
        assert!(validate_percent(d("100.0")).is_ok());
        assert!(validate_percent(d("0")).is_ok());
        assert!(validate_percent(d("100.1")).is_err());
        assert!(validate_percent(d("-0.1")).is_err());
    }
}
