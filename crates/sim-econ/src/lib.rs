#![deny(warnings)]

//! Economic models: per-cycle income projection for the Underworld engine.
//!
//! This module provides validated, pure helpers for:
//! - Enterprise output income
//! - Territory protection tax
//! - The per-cycle share of investment daily returns
//!
//! The multipliers are balance tuning, not invariants, so they live in
//! [`IncomeRates`] and are supplied through engine configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sim_core::{CriminalEnterprise, Investment, InvestmentStatus, SimulationResult, Territory};
use thiserror::Error;

/// Errors produced by economic helpers.
#[derive(Debug, Error, PartialEq)]
pub enum EconError {
    /// A divisor (tax divisor, cycles per day) must be strictly positive.
    #[error("{0} must be > 0")]
    NonPositiveDivisor(&'static str),
    /// Multipliers and defaults must be non-negative.
    #[error("{0} must be >= 0")]
    NegativeRate(&'static str),
    /// A product or sum left the representable decimal range.
    #[error("income arithmetic overflowed")]
    Overflow,
}

/// Balance constants feeding the income formulas.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncomeRates {
    /// Income per unit of enterprise production rate.
    pub enterprise_multiplier: Decimal,
    /// Tax rate (percent) applied when a territory has none.
    pub default_tax_rate: Decimal,
    /// Assessed value applied when a territory has none.
    pub default_territory_value: Decimal,
    /// Divisor turning `tax_rate * value` into income.
    pub tax_divisor: Decimal,
    /// Cycles per in-game day; an investment pays `daily_return / cycles_per_day` per cycle.
    pub cycles_per_day: Decimal,
}

impl Default for IncomeRates {
    fn default() -> Self {
        Self {
            enterprise_multiplier: Decimal::from(10),
            default_tax_rate: Decimal::from(2),
            default_territory_value: Decimal::from(50_000),
            tax_divisor: Decimal::from(100),
            cycles_per_day: Decimal::from(48),
        }
    }
}

impl IncomeRates {
    /// Check that every rate is usable.
    pub fn validate(&self) -> Result<(), EconError> {
        if self.tax_divisor <= Decimal::ZERO {
            return Err(EconError::NonPositiveDivisor("tax_divisor"));
        }
        if self.cycles_per_day <= Decimal::ZERO {
            return Err(EconError::NonPositiveDivisor("cycles_per_day"));
        }
        if self.enterprise_multiplier < Decimal::ZERO {
            return Err(EconError::NegativeRate("enterprise_multiplier"));
        }
        if self.default_tax_rate < Decimal::ZERO {
            return Err(EconError::NegativeRate("default_tax_rate"));
        }
        if self.default_territory_value < Decimal::ZERO {
            return Err(EconError::NegativeRate("default_territory_value"));
        }
        Ok(())
    }
}

/// Sum of per-item terms, failing if any term or the running total overflows.
fn checked_sum(terms: impl IntoIterator<Item = Option<Decimal>>) -> Result<Decimal, EconError> {
    terms.into_iter().try_fold(Decimal::ZERO, |acc, term| {
        term.and_then(|t| acc.checked_add(t)).ok_or(EconError::Overflow)
    })
}

/// Income from enterprises: sum(production_rate * multiplier).
///
/// Example:
/// one enterprise at production rate 10 with the default multiplier yields 100.
pub fn enterprise_income(
    enterprises: &[CriminalEnterprise],
    rates: &IncomeRates,
) -> Result<Decimal, EconError> {
    checked_sum(
        enterprises
            .iter()
            .map(|e| e.production_rate.checked_mul(rates.enterprise_multiplier)),
    )
}

/// Income from territories: sum(tax_rate * value / tax_divisor), with
/// configured defaults for missing tax rate or value.
///
/// Example:
/// tax 2, value 50_000 and divisor 100 yield 1_000.
pub fn territory_income(
    territories: &[Territory],
    rates: &IncomeRates,
) -> Result<Decimal, EconError> {
    if rates.tax_divisor <= Decimal::ZERO {
        return Err(EconError::NonPositiveDivisor("tax_divisor"));
    }
    checked_sum(territories.iter().map(|t| {
        let tax = t.tax_rate.unwrap_or(rates.default_tax_rate);
        let value = t.value.unwrap_or(rates.default_territory_value);
        tax.checked_mul(value).and_then(|v| v.checked_div(rates.tax_divisor))
    }))
}

/// Per-cycle share of daily returns over active investments.
///
/// Inactive investments are ignored even if a caller passes them in.
pub fn investment_income(
    investments: &[Investment],
    rates: &IncomeRates,
) -> Result<Decimal, EconError> {
    if rates.cycles_per_day <= Decimal::ZERO {
        return Err(EconError::NonPositiveDivisor("cycles_per_day"));
    }
    checked_sum(
        investments
            .iter()
            .filter(|i| i.status == InvestmentStatus::Active)
            .map(|i| i.daily_return.checked_div(rates.cycles_per_day)),
    )
}

/// Project one cycle of income from the player's current holdings.
///
/// The total is rounded to cents so that the amount credited and the amount
/// recorded in the ledger are the same value in every backend.
pub fn project_income(
    enterprises: &[CriminalEnterprise],
    territories: &[Territory],
    investments: &[Investment],
    rates: &IncomeRates,
) -> Result<SimulationResult, EconError> {
    let enterprise = enterprise_income(enterprises, rates)?;
    let territory = territory_income(territories, rates)?;
    let investment = investment_income(investments, rates)?;
    let total = checked_sum([Some(enterprise), Some(territory), Some(investment)])?;
    let active = investments
        .iter()
        .filter(|i| i.status == InvestmentStatus::Active)
        .count();
    Ok(SimulationResult {
        total_income: total.round_dp(2),
        enterprise_income: enterprise,
        territory_income: territory,
        investment_income: investment,
        enterprise_count: enterprises.len(),
        territory_count: territories.len(),
        investment_count: active,
    })
}
