//! Read-only income projection over a player's holdings.

use crate::EngineError;
use persistence::{EntityGateway, GatewayError};
use sim_core::{
    validate_enterprise, validate_investment, validate_territory, InvestmentStatus, PlayerId,
    SimulationResult, ValidationError,
};
use sim_econ::{project_income, IncomeRates};
use tracing::warn;

/// State simulator: fetches holdings and projects one cycle of income.
#[derive(Clone, Debug)]
pub struct StateSimulator {
    rates: IncomeRates,
}

/// A failed read contributes nothing to the cycle.
fn or_empty<T>(
    source: &'static str,
    player: &PlayerId,
    res: Result<Vec<T>, GatewayError>,
) -> Vec<T> {
    res.unwrap_or_else(|err| {
        warn!(player_id = %player, source, error = %err, "holdings read failed; counting zero");
        Vec::new()
    })
}

/// Drop records that fail validation.
fn valid_only<T>(items: Vec<T>, check: fn(&T) -> Result<(), ValidationError>) -> Vec<T> {
    items
        .into_iter()
        .filter(|item| match check(item) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "skipping invalid holding");
                false
            }
        })
        .collect()
}

impl StateSimulator {
    pub fn new(rates: IncomeRates) -> Self {
        Self { rates }
    }

    pub fn rates(&self) -> &IncomeRates {
        &self.rates
    }

    /// Project income for `player`. The three reads run concurrently.
    pub async fn simulate(
        &self,
        gateway: &dyn EntityGateway,
        player: &PlayerId,
    ) -> Result<SimulationResult, EngineError> {
        let (enterprises, territories, investments) = tokio::join!(
            gateway.list_enterprises(player),
            gateway.list_territories(player),
            gateway.list_investments(player, InvestmentStatus::Active),
        );
        let enterprises = valid_only(
            or_empty("enterprises", player, enterprises),
            validate_enterprise,
        );
        let territories = valid_only(
            or_empty("territories", player, territories),
            validate_territory,
        );
        let investments = valid_only(
            or_empty("investments", player, investments),
            validate_investment,
        );
        Ok(project_income(
            &enterprises,
            &territories,
            &investments,
            &self.rates,
        )?)
    }
}
