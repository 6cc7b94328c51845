use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    #[default]
    Once,
    Annual,
    Monthly,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidityEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub value: f64,
    pub is_positive: bool,
    #[serde(default)]
    pub recurrence: Recurrence,
    #[serde(default)]
    pub start_age: Option<u32>,
    // Legacy single-age field; used when start_age is absent.
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub end_age: Option<u32>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl LiquidityEvent {
    pub fn is_active(&self) -> bool {
        self.enabled != Some(false)
    }

    pub fn effective_start_age(&self, fallback_age: u32) -> u32 {
        self.start_age.or(self.age).unwrap_or(fallback_age)
    }

    pub fn effective_end_age(&self, cap: u32) -> u32 {
        self.end_age.unwrap_or(cap).min(cap)
    }
}

#[derive(Debug, Clone)]
pub struct SimulationParameters {
    pub current_age: u32,
    pub retirement_age: u32,
    pub life_expectancy: u32,
    pub current_capital: f64,
    // None means "solve for the required contribution".
    pub monthly_contribution: Option<f64>,
    pub desired_monthly_withdrawal: f64,
    pub real_return_accumulation: f64,
    pub real_return_consumption: f64,
    pub is_perpetuity: bool,
    pub lock_withdrawal_to_target: bool,
    pub force_final_zero_at_end: bool,
    pub override_end_age: Option<u32>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Accumulation,
    Consumption,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectoryPoint {
    pub age: u32,
    pub capital: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashflowYear {
    pub age: u32,
    pub phase: Phase,
    pub opening_capital: f64,
    pub events_net: f64,
    pub contribution: f64,
    pub investment_return: f64,
    pub withdrawal: f64,
    pub closing_capital: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionResult {
    pub required_capital: f64,
    pub monthly_contribution: f64,
    pub monthly_income: f64,
    pub capital_trajectory: Vec<TrajectoryPoint>,
    pub annual_cash_flow_table: Vec<CashflowYear>,
    pub depletion_age: Option<u32>,
}
