mod engine;
mod events;
mod rates;
mod solver;
mod types;

pub use engine::{compute_retirement_projection, consumption_horizon, required_capital_at_retirement};
pub use rates::monthly_rate;
pub use solver::{
    ContributionSolution, IncomeSolution, SolverConfig, required_contribution,
    solve_required_contribution, solve_sustainable_income, sustainable_income,
};
pub use types::{
    CashflowYear, LiquidityEvent, Phase, ProjectionResult, Recurrence, SimulationParameters,
    TrajectoryPoint,
};
