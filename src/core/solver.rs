use super::engine::{
    SimulationMode, SimulationSpec, accumulation_months, consumption_horizon, finite_or_zero,
    required_capital_raw, run_cashflow_simulation,
};
use super::events::future_value_at_retirement;
use super::rates::{annuity_fv_factor, compound, monthly_rate};
use super::types::{LiquidityEvent, SimulationParameters};

#[derive(Debug, Clone, Copy)]
pub struct SolverConfig {
    // Absolute tolerance, in currency units, on the bisection target.
    pub tolerance: f64,
    pub max_iterations: u32,
    pub bracket_growth: f64,
    pub max_bracket_iterations: u32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.5,
            max_iterations: 32,
            bracket_growth: 1.8,
            max_bracket_iterations: 28,
        }
    }
}

const INITIAL_SEARCH_BOUND: f64 = 100.0;

#[derive(Debug, Clone, Copy)]
pub struct ContributionSolution {
    pub monthly_contribution: f64,
    // Signed capital left at the horizon when simulating with the solution.
    pub terminal_capital: f64,
    pub converged: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct IncomeSolution {
    pub monthly_income: f64,
    pub depletion_age: Option<u32>,
    pub converged: bool,
}

pub fn required_contribution(params: &SimulationParameters, events: &[LiquidityEvent]) -> f64 {
    solve_required_contribution(params, events, SolverConfig::default()).monthly_contribution
}

pub fn sustainable_income(params: &SimulationParameters, events: &[LiquidityEvent]) -> f64 {
    solve_sustainable_income(params, events, SolverConfig::default()).monthly_income
}

pub fn solve_required_contribution(
    params: &SimulationParameters,
    events: &[LiquidityEvent],
    config: SolverConfig,
) -> ContributionSolution {
    if params.is_perpetuity {
        return perpetuity_contribution(params, events);
    }

    let horizon_end = consumption_horizon(params);
    let objective = |contribution: f64| -> f64 {
        run_cashflow_simulation(&SimulationSpec {
            params,
            events,
            monthly_contribution: contribution,
            monthly_withdrawal: params.desired_monthly_withdrawal,
            horizon_end,
            yield_only: false,
            force_exact_zero: false,
            mode: SimulationMode::Objective,
        })
        .terminal_capital
    };

    let at_zero = objective(0.0);
    if at_zero >= 0.0 {
        return ContributionSolution {
            monthly_contribution: 0.0,
            terminal_capital: at_zero,
            converged: true,
        };
    }
    if accumulation_months(params) == 0 {
        // No accumulation window: contributions cannot move the outcome.
        return ContributionSolution {
            monthly_contribution: 0.0,
            terminal_capital: at_zero,
            converged: false,
        };
    }

    let mut high = INITIAL_SEARCH_BOUND;
    let mut bracketed = false;
    for step in 0..config.max_bracket_iterations {
        if objective(high) > 0.0 {
            bracketed = true;
            break;
        }
        if step + 1 < config.max_bracket_iterations {
            high *= config.bracket_growth;
        }
    }
    if !bracketed {
        // Bound expansion budget exhausted; report the largest bound tried
        // rather than searching forever.
        return ContributionSolution {
            monthly_contribution: high,
            terminal_capital: objective(high),
            converged: false,
        };
    }

    let mut low = 0.0;
    let mut mid = 0.0;
    let mut residual = at_zero;
    let mut converged = false;
    for _ in 0..config.max_iterations {
        mid = 0.5 * (low + high);
        residual = objective(mid);
        if residual.abs() <= config.tolerance {
            converged = true;
            break;
        }
        if residual < 0.0 {
            low = mid;
        } else {
            high = mid;
        }
    }

    ContributionSolution {
        monthly_contribution: mid,
        terminal_capital: residual,
        converged,
    }
}

fn perpetuity_contribution(
    params: &SimulationParameters,
    events: &[LiquidityEvent],
) -> ContributionSolution {
    let months = accumulation_months(params);
    let rate = monthly_rate(params.real_return_accumulation);
    let target = required_capital_raw(params, events);
    let capital_at_retirement = params.current_capital * compound(rate, months as i32)
        + future_value_at_retirement(events, params.current_age, params.retirement_age, rate);
    let shortfall = target - capital_at_retirement;

    if shortfall <= 0.0 {
        return ContributionSolution {
            monthly_contribution: 0.0,
            terminal_capital: finite_or_zero(-shortfall),
            converged: true,
        };
    }
    if !shortfall.is_finite() || months == 0 {
        // Unreachable goal (zero-rate perpetuity, or no accumulation window).
        return ContributionSolution {
            monthly_contribution: 0.0,
            terminal_capital: 0.0,
            converged: false,
        };
    }

    let payment = shortfall / annuity_fv_factor(rate, months);
    ContributionSolution {
        monthly_contribution: finite_or_zero(payment),
        terminal_capital: 0.0,
        converged: true,
    }
}

pub fn solve_sustainable_income(
    params: &SimulationParameters,
    events: &[LiquidityEvent],
    config: SolverConfig,
) -> IncomeSolution {
    let horizon_end = consumption_horizon(params);
    let contribution = params.monthly_contribution.unwrap_or(0.0);
    let depletion_for = |income: f64| -> Option<u32> {
        run_cashflow_simulation(&SimulationSpec {
            params,
            events,
            monthly_contribution: contribution,
            monthly_withdrawal: income,
            horizon_end,
            yield_only: false,
            force_exact_zero: false,
            mode: SimulationMode::Objective,
        })
        .depletion_age
    };
    let survives = |depletion: Option<u32>| depletion.is_none_or(|age| age >= horizon_end);

    let zero_depletion = depletion_for(0.0);
    if !survives(zero_depletion) {
        // Events alone drain the capital before the horizon; nothing can be withdrawn.
        return IncomeSolution {
            monthly_income: 0.0,
            depletion_age: zero_depletion,
            converged: true,
        };
    }

    let mut high = INITIAL_SEARCH_BOUND.max(params.desired_monthly_withdrawal);
    let mut bracketed = false;
    for step in 0..config.max_bracket_iterations {
        if !survives(depletion_for(high)) {
            bracketed = true;
            break;
        }
        if step + 1 < config.max_bracket_iterations {
            high *= config.bracket_growth;
        }
    }
    if !bracketed {
        return IncomeSolution {
            monthly_income: high,
            depletion_age: depletion_for(high),
            converged: false,
        };
    }

    let mut low = 0.0;
    for _ in 0..config.max_iterations {
        let mid = 0.5 * (low + high);
        if survives(depletion_for(mid)) {
            low = mid;
        } else {
            high = mid;
        }
        if high - low <= config.tolerance {
            break;
        }
    }

    IncomeSolution {
        monthly_income: low,
        depletion_age: depletion_for(low),
        converged: high - low <= config.tolerance,
    }
}
