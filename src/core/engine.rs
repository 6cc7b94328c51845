use super::events::{events_for_year, future_value_at_retirement, present_value_at_retirement};
use super::rates::{RATE_EPSILON, annual_equivalent, annuity_fv_factor, annuity_pv_factor, compound, monthly_rate};
use super::solver::{SolverConfig, solve_required_contribution, solve_sustainable_income};
use super::types::{
    CashflowYear, LiquidityEvent, Phase, ProjectionResult, SimulationParameters, TrajectoryPoint,
};

const DEFAULT_HORIZON_NOT_YET_RETIRED: u32 = 99;
const DEFAULT_HORIZON_ALREADY_RETIRED: u32 = 100;

pub fn consumption_horizon(params: &SimulationParameters) -> u32 {
    params
        .override_end_age
        .unwrap_or(if params.retirement_age > params.current_age {
            DEFAULT_HORIZON_NOT_YET_RETIRED
        } else {
            DEFAULT_HORIZON_ALREADY_RETIRED
        })
}

pub(crate) fn accumulation_months(params: &SimulationParameters) -> u32 {
    params.retirement_age.saturating_sub(params.current_age) * 12
}

// Non-finite intermediates collapse to zero; -0.0 is normalized for display.
pub(crate) fn finite_or_zero(value: f64) -> f64 {
    if !value.is_finite() {
        0.0
    } else if value == 0.0 {
        0.0
    } else {
        value
    }
}

pub(crate) fn required_capital_raw(
    params: &SimulationParameters,
    events: &[LiquidityEvent],
) -> f64 {
    let rate = monthly_rate(params.real_return_consumption);
    let horizon_end = consumption_horizon(params);
    let gross = if params.is_perpetuity {
        if rate.abs() < RATE_EPSILON {
            // Goal unreachable: no yield to live off. Stays internal, callers sanitize.
            f64::INFINITY
        } else {
            params.desired_monthly_withdrawal / rate
        }
    } else {
        let months = horizon_end.saturating_sub(params.retirement_age) * 12;
        params.desired_monthly_withdrawal * annuity_pv_factor(rate, months)
    };
    let events_value = present_value_at_retirement(
        events,
        params.retirement_age,
        horizon_end.saturating_sub(1),
        params.current_age,
        rate,
    );
    (gross - events_value).max(0.0)
}

pub fn required_capital_at_retirement(
    params: &SimulationParameters,
    events: &[LiquidityEvent],
) -> f64 {
    finite_or_zero(required_capital_raw(params, events))
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum SimulationMode {
    // Display semantics: depletion clamping, frozen state after exhaustion,
    // optional exact-zero final year.
    Reporting,
    // Raw signed capital for solver objectives; never clamps or freezes.
    Objective,
}

#[derive(Debug)]
pub(crate) struct SimulationSpec<'a> {
    pub params: &'a SimulationParameters,
    pub events: &'a [LiquidityEvent],
    pub monthly_contribution: f64,
    pub monthly_withdrawal: f64,
    pub horizon_end: u32,
    pub yield_only: bool,
    pub force_exact_zero: bool,
    pub mode: SimulationMode,
}

#[derive(Debug)]
pub(crate) struct SimulationOutcome {
    pub trajectory: Vec<TrajectoryPoint>,
    pub rows: Vec<CashflowYear>,
    pub depletion_age: Option<u32>,
    pub terminal_capital: f64,
}

pub(crate) fn run_cashflow_simulation(spec: &SimulationSpec<'_>) -> SimulationOutcome {
    let params = spec.params;
    let reporting = spec.mode == SimulationMode::Reporting;
    let accumulation_rate = monthly_rate(params.real_return_accumulation);
    let consumption_rate = monthly_rate(params.real_return_consumption);
    let event_cap = spec.horizon_end.saturating_sub(1);

    let year_count = spec.horizon_end.saturating_sub(params.current_age) as usize;
    let mut trajectory = Vec::with_capacity(year_count + 1);
    let mut rows = Vec::with_capacity(year_count);
    let mut capital = finite_or_zero(params.current_capital);
    let mut depletion_age = None;
    let mut frozen = false;

    if reporting {
        trajectory.push(TrajectoryPoint {
            age: params.current_age,
            capital: capital.max(0.0),
        });
    }

    for age in params.current_age..spec.horizon_end {
        let phase = if age < params.retirement_age {
            Phase::Accumulation
        } else {
            Phase::Consumption
        };
        let rate = match phase {
            Phase::Accumulation => accumulation_rate,
            Phase::Consumption => consumption_rate,
        };
        let growth = compound(rate, 12) - 1.0;

        if frozen {
            // Patrimony exhausted: later events, returns and withdrawals no longer apply.
            rows.push(CashflowYear {
                age,
                phase,
                opening_capital: 0.0,
                events_net: 0.0,
                contribution: 0.0,
                investment_return: 0.0,
                withdrawal: 0.0,
                closing_capital: 0.0,
            });
            trajectory.push(TrajectoryPoint {
                age: age + 1,
                capital: 0.0,
            });
            continue;
        }

        let year_events = events_for_year(spec.events, age, params.current_age, event_cap, rate);
        let opening = capital;
        let base = opening + year_events.lump;

        let mut contribution_principal = 0.0;
        let investment_return;
        let mut withdrawal = 0.0;
        let mut closing;

        match phase {
            Phase::Accumulation => {
                contribution_principal = spec.monthly_contribution * 12.0;
                let within_year_growth =
                    annual_equivalent(spec.monthly_contribution, rate) - contribution_principal;
                investment_return = base * growth + within_year_growth;
                closing = opening + year_events.net() + contribution_principal + investment_return;
            }
            Phase::Consumption => {
                investment_return = base * growth;
                let available = base + investment_return + year_events.monthly_equivalent;
                if spec.yield_only {
                    withdrawal = investment_return.max(0.0);
                } else {
                    withdrawal = annual_equivalent(spec.monthly_withdrawal, rate);
                }
                closing = available - withdrawal;

                let final_year = age + 1 == spec.horizon_end;
                if reporting {
                    if spec.force_exact_zero && final_year && !spec.yield_only {
                        withdrawal = available.max(0.0);
                        closing = 0.0;
                    } else if closing < 0.0 {
                        withdrawal = available.max(0.0);
                        closing = 0.0;
                        if depletion_age.is_none() {
                            depletion_age = Some(age);
                        }
                        if !params.is_perpetuity {
                            frozen = true;
                        }
                    }
                } else if closing < 0.0 && depletion_age.is_none() {
                    depletion_age = Some(age);
                }
            }
        }

        capital = finite_or_zero(closing);

        if reporting {
            rows.push(CashflowYear {
                age,
                phase,
                opening_capital: finite_or_zero(opening),
                events_net: finite_or_zero(year_events.net()),
                contribution: finite_or_zero(contribution_principal),
                investment_return: finite_or_zero(investment_return),
                withdrawal: finite_or_zero(withdrawal),
                closing_capital: capital,
            });
            trajectory.push(TrajectoryPoint {
                age: age + 1,
                capital: capital.max(0.0),
            });
        }
    }

    if depletion_age.is_none() && year_count > 0 && capital == 0.0 {
        depletion_age = Some(spec.horizon_end);
    }

    SimulationOutcome {
        trajectory,
        rows,
        depletion_age,
        terminal_capital: capital,
    }
}

pub fn compute_retirement_projection(
    params: &SimulationParameters,
    events: &[LiquidityEvent],
) -> ProjectionResult {
    let config = SolverConfig::default();
    let horizon_end = consumption_horizon(params);

    let contribution_solution = solve_required_contribution(params, events, config);
    let resolved_contribution = params
        .monthly_contribution
        .unwrap_or(contribution_solution.monthly_contribution);
    let resolved_income = resolve_monthly_income(params, events, resolved_contribution, config);

    // Exact zero-out is a display alignment rule, resolved once per call. The
    // solver objectives above never see it.
    let force_exact_zero = params.force_final_zero_at_end
        && !params.is_perpetuity
        && contribution_solution.monthly_contribution > 0.0;

    let outcome = run_cashflow_simulation(&SimulationSpec {
        params,
        events,
        monthly_contribution: resolved_contribution,
        monthly_withdrawal: resolved_income,
        horizon_end,
        yield_only: params.is_perpetuity && !params.lock_withdrawal_to_target,
        force_exact_zero,
        mode: SimulationMode::Reporting,
    });

    ProjectionResult {
        required_capital: finite_or_zero(required_capital_raw(params, events)),
        monthly_contribution: finite_or_zero(resolved_contribution),
        monthly_income: finite_or_zero(resolved_income),
        capital_trajectory: outcome.trajectory,
        annual_cash_flow_table: outcome.rows,
        depletion_age: outcome.depletion_age,
    }
}

fn resolve_monthly_income(
    params: &SimulationParameters,
    events: &[LiquidityEvent],
    resolved_contribution: f64,
    config: SolverConfig,
) -> f64 {
    if params.lock_withdrawal_to_target {
        return params.desired_monthly_withdrawal;
    }
    if params.is_perpetuity {
        // Yield on the projected capital at the retirement date.
        let rate = monthly_rate(params.real_return_accumulation);
        let months = accumulation_months(params);
        let capital_at_retirement = params.current_capital * compound(rate, months as i32)
            + resolved_contribution * annuity_fv_factor(rate, months)
            + future_value_at_retirement(events, params.current_age, params.retirement_age, rate);
        let consumption = monthly_rate(params.real_return_consumption);
        return (capital_at_retirement.max(0.0) * consumption).max(0.0);
    }
    let mut fixed = params.clone();
    fixed.monthly_contribution = Some(resolved_contribution);
    solve_sustainable_income(&fixed, events, config).monthly_income
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Recurrence;
    use proptest::prelude::{prop_assert, proptest};

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn sample_params() -> SimulationParameters {
        SimulationParameters {
            current_age: 40,
            retirement_age: 65,
            life_expectancy: 90,
            current_capital: 100_000.0,
            monthly_contribution: Some(0.0),
            desired_monthly_withdrawal: 4_000.0,
            real_return_accumulation: 0.03,
            real_return_consumption: 0.03,
            is_perpetuity: false,
            lock_withdrawal_to_target: true,
            force_final_zero_at_end: false,
            override_end_age: None,
        }
    }

    fn retired_params() -> SimulationParameters {
        SimulationParameters {
            current_age: 65,
            retirement_age: 65,
            life_expectancy: 100,
            current_capital: 2_000_000.0,
            monthly_contribution: Some(0.0),
            desired_monthly_withdrawal: 10_000.0,
            real_return_accumulation: 0.03,
            real_return_consumption: 0.03,
            is_perpetuity: false,
            lock_withdrawal_to_target: true,
            force_final_zero_at_end: false,
            override_end_age: None,
        }
    }

    fn once_event(value: f64, start_age: u32) -> LiquidityEvent {
        LiquidityEvent {
            id: String::new(),
            name: String::new(),
            value,
            is_positive: true,
            recurrence: Recurrence::Once,
            start_age: Some(start_age),
            age: None,
            end_age: None,
            enabled: None,
        }
    }

    #[test]
    fn horizon_defaults_depend_on_retirement_status() {
        let not_yet = sample_params();
        assert_eq!(consumption_horizon(&not_yet), 99);

        let retired = retired_params();
        assert_eq!(consumption_horizon(&retired), 100);

        let mut overridden = sample_params();
        overridden.override_end_age = Some(85);
        assert_eq!(consumption_horizon(&overridden), 85);
    }

    #[test]
    fn required_capital_matches_annuity_formula_without_events() {
        let params = retired_params();
        let rate = monthly_rate(0.03);
        let expected = 10_000.0 * (1.0 - (1.0 + rate).powi(-420)) / rate;
        assert_approx_tol(required_capital_at_retirement(&params, &[]), expected, 1e-6);
    }

    #[test]
    fn required_capital_perpetuity_is_withdrawal_over_rate() {
        let mut params = retired_params();
        params.is_perpetuity = true;
        let rate = monthly_rate(0.03);
        assert_approx_tol(
            required_capital_at_retirement(&params, &[]),
            10_000.0 / rate,
            1e-6,
        );
    }

    #[test]
    fn required_capital_perpetuity_at_zero_rate_is_sanitized() {
        let mut params = retired_params();
        params.is_perpetuity = true;
        params.real_return_consumption = 0.0;
        assert_eq!(required_capital_at_retirement(&params, &[]), 0.0);
    }

    #[test]
    fn required_capital_is_reduced_by_positive_events_and_floored_at_zero() {
        let params = retired_params();
        let baseline = required_capital_at_retirement(&params, &[]);
        let reduced =
            required_capital_at_retirement(&params, &[once_event(500_000.0, 70)]);
        assert!(reduced < baseline);

        let windfall = once_event(100_000_000.0, 66);
        assert_eq!(required_capital_at_retirement(&params, &[windfall]), 0.0);
    }

    #[test]
    fn insufficient_capital_depletes_strictly_before_horizon() {
        let params = retired_params();
        let result = compute_retirement_projection(&params, &[]);
        let depletion = result.depletion_age.expect("capital cannot fund 35 years");
        assert!(depletion > 65 && depletion < 100, "depletion at {depletion}");

        // Withdrawals outpace returns, so the trajectory keeps falling until depletion.
        let mut previous = f64::INFINITY;
        for point in &result.capital_trajectory {
            assert!(point.capital <= previous + 1e-6);
            previous = point.capital;
        }
    }

    #[test]
    fn perpetuity_yield_mode_preserves_principal() {
        let mut params = retired_params();
        params.is_perpetuity = true;
        params.lock_withdrawal_to_target = false;
        let result = compute_retirement_projection(&params, &[]);

        assert_eq!(result.depletion_age, None);
        let last = result.capital_trajectory.last().expect("trajectory not empty");
        assert_approx_tol(last.capital, 2_000_000.0, 1.0);

        let rate = monthly_rate(0.03);
        assert_approx_tol(result.monthly_income, 2_000_000.0 * rate, 1e-6);
    }

    #[test]
    fn windfall_event_delays_depletion() {
        let params = retired_params();
        let baseline = compute_retirement_projection(&params, &[])
            .depletion_age
            .expect("baseline depletes");
        let with_event = compute_retirement_projection(&params, &[once_event(500_000.0, 70)])
            .depletion_age
            .expect("still depletes eventually");
        assert!(with_event > baseline, "{with_event} vs {baseline}");
    }

    #[test]
    fn rows_are_frozen_after_depletion() {
        let params = retired_params();
        let result = compute_retirement_projection(&params, &[once_event(50_000.0, 95)]);
        let depletion = result.depletion_age.expect("must deplete");

        for row in &result.annual_cash_flow_table {
            if row.age > depletion {
                assert_eq!(row.closing_capital, 0.0);
                assert_eq!(row.events_net, 0.0);
                assert_eq!(row.withdrawal, 0.0);
                assert_eq!(row.investment_return, 0.0);
            }
        }
    }

    #[test]
    fn cashflow_rows_balance() {
        let mut params = sample_params();
        params.monthly_contribution = Some(800.0);
        let events = vec![once_event(25_000.0, 50)];
        let result = compute_retirement_projection(&params, &events);

        for row in &result.annual_cash_flow_table {
            if row.closing_capital == 0.0 {
                continue;
            }
            let balance = row.opening_capital + row.events_net + row.contribution
                + row.investment_return
                - row.withdrawal;
            assert_approx_tol(row.closing_capital, balance, 1e-6);
        }
    }

    #[test]
    fn accumulation_rows_precede_consumption_rows() {
        let params = sample_params();
        let result = compute_retirement_projection(&params, &[]);
        for row in &result.annual_cash_flow_table {
            let expected = if row.age < 65 {
                Phase::Accumulation
            } else {
                Phase::Consumption
            };
            assert_eq!(row.phase, expected);
        }
        assert_eq!(result.annual_cash_flow_table.len(), (99 - 40) as usize);
        assert_eq!(result.capital_trajectory.len(), (99 - 40 + 1) as usize);
    }

    #[test]
    fn zero_rate_run_is_linear_and_lands_on_zero() {
        let mut params = retired_params();
        params.real_return_accumulation = 0.0;
        params.real_return_consumption = 0.0;
        params.desired_monthly_withdrawal = 4_000.0;
        params.current_capital = 4_000.0 * 12.0 * 35.0;

        let result = compute_retirement_projection(&params, &[]);
        assert_eq!(result.depletion_age, Some(100));
        let last = result.capital_trajectory.last().expect("trajectory not empty");
        assert_eq!(last.capital, 0.0);
        assert_approx_tol(result.required_capital, params.current_capital, 1e-6);
    }

    #[test]
    fn forced_final_zero_ends_exactly_at_zero() {
        let mut params = sample_params();
        params.monthly_contribution = None;
        params.current_capital = 50_000.0;
        params.force_final_zero_at_end = true;

        let result = compute_retirement_projection(&params, &[]);
        assert!(result.monthly_contribution > 0.0);
        let last = result.capital_trajectory.last().expect("trajectory not empty");
        assert_eq!(last.capital, 0.0);
        assert_eq!(result.depletion_age, Some(99));
    }

    #[test]
    fn projection_is_idempotent() {
        let mut params = sample_params();
        params.monthly_contribution = None;
        let events = vec![once_event(25_000.0, 50), once_event(40_000.0, 70)];

        let first = compute_retirement_projection(&params, &events);
        let second = compute_retirement_projection(&params, &events);
        assert_eq!(
            serde_json::to_string(&first).expect("serializable"),
            serde_json::to_string(&second).expect("serializable"),
        );
    }

    #[test]
    fn disabled_event_reproduces_the_zero_event_projection() {
        let params = retired_params();
        let mut disabled = once_event(500_000.0, 70);
        disabled.enabled = Some(false);

        let without = compute_retirement_projection(&params, &[]);
        let with_disabled = compute_retirement_projection(&params, &[disabled]);
        assert_eq!(
            serde_json::to_string(&without).expect("serializable"),
            serde_json::to_string(&with_disabled).expect("serializable"),
        );
    }

    #[test]
    fn malformed_event_range_does_not_panic() {
        let params = retired_params();
        let mut bad = once_event(10_000.0, 80);
        bad.recurrence = Recurrence::Annual;
        bad.end_age = Some(70);
        let result = compute_retirement_projection(&params, &[bad]);
        assert!(result.required_capital.is_finite());
    }

    #[test]
    fn objective_mode_reports_raw_negative_terminal() {
        let params = retired_params();
        let outcome = run_cashflow_simulation(&SimulationSpec {
            params: &params,
            events: &[],
            monthly_contribution: 0.0,
            monthly_withdrawal: params.desired_monthly_withdrawal,
            horizon_end: consumption_horizon(&params),
            yield_only: false,
            force_exact_zero: false,
            mode: SimulationMode::Objective,
        });
        assert!(outcome.terminal_capital < 0.0);
        assert!(outcome.rows.is_empty());
        let depletion = outcome.depletion_age.expect("depletes");
        assert!(depletion > 65 && depletion < 100);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(40))]

        #[test]
        fn prop_zero_event_required_capital_matches_closed_form(
            withdrawal in 100u32..20_000,
            rate_bp in 1u32..800,
            retirement_age in 55u32..80,
            horizon_extra in 1u32..30
        ) {
            let mut params = retired_params();
            params.current_age = retirement_age;
            params.retirement_age = retirement_age;
            params.desired_monthly_withdrawal = withdrawal as f64;
            params.real_return_consumption = rate_bp as f64 / 10_000.0;
            params.override_end_age = Some(retirement_age + horizon_extra);

            let rate = monthly_rate(params.real_return_consumption);
            let months = (horizon_extra * 12) as i32;
            let expected = withdrawal as f64 * (1.0 - (1.0 + rate).powi(-months)) / rate;

            let actual = required_capital_at_retirement(&params, &[]);
            prop_assert!((actual - expected).abs() <= expected.abs() * 1e-9 + 1e-6);
        }

        #[test]
        fn prop_trajectory_is_finite_and_non_negative(
            current_age in 30u32..70,
            retirement_offset in 0u32..25,
            capital in 0u32..3_000_000,
            contribution in 0u32..5_000,
            withdrawal in 0u32..15_000,
            accumulation_bp in 0u32..900,
            consumption_bp in 0u32..900,
            perpetuity in proptest::bool::ANY,
            locked in proptest::bool::ANY
        ) {
            let params = SimulationParameters {
                current_age,
                retirement_age: current_age + retirement_offset,
                life_expectancy: 100,
                current_capital: capital as f64,
                monthly_contribution: Some(contribution as f64),
                desired_monthly_withdrawal: withdrawal as f64,
                real_return_accumulation: accumulation_bp as f64 / 10_000.0,
                real_return_consumption: consumption_bp as f64 / 10_000.0,
                is_perpetuity: perpetuity,
                lock_withdrawal_to_target: locked,
                force_final_zero_at_end: false,
                override_end_age: None,
            };
            let events = vec![once_event(50_000.0, current_age + 5)];

            let result = compute_retirement_projection(&params, &events);
            prop_assert!(result.required_capital.is_finite());
            prop_assert!(result.monthly_contribution.is_finite());
            prop_assert!(result.monthly_income.is_finite());
            for point in &result.capital_trajectory {
                prop_assert!(point.capital.is_finite());
                prop_assert!(point.capital >= 0.0);
            }
            if let Some(depletion) = result.depletion_age {
                prop_assert!(depletion >= params.retirement_age.min(consumption_horizon(&params)));
                prop_assert!(depletion <= consumption_horizon(&params));
            }
        }
    }
}
