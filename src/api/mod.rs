use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{
    CashflowYear, LiquidityEvent, SimulationParameters, SolverConfig, TrajectoryPoint,
    compute_retirement_projection, consumption_horizon, solve_required_contribution,
    solve_sustainable_income,
};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "glidepath",
    about = "Retirement capital projection engine (liquidity events + goal solvers)"
)]
struct Cli {
    #[arg(long, default_value_t = 40)]
    current_age: u32,
    #[arg(long, default_value_t = 65)]
    retirement_age: u32,
    #[arg(
        long,
        default_value_t = 90,
        help = "Reported to clients; the consumption horizon itself is 99/100 or --override-end-age"
    )]
    life_expectancy: u32,
    #[arg(long, default_value_t = 0.0)]
    current_capital: f64,
    #[arg(
        long,
        help = "Monthly contribution; omit to solve for the required contribution"
    )]
    monthly_contribution: Option<f64>,
    #[arg(long, default_value_t = 0.0)]
    desired_monthly_withdrawal: f64,
    #[arg(
        long,
        default_value_t = 3.0,
        help = "Annual real return before retirement in percent"
    )]
    accumulation_return: f64,
    #[arg(
        long,
        default_value_t = 2.0,
        help = "Annual real return after retirement in percent"
    )]
    consumption_return: f64,
    #[arg(long, help = "Withdraw only the yield, never the principal")]
    perpetuity: bool,
    #[arg(
        long,
        help = "Use the desired withdrawal as-is, even if capital depletes early"
    )]
    lock_withdrawal: bool,
    #[arg(long, help = "Align the final simulated year to end exactly at zero")]
    force_final_zero: bool,
    #[arg(long, help = "Override the consumption horizon end age")]
    override_end_age: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectionPayload {
    current_age: Option<u32>,
    retirement_age: Option<u32>,
    life_expectancy: Option<u32>,
    current_capital: Option<f64>,
    monthly_contribution: Option<f64>,
    desired_monthly_withdrawal: Option<f64>,
    accumulation_return: Option<f64>,
    consumption_return: Option<f64>,
    perpetuity: Option<bool>,
    lock_withdrawal_to_target: Option<bool>,
    force_final_zero_at_end: Option<bool>,
    override_end_age: Option<u32>,
    // Only accepted on POST bodies; query strings carry scalars only.
    events: Option<Vec<LiquidityEvent>>,
}

#[derive(Debug)]
struct ApiRequest {
    params: SimulationParameters,
    events: Vec<LiquidityEvent>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectionResponse {
    current_age: u32,
    retirement_age: u32,
    life_expectancy: u32,
    horizon_end_age: u32,
    perpetuity: bool,
    required_capital: f64,
    monthly_contribution: f64,
    monthly_income: f64,
    depletion_age: Option<u32>,
    capital_trajectory: Vec<TrajectoryPoint>,
    annual_cash_flow_table: Vec<CashflowYear>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContributionResponse {
    monthly_contribution: f64,
    terminal_capital: f64,
    converged: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IncomeResponse {
    monthly_income: f64,
    depletion_age: Option<u32>,
    converged: bool,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn default_cli_for_api() -> Cli {
    Cli {
        current_age: 40,
        retirement_age: 65,
        life_expectancy: 90,
        current_capital: 0.0,
        monthly_contribution: None,
        desired_monthly_withdrawal: 0.0,
        accumulation_return: 3.0,
        consumption_return: 2.0,
        perpetuity: false,
        lock_withdrawal: false,
        force_final_zero: false,
        override_end_age: None,
    }
}

fn build_params(cli: &Cli, events: &[LiquidityEvent]) -> Result<SimulationParameters, String> {
    if cli.retirement_age < cli.current_age {
        return Err("--retirement-age must be >= --current-age".to_string());
    }

    if cli.life_expectancy < cli.retirement_age {
        return Err("--life-expectancy must be >= --retirement-age".to_string());
    }

    if !cli.current_capital.is_finite() || cli.current_capital < 0.0 {
        return Err("--current-capital must be >= 0".to_string());
    }

    if let Some(contribution) = cli.monthly_contribution {
        if !contribution.is_finite() || contribution < 0.0 {
            return Err("--monthly-contribution must be >= 0".to_string());
        }
    }

    if !cli.desired_monthly_withdrawal.is_finite() || cli.desired_monthly_withdrawal < 0.0 {
        return Err("--desired-monthly-withdrawal must be >= 0".to_string());
    }

    for (name, rate) in [
        ("--accumulation-return", cli.accumulation_return),
        ("--consumption-return", cli.consumption_return),
    ] {
        if !rate.is_finite() || rate <= -100.0 {
            return Err(format!("{name} must be > -100"));
        }
    }

    if let Some(end_age) = cli.override_end_age {
        if end_age <= cli.retirement_age {
            return Err("--override-end-age must be > --retirement-age".to_string());
        }
    }

    for event in events {
        if !event.value.is_finite() || event.value < 0.0 {
            return Err(format!(
                "event '{}' value must be >= 0; its direction is carried by isPositive",
                event.id
            ));
        }
        if let (Some(start), Some(end)) = (event.start_age, event.end_age) {
            if end < start {
                return Err(format!("event '{}' endAge must be >= startAge", event.id));
            }
        }
    }

    Ok(SimulationParameters {
        current_age: cli.current_age,
        retirement_age: cli.retirement_age,
        life_expectancy: cli.life_expectancy,
        current_capital: cli.current_capital,
        monthly_contribution: cli.monthly_contribution,
        desired_monthly_withdrawal: cli.desired_monthly_withdrawal,
        real_return_accumulation: cli.accumulation_return / 100.0,
        real_return_consumption: cli.consumption_return / 100.0,
        is_perpetuity: cli.perpetuity,
        lock_withdrawal_to_target: cli.lock_withdrawal,
        force_final_zero_at_end: cli.force_final_zero,
        override_end_age: cli.override_end_age,
    })
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<ProjectionPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: ProjectionPayload) -> Result<ApiRequest, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.current_age {
        cli.current_age = v;
    }
    if let Some(v) = payload.retirement_age {
        cli.retirement_age = v;
    }
    if let Some(v) = payload.life_expectancy {
        cli.life_expectancy = v;
    }
    if let Some(v) = payload.current_capital {
        cli.current_capital = v;
    }
    if let Some(v) = payload.monthly_contribution {
        cli.monthly_contribution = Some(v);
    }
    if let Some(v) = payload.desired_monthly_withdrawal {
        cli.desired_monthly_withdrawal = v;
    }
    if let Some(v) = payload.accumulation_return {
        cli.accumulation_return = v;
    }
    if let Some(v) = payload.consumption_return {
        cli.consumption_return = v;
    }
    if let Some(v) = payload.perpetuity {
        cli.perpetuity = v;
    }
    if let Some(v) = payload.lock_withdrawal_to_target {
        cli.lock_withdrawal = v;
    }
    if let Some(v) = payload.force_final_zero_at_end {
        cli.force_final_zero = v;
    }
    if let Some(v) = payload.override_end_age {
        cli.override_end_age = Some(v);
    }

    let events = payload.events.unwrap_or_default();
    let params = build_params(&cli, &events)?;
    Ok(ApiRequest { params, events })
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router();

    let listener = TcpListener::bind(addr).await?;
    info!("glidepath HTTP API listening on http://{addr}");

    axum::serve(listener, app).await
}

fn router() -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route(
            "/api/projection",
            get(projection_get_handler).post(projection_post_handler),
        )
        .route(
            "/api/contribution",
            get(contribution_get_handler).post(contribution_post_handler),
        )
        .route(
            "/api/income",
            get(income_get_handler).post(income_post_handler),
        )
        .fallback(not_found_handler)
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, StatusResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn projection_get_handler(Query(payload): Query<ProjectionPayload>) -> Response {
    projection_handler_impl(payload)
}

async fn projection_post_handler(Json(payload): Json<ProjectionPayload>) -> Response {
    projection_handler_impl(payload)
}

async fn contribution_get_handler(Query(payload): Query<ProjectionPayload>) -> Response {
    contribution_handler_impl(payload)
}

async fn contribution_post_handler(Json(payload): Json<ProjectionPayload>) -> Response {
    contribution_handler_impl(payload)
}

async fn income_get_handler(Query(payload): Query<ProjectionPayload>) -> Response {
    income_handler_impl(payload)
}

async fn income_post_handler(Json(payload): Json<ProjectionPayload>) -> Response {
    income_handler_impl(payload)
}

fn projection_handler_impl(payload: ProjectionPayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    json_response(StatusCode::OK, build_projection_response(&request))
}

fn contribution_handler_impl(payload: ProjectionPayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    let solution =
        solve_required_contribution(&request.params, &request.events, SolverConfig::default());
    json_response(
        StatusCode::OK,
        ContributionResponse {
            monthly_contribution: solution.monthly_contribution,
            terminal_capital: solution.terminal_capital,
            converged: solution.converged,
        },
    )
}

fn income_handler_impl(payload: ProjectionPayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    let solution =
        solve_sustainable_income(&request.params, &request.events, SolverConfig::default());
    json_response(
        StatusCode::OK,
        IncomeResponse {
            monthly_income: solution.monthly_income,
            depletion_age: solution.depletion_age,
            converged: solution.converged,
        },
    )
}

fn build_projection_response(request: &ApiRequest) -> ProjectionResponse {
    let result = compute_retirement_projection(&request.params, &request.events);
    ProjectionResponse {
        current_age: request.params.current_age,
        retirement_age: request.params.retirement_age,
        life_expectancy: request.params.life_expectancy,
        horizon_end_age: consumption_horizon(&request.params),
        perpetuity: request.params.is_perpetuity,
        required_capital: result.required_capital,
        monthly_contribution: result.monthly_contribution,
        monthly_income: result.monthly_income,
        depletion_age: result.depletion_age,
        capital_trajectory: result.capital_trajectory,
        annual_cash_flow_table: result.annual_cash_flow_table,
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}
