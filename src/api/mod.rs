use axum::{
    Router,
    extract::Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    ChainTerminal, ConfidenceTable, DecayError, MeanLifetime, NuclideDatabase, NuclideRecord,
    SchmidtOutcome, SimulationConfig, SimulationReport, StateId, TabulatedBound,
    generalized_by_path, run_simulation, schmidt_by_state,
};

#[derive(Parser, Debug)]
#[command(
    name = "decaychain",
    about = "Monte Carlo simulator of alpha/gamma/fission decay chains with Schmidt tests"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one simulation and print the JSON report
    Run(RunArgs),
    /// Serve the simulation over HTTP
    Serve {
        #[arg(default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long, help = "Nuclide database JSON (\"A.Z.E\" -> record)")]
    database: PathBuf,
    #[arg(long, help = "Initial state as A.Z.E")]
    state: String,
    #[arg(long, default_value_t = 10_000)]
    trials: u32,
    #[arg(
        long,
        default_value_t = 5.0,
        help = "Distribution window length in half-lives"
    )]
    range_factor: f64,
    #[arg(long, default_value_t = 10_000)]
    grid_steps: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, help = "Run trials on a single thread")]
    sequential: bool,
    #[arg(long, help = "Tabulated Schmidt bounds JSON ([{n, lower, upper}])")]
    bounds_table: Option<PathBuf>,
    #[arg(long, help = "Include every sampled row in the output")]
    include_rows: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    database: Option<BTreeMap<String, NuclideRecord>>,
    state: Option<String>,
    trials: Option<u32>,
    range_factor: Option<f64>,
    grid_steps: Option<usize>,
    seed: Option<u64>,
    parallel: Option<bool>,
    bounds_table: Option<Vec<TabulatedBound>>,
    include_rows: Option<bool>,
}

#[derive(Debug)]
struct ApiRequest {
    database: NuclideDatabase,
    initial_state: StateId,
    config: SimulationConfig,
    bounds: Option<ConfidenceTable>,
    include_rows: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PathResponse {
    path: String,
    terminal: ChainTerminal,
    count: usize,
    fraction: f64,
    columns: Vec<StateId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rows: Option<Vec<Vec<f64>>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TestResponse {
    subject: String,
    sigma_theta_exp: Option<f64>,
    lower: Option<f64>,
    upper: Option<f64>,
    sample_count: Option<usize>,
    consistent: Option<bool>,
    error: Option<String>,
}

impl TestResponse {
    fn new(subject: String, outcome: Result<SchmidtOutcome, DecayError>) -> Self {
        match outcome {
            Ok(o) => Self {
                subject,
                sigma_theta_exp: Some(o.sigma_theta_exp),
                lower: Some(o.interval.0),
                upper: Some(o.interval.1),
                sample_count: Some(o.sample_count),
                consistent: Some(o.is_consistent()),
                error: None,
            },
            Err(err) => {
                warn!(subject = %subject, error = %err, "schmidt test skipped");
                Self {
                    subject,
                    sigma_theta_exp: None,
                    lower: None,
                    upper: None,
                    sample_count: None,
                    consistent: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    initial_state: StateId,
    trials: u32,
    seed: u64,
    range_factor: f64,
    grid_steps: usize,
    distributions_built: usize,
    fission_fraction: f64,
    paths: Vec<PathResponse>,
    mean_lifetimes: Vec<MeanLifetime>,
    state_tests: Vec<TestResponse>,
    path_tests: Vec<TestResponse>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_config(args: &RunArgs) -> Result<SimulationConfig, String> {
    if args.trials == 0 {
        return Err("--trials must be > 0".to_string());
    }
    if !(args.range_factor.is_finite() && args.range_factor > 0.0) {
        return Err("--range-factor must be > 0".to_string());
    }
    if args.grid_steps < 2 {
        return Err("--grid-steps must be >= 2".to_string());
    }
    Ok(SimulationConfig {
        trials: args.trials,
        range_factor: args.range_factor,
        grid_steps: args.grid_steps,
        seed: args.seed,
        parallel: !args.sequential,
    })
}

pub fn run_cli(args: RunArgs) -> Result<(), String> {
    let config = build_config(&args)?;
    let initial_state: StateId = args
        .state
        .parse()
        .map_err(|e: DecayError| format!("--state: {e}"))?;

    let db_json = std::fs::read_to_string(&args.database)
        .map_err(|e| format!("--database {}: {e}", args.database.display()))?;
    let database = NuclideDatabase::from_json_str(&db_json).map_err(|e| e.to_string())?;

    let bounds = match &args.bounds_table {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .map_err(|e| format!("--bounds-table {}: {e}", path.display()))?;
            Some(ConfidenceTable::from_json_str(&json).map_err(|e| e.to_string())?)
        }
        None => None,
    };

    let report = run_simulation(&database, initial_state, &config).map_err(|e| e.to_string())?;
    let response = build_simulate_response(&report, bounds.as_ref(), args.include_rows);
    let json = serde_json::to_string_pretty(&response)
        .map_err(|e| format!("failed to serialize report: {e}"))?;
    println!("{json}");
    Ok(())
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/api/simulate", post(simulate_post_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "decay chain HTTP API listening");

    axum::serve(listener, app).await
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, serde_json::json!({ "status": "ok" }))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let outcome = tokio::task::spawn_blocking(move || simulate_request(&request)).await;
    match outcome {
        Ok(Ok(response)) => json_response(StatusCode::OK, response),
        Ok(Err(err)) => error_response(StatusCode::UNPROCESSABLE_ENTITY, &err.to_string()),
        Err(err) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("simulation task failed: {err}"),
        ),
    }
}

fn simulate_request(request: &ApiRequest) -> Result<SimulateResponse, DecayError> {
    let report = run_simulation(&request.database, request.initial_state, &request.config)?;
    Ok(build_simulate_response(
        &report,
        request.bounds.as_ref(),
        request.include_rows,
    ))
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
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

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: SimulatePayload) -> Result<ApiRequest, String> {
    let defaults = SimulationConfig::default();

    let records = payload
        .database
        .ok_or_else(|| "database is required".to_string())?;
    let database = NuclideDatabase::from_records(records).map_err(|e| e.to_string())?;

    let initial_state: StateId = payload
        .state
        .ok_or_else(|| "state is required".to_string())?
        .parse()
        .map_err(|e: DecayError| format!("state: {e}"))?;

    let config = SimulationConfig {
        trials: payload.trials.unwrap_or(defaults.trials),
        range_factor: payload.range_factor.unwrap_or(defaults.range_factor),
        grid_steps: payload.grid_steps.unwrap_or(defaults.grid_steps),
        seed: payload.seed.unwrap_or(defaults.seed),
        parallel: payload.parallel.unwrap_or(defaults.parallel),
    };
    config.validate().map_err(|e| e.to_string())?;

    Ok(ApiRequest {
        database,
        initial_state,
        config,
        bounds: payload.bounds_table.map(ConfidenceTable::new),
        include_rows: payload.include_rows.unwrap_or(false),
    })
}

fn build_simulate_response(
    report: &SimulationReport,
    bounds: Option<&ConfidenceTable>,
    include_rows: bool,
) -> SimulateResponse {
    let result = &report.result;
    let paths = result
        .path_fractions()
        .into_iter()
        .zip(result.groups.values())
        .map(|((path, fraction), table)| PathResponse {
            path: path.to_string(),
            terminal: table.terminal,
            count: table.rows.len(),
            fraction,
            columns: table.columns.clone(),
            rows: include_rows.then(|| table.rows.clone()),
        })
        .collect();

    let state_tests = schmidt_by_state(result, bounds)
        .into_iter()
        .map(|(state, outcome)| TestResponse::new(state.to_string(), outcome))
        .collect();
    let path_tests = generalized_by_path(result, bounds)
        .into_iter()
        .map(|(path, outcome)| TestResponse::new(path.to_string(), outcome))
        .collect();

    SimulateResponse {
        initial_state: report.initial_state,
        trials: report.config.trials,
        seed: report.config.seed,
        range_factor: report.config.range_factor,
        grid_steps: report.config.grid_steps,
        distributions_built: report.distributions_built,
        fission_fraction: result.terminal_fraction(ChainTerminal::Fission),
        paths,
        mean_lifetimes: report.mean_lifetimes.rows.values().cloned().collect(),
        state_tests,
        path_tests,
    }
}
