//! CLI command handlers.
//!
//! Each handler returns the text to print so it can be tested without
//! capturing stdout.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use artisan_idempotency::{
    Clock, DedupKey, ExecuteError, ExecuteOptions, IdempotencyCoordinator, OperationName,
    OwnerId, SweepTask, SystemClock, fingerprint_optional,
};

use crate::cli::Commands;
use crate::config::ArtisanConfig;

const SWEEPER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Parameters of a `simulate` run.
#[derive(Debug, Clone)]
pub struct Simulation {
    pub owner: Option<String>,
    pub operation: String,
    pub payload: String,
    pub attempts: usize,
    pub work: Duration,
    pub ttl: Option<Duration>,
    pub fail: bool,
}

/// Outcome counts of a `simulate` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimulationReport {
    pub key: String,
    pub attempts: usize,
    pub executed: usize,
    pub duplicates: usize,
    pub failures: usize,
    pub store_errors: usize,
}

/// Execute a CLI command, returning its output.
///
/// # Errors
///
/// Returns an error if arguments are invalid or the command fails.
pub async fn execute_command(command: Commands, config: &ArtisanConfig) -> Result<String> {
    match command {
        Commands::Fingerprint { payload, absent } => {
            cmd_fingerprint(if absent { None } else { payload.as_deref() })
        }

        Commands::Key {
            owner,
            operation,
            payload,
        } => cmd_key(owner.as_deref(), &operation, payload.as_deref()),

        Commands::Simulate {
            owner,
            operation,
            payload,
            attempts,
            work_ms,
            ttl_ms,
            fail,
        } => {
            let simulation = Simulation {
                owner,
                operation,
                payload,
                attempts,
                work: Duration::from_millis(work_ms),
                ttl: ttl_ms.map(Duration::from_millis),
                fail,
            };
            let report = cmd_simulate(config, simulation).await?;
            serde_json::to_string_pretty(&report).context("Failed to render simulation report")
        }
    }
}

/// Fingerprint a JSON payload, or the absent payload for `None`.
///
/// # Errors
///
/// Returns an error if the payload is not valid JSON.
pub fn cmd_fingerprint(payload: Option<&str>) -> Result<String> {
    let value = parse_payload(payload)?;
    let fingerprint = fingerprint_optional(value.as_ref())?;
    Ok(fingerprint.to_string())
}

/// Derive the dedup key for a request.
///
/// # Errors
///
/// Returns an error if the owner or operation is invalid or the payload is
/// not valid JSON.
pub fn cmd_key(owner: Option<&str>, operation: &str, payload: Option<&str>) -> Result<String> {
    let owner = OwnerId::from_optional(owner).context("Invalid owner")?;
    let operation = OperationName::new(operation).context("Invalid operation name")?;
    let value = parse_payload(payload)?;
    let fingerprint = fingerprint_optional(value.as_ref())?;
    Ok(DedupKey::new(&owner, &operation, &fingerprint).to_string())
}

/// Race `attempts` concurrent executions of the same request.
///
/// # Errors
///
/// Returns an error if the request is invalid or the sweeper fails to start.
pub async fn cmd_simulate(config: &ArtisanConfig, simulation: Simulation) -> Result<SimulationReport> {
    let owner = OwnerId::from_optional(simulation.owner.as_deref()).context("Invalid owner")?;
    let operation = OperationName::new(simulation.operation.as_str())
        .context("Invalid operation name")?;
    let payload: Value =
        serde_json::from_str(&simulation.payload).context("Payload is not valid JSON")?;
    let key = DedupKey::for_payload(&owner, &operation, &payload)?;

    let settings = &config.idempotency;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = settings.build_store(Arc::clone(&clock));
    let coordinator =
        IdempotencyCoordinator::from_config(Arc::clone(&store), settings).with_clock(clock);

    let sweeper = if settings.sweep_enabled {
        Some(SweepTask::start(store, settings.sweep_interval).context("Failed to start sweeper")?)
    } else {
        None
    };

    let options = simulation
        .ttl
        .map_or_else(|| coordinator.options(), |ttl| coordinator.options().ttl(ttl));

    info!(
        key = %key,
        attempts = simulation.attempts,
        ttl = ?options.ttl,
        "Starting simulation"
    );

    let work = simulation.work;
    let fail = simulation.fail;
    let outcomes = join_all((0..simulation.attempts).map(|attempt| {
        coordinator.execute_once(&owner, &operation, &payload, options, move || async move {
            tokio::time::sleep(work).await;
            if fail {
                Err(std::io::Error::other(format!("attempt {attempt} failed")))
            } else {
                Ok(attempt)
            }
        })
    }))
    .await;

    let report = outcomes.into_iter().fold(
        SimulationReport {
            key: key.to_string(),
            attempts: simulation.attempts,
            ..SimulationReport::default()
        },
        |mut report, outcome| {
            match outcome {
                Ok(_) => report.executed = report.executed.saturating_add(1),
                Err(ExecuteError::DuplicateOperation { .. }) => {
                    report.duplicates = report.duplicates.saturating_add(1);
                }
                Err(ExecuteError::ActionFailed(_)) => {
                    report.failures = report.failures.saturating_add(1);
                }
                Err(e) => {
                    warn!(error = %e, "Attempt could not be coordinated");
                    report.store_errors = report.store_errors.saturating_add(1);
                }
            }
            report
        },
    );

    if let Some(sweeper) = sweeper {
        sweeper
            .shutdown(SWEEPER_SHUTDOWN_TIMEOUT)
            .await
            .context("Sweeper did not stop cleanly")?;
    }

    info!(
        executed = report.executed,
        duplicates = report.duplicates,
        failures = report.failures,
        "Simulation finished"
    );
    Ok(report)
}

fn parse_payload(payload: Option<&str>) -> Result<Option<Value>> {
    payload
        .map(|raw| serde_json::from_str(raw).context("Payload is not valid JSON"))
        .transpose()
}
