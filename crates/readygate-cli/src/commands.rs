use std::process::ExitCode;

use anyhow::{Context, Result};
use readygate_core::{InferenceProvider, ReadinessError, ReadinessOrchestrator, ReadinessResult, ReadyGateConfig};

pub async fn ensure(config: &ReadyGateConfig, hold: bool) -> Result<ExitCode> {
    let provider = InferenceProvider::from_env(config);
    if !provider.needs_readiness_gate() {
        println!("Using {provider}; local runtime not required");
        return Ok(ExitCode::SUCCESS);
    }

    let model = config.model();
    let mut gate = ReadinessOrchestrator::from_config(config);

    match gate.ensure_ready(&model).await {
        ReadinessResult::Ready => {
            println!("Ready: {model} on {}", gate.supervisor().endpoint());
        }
        ReadinessResult::Failed(e) => {
            report(&e);
            return Ok(ExitCode::FAILURE);
        }
    }

    if hold && gate.supervisor().owns_process() {
        println!(
            "Holding runtime server (pid {}), press Ctrl-C to stop",
            gate.supervisor().pid().map_or_else(|| "?".to_string(), |pid| pid.to_string())
        );
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        gate.shutdown().await;
    } else if hold {
        tracing::info!("Runtime server was already running and is not owned, nothing to hold");
    }

    Ok(ExitCode::SUCCESS)
}

pub async fn status(config: &ReadyGateConfig) -> Result<ExitCode> {
    let gate = ReadinessOrchestrator::from_config(config);
    let endpoint = gate.supervisor().endpoint();

    match gate.installer().version().await {
        Some(version) => println!("Binary:  {} ({version})", gate.installer().binary()),
        None => println!("Binary:  {} not installed", gate.installer().binary()),
    }

    let running = gate.probe().is_running(endpoint).await;
    println!("Server:  {endpoint} {}", if running { "running" } else { "not running" });

    if running {
        match gate.probe().list_models(endpoint).await {
            Ok(models) => {
                println!("Models:  {}", models.len());
                for model in &models {
                    println!("  {model}");
                }
            }
            Err(e) => println!("Models:  unavailable ({e})"),
        }
    }

    Ok(ExitCode::SUCCESS)
}

pub async fn install(config: &ReadyGateConfig) -> Result<ExitCode> {
    let gate = ReadinessOrchestrator::from_config(config);
    match gate.installer().ensure_binary_present().await {
        Ok(()) => {
            let version = gate.installer().version().await.unwrap_or_default();
            println!("Installed: {} {version}", gate.installer().binary());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            report(&e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn report(error: &ReadinessError) {
    eprintln!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        eprintln!("{remediation}");
    }
}
