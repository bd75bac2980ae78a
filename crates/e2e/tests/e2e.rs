//! E2E test harness entry point
//!
//! This file is the test binary that runs the workflow plans against a live
//! eCare environment.
//! Run with: TEST_PASSWORD=... cargo test --package ecare-e2e --test e2e

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use ecare_e2e::{E2eConfig, E2eResult, WorkflowRunner};

#[derive(Parser, Debug)]
#[command(name = "ecare-e2e")]
#[command(about = "Workflow test runner for the eCare scheduling API")]
struct Args {
    /// Configuration file (YAML)
    #[arg(short, long, default_value = "ecare-e2e.yaml")]
    config: PathBuf,

    /// Path to workflow plans directory
    #[arg(short, long)]
    plans: Option<PathBuf>,

    /// Run only plans matching this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Run only a specific plan by name
    #[arg(short, long)]
    name: Option<String>,

    /// API base URL
    #[arg(long, env = "ECARE_BASE_URL")]
    base_url: Option<String>,

    /// Tenant id
    #[arg(long, env = "ECARE_TENANT_ID")]
    tenant: Option<String>,

    /// Settle interval before identifier listing (ms)
    #[arg(long)]
    settle_ms: Option<u64>,

    /// Output directory for results
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Arguments cargo test passes through (e.g. --nocapture)
    #[arg(hide = true, trailing_var_arg = true, allow_hyphen_values = true)]
    passthrough: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(2);
        }
    };

    match rt.block_on(async_main(args)) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

async fn async_main(args: Args) -> E2eResult<bool> {
    let mut config = E2eConfig::load(&args.config)?;
    if let Some(plans) = args.plans {
        config.plans_dir = plans;
    }
    if let Some(base_url) = args.base_url {
        config.api.base_url = base_url;
    }
    if let Some(tenant) = args.tenant {
        config.api.tenant_id = tenant;
    }
    if let Some(settle_ms) = args.settle_ms {
        config.settle_ms = settle_ms;
    }
    if let Some(output) = args.output {
        config.output_dir = output;
    }
    if config.credentials.password.is_empty() {
        tracing::warn!("TEST_PASSWORD not set, skipping live workflow run");
        return Ok(true);
    }
    config.validate()?;

    let mut runner = WorkflowRunner::new(config)?;

    let results = if let Some(name) = args.name {
        runner.run_named(&name).await?
    } else if let Some(tag) = args.tag {
        runner.run_tagged(&tag).await?
    } else {
        runner.run_all().await?
    };

    runner.write_results(&results)?;

    Ok(results.success())
}
