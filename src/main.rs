// This is the entry point for the CLI application.
// It parses command-line arguments, loads the API description and runs one repair cycle.

use std::process;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use swagger_test_agent::agent::suggest_fixes;
use swagger_test_agent::cli::Args;
use swagger_test_agent::parser::{fetch_description, parse_description_file, probe_endpoints};
use swagger_test_agent::utils::write_atomically;
use swagger_test_agent::{
    extract_endpoints, run_repair_cycle, AgentConfig, CancellationFlag, GenerationClient,
    KnowledgeLog, Result,
};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args = Args::parse();

    init_tracing(args.verbose);

    match run(args).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(err) => {
            eprintln!("Error: {}", err);
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Returns whether the cycle ended with a passing suite
async fn run(args: Args) -> Result<bool> {
    let config = AgentConfig::from(&args);
    config.validate()?;

    let description = match &args.input {
        Some(path) => parse_description_file(path)?,
        None => fetch_description(&config.repair.target_base_url, config.generation.timeout).await?,
    };

    if args.probe {
        // A description without paths is reported by the cycle itself
        if let Ok(endpoints) = extract_endpoints(&description) {
            let issues = probe_endpoints(
                &config.repair.target_base_url,
                &endpoints,
                config.generation.timeout,
            )
            .await?;
            for issue in &issues {
                warn!(endpoint = %issue.endpoint, status = ?issue.status, detail = %issue.detail, "endpoint issue");
            }
            info!(issues = issues.len(), "probe complete");

            if !issues.is_empty() {
                let generator = GenerationClient::new(&config.generation)?;
                for fix in suggest_fixes(&generator, &config.repair.model, &issues).await {
                    println!("{}", fix.summary());
                }
            }
        }
    }

    let cancel = CancellationFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current step");
            on_interrupt.cancel();
        }
    });

    let mut knowledge = KnowledgeLog::new(config.knowledge_capacity);
    let report = run_repair_cycle(&config, &description, &mut knowledge, &cancel).await?;

    println!("{}", report.summary());

    if let Some(path) = &args.history_out {
        let json = serde_json::to_string_pretty(&report)?;
        write_atomically(path, json)?;
        info!(path = %path.display(), "wrote attempt history");
    }

    Ok(report.succeeded())
}
