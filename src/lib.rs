pub mod agent;
pub mod cli;
pub mod config;
pub mod generator;
pub mod parser;
pub mod runner;
pub mod utils;

// Re-export frequently used items for easier access
pub use agent::{CancellationFlag, CycleReport, CycleState, KnowledgeLog, RepairCycle, StopReason};
pub use cli::args::TestFramework;
pub use config::{AgentConfig, GenerationConfig, RepairConfig, RunnerConfig};
pub use generator::{GenerationClient, TestCase, TextGenerator};
pub use parser::{extract_endpoints, EndpointDescriptor, HttpMethod};
pub use runner::{CommandRunner, ExecutionReport, TestRunner};

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Parser error: {0}")]
    ParserError(#[from] parser::ParserError),

    #[error("Generation error: {0}")]
    GenerationError(#[from] generator::GenerationError),

    #[error("Runner error: {0}")]
    RunnerError(#[from] runner::RunnerError),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Run one repair cycle with the HTTP generation client and the command runner
/// described by `config`.
pub async fn run_repair_cycle(
    config: &AgentConfig,
    description: &Value,
    knowledge: &mut KnowledgeLog,
    cancel: &CancellationFlag,
) -> Result<CycleReport> {
    config.validate()?;

    let generator = GenerationClient::new(&config.generation)?;
    let runner = CommandRunner::from_config(&config.runner)?;
    let cycle = RepairCycle::new(config.repair.clone(), Arc::new(generator), Arc::new(runner));

    Ok(cycle.run(description, knowledge, cancel).await)
}
