// Settings for one run of the agent. The binary fills these from the command
// line; library users build them directly, starting from the `Default` impls.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::cli::{Args, TestFramework};

pub const DEFAULT_MODEL: &str = "llama3";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_SERVICE_URL: &str = "http://localhost:11434";
pub const DEFAULT_TARGET_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_KNOWLEDGE_CAPACITY: usize = 20;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max attempts must be at least 1")]
    ZeroAttempts,

    #[error("model identifier must not be empty")]
    EmptyModel,

    #[error("{0} timeout must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("runner command override has no program")]
    EmptyRunnerCommand,

    #[error("knowledge capacity must be at least 1")]
    ZeroKnowledgeCapacity,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Repair cycle policy
#[derive(Debug, Clone, Serialize)]
pub struct RepairConfig {
    pub model: String,
    pub max_attempts: u32,
    /// Feed earlier diagnostics into the next attempt's prompts
    pub feedback: bool,
    pub framework: TestFramework,
    /// Where synthesized test source is written before each run
    pub target_file: PathBuf,
    /// Base URL the generated tests call
    pub target_base_url: String,
    /// Fixed pause between attempts
    pub backoff: Duration,
}

impl Default for RepairConfig {
    fn default() -> Self {
        RepairConfig {
            model: DEFAULT_MODEL.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            feedback: false,
            framework: TestFramework::Pytest,
            target_file: TestFramework::Pytest.default_target_file(),
            target_base_url: DEFAULT_TARGET_BASE_URL.to_string(),
            backoff: Duration::ZERO,
        }
    }
}

impl RepairConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::EmptyModel);
        }
        Ok(())
    }
}

/// Text-generation service connection
#[derive(Debug, Clone, Serialize)]
pub struct GenerationConfig {
    pub service_url: String,
    pub timeout: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            service_url: DEFAULT_SERVICE_URL.to_string(),
            timeout: DEFAULT_GENERATION_TIMEOUT,
        }
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("generation"));
        }
        Ok(())
    }
}

/// How synthesized tests are executed
#[derive(Debug, Clone, Serialize)]
pub struct RunnerConfig {
    pub framework: TestFramework,
    /// Whitespace separated command; `{file}` is substituted
    pub command: Option<String>,
    pub timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            framework: TestFramework::Pytest,
            command: None,
            timeout: DEFAULT_RUN_TIMEOUT,
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("test run"));
        }
        if let Some(command) = &self.command {
            if command.split_whitespace().next().is_none() {
                return Err(ConfigError::EmptyRunnerCommand);
            }
        }
        Ok(())
    }
}

/// Everything the binary needs, assembled from the command line
#[derive(Debug, Clone, Serialize)]
pub struct AgentConfig {
    pub repair: RepairConfig,
    pub generation: GenerationConfig,
    pub runner: RunnerConfig,
    pub knowledge_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            repair: RepairConfig::default(),
            generation: GenerationConfig::default(),
            runner: RunnerConfig::default(),
            knowledge_capacity: DEFAULT_KNOWLEDGE_CAPACITY,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        self.repair.validate()?;
        self.generation.validate()?;
        self.runner.validate()?;
        if self.knowledge_capacity == 0 {
            return Err(ConfigError::ZeroKnowledgeCapacity);
        }
        Ok(())
    }
}

impl From<&Args> for AgentConfig {
    fn from(args: &Args) -> Self {
        let target_file = args
            .target_file
            .clone()
            .unwrap_or_else(|| args.framework.default_target_file());

        AgentConfig {
            repair: RepairConfig {
                model: args.model.clone(),
                max_attempts: args.max_attempts,
                feedback: args.feedback,
                framework: args.framework,
                target_file,
                target_base_url: args.base_url.clone(),
                backoff: Duration::from_millis(args.backoff_ms),
            },
            generation: GenerationConfig {
                service_url: args.llm_url.clone(),
                timeout: Duration::from_secs(args.llm_timeout_secs),
            },
            runner: RunnerConfig {
                framework: args.framework,
                command: args.runner_cmd.clone(),
                timeout: Duration::from_secs(args.run_timeout_secs),
            },
            knowledge_capacity: args.knowledge_capacity,
        }
    }
}
