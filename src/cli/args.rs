use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[clap(
    name = "swagger-test-agent",
    about = "Generate, run and repair API tests from an OpenAPI description with an LLM",
    version
)]
pub struct Args {
    /// Path to the OpenAPI/Swagger JSON description (fetched from <base-url>/openapi.json when omitted)
    #[clap(short, long, value_name = "FILE", env = "SWAGGER_AGENT_INPUT")]
    pub input: Option<PathBuf>,

    /// Base URL of the API under test
    #[clap(long, value_name = "URL", env = "SWAGGER_AGENT_BASE_URL", default_value = "http://localhost:8000")]
    pub base_url: String,

    /// Base URL of the text-generation service
    #[clap(long, value_name = "URL", env = "SWAGGER_AGENT_LLM_URL", default_value = "http://localhost:11434")]
    pub llm_url: String,

    /// Model identifier sent with every generation request
    #[clap(short, long, env = "SWAGGER_AGENT_MODEL", default_value = "llama3")]
    pub model: String,

    /// Maximum number of generate/execute attempts
    #[clap(long, env = "SWAGGER_AGENT_MAX_ATTEMPTS", default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: u32,

    /// Feed failure diagnostics back into the next attempt's prompts
    #[clap(long)]
    pub feedback: bool,

    /// Testing framework the generated code targets
    #[clap(short, long, value_enum, default_value = "pytest")]
    pub framework: TestFramework,

    /// File the synthesized test source is written to (framework default when omitted)
    #[clap(short, long, value_name = "FILE")]
    pub target_file: Option<PathBuf>,

    /// Test command override; `{file}` is replaced by the target file
    #[clap(long, value_name = "COMMAND", env = "SWAGGER_AGENT_RUNNER_CMD")]
    pub runner_cmd: Option<String>,

    /// Timeout for a single generation request, in seconds
    #[clap(long, default_value_t = 120)]
    pub llm_timeout_secs: u64,

    /// Timeout for a single test run, in seconds
    #[clap(long, default_value_t = 300)]
    pub run_timeout_secs: u64,

    /// Pause between attempts, in milliseconds
    #[clap(long, default_value_t = 0)]
    pub backoff_ms: u64,

    /// Number of failure diagnostics kept for feedback
    #[clap(long, default_value_t = 20)]
    pub knowledge_capacity: usize,

    /// Write the full attempt history as JSON to this file
    #[clap(long, value_name = "FILE")]
    pub history_out: Option<PathBuf>,

    /// Probe every endpoint with an empty request before generating tests
    #[clap(long)]
    pub probe: bool,

    /// Enable debug logging
    #[clap(long)]
    pub verbose: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestFramework {
    /// Python's pytest & requests
    Pytest,
    /// JavaScript's Jest & axios
    Jest,
}

impl TestFramework {
    /// Human name used in prompts
    pub fn display_name(&self) -> &'static str {
        match self {
            TestFramework::Pytest => "Python pytest",
            TestFramework::Jest => "JavaScript Jest",
        }
    }

    pub fn default_target_file(&self) -> PathBuf {
        match self {
            TestFramework::Pytest => PathBuf::from("test_api.py"),
            TestFramework::Jest => PathBuf::from("api.test.js"),
        }
    }

    /// Program and arguments that run one test file; `{file}` marks the file
    pub fn default_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            TestFramework::Pytest => ("python", &["-m", "pytest", "{file}", "-v"]),
            TestFramework::Jest => ("npx", &["jest", "{file}"]),
        }
    }
}
