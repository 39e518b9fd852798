// Executing synthesized test source against the live API.

pub mod execution;

pub use execution::{CommandRunner, ExecutionReport, Result, RunnerError, TestRunner};
