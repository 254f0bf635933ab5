//! Error types for the testctr harness

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("no testdata matching {0}")]
    NoTestData(String),

    #[error("container not found: {0}")]
    NotFound(String),

    #[error("container {0} is recorded in the environment but not in the registry cache")]
    NotInCache(String),

    #[error("container already exists: {0}")]
    Conflict(String),

    #[error("command exited with status {code}:\n{output}")]
    ExecFailed { code: i64, output: String },

    #[error("port {port} is not mapped for container {name}")]
    Unmapped { name: String, port: u16 },

    #[error("timed out {0}")]
    Timeout(String),

    #[error("driver error: {0}")]
    Driver(#[from] testctr_driver::DriverError),

    #[error("script error: {0}")]
    Engine(#[from] testctr_engine::EngineError),

    #[error("invalid test pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
