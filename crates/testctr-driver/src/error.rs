//! Error types for container drivers

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Failed to connect to container runtime: {0}")]
    Connection(String),

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Build failed: {0}")]
    Build(String),

    #[error("Exec failed: {0}")]
    Exec(String),

    #[error("Container runtime error: {0}")]
    Runtime(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out {0}")]
    Timeout(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, DriverError>;
