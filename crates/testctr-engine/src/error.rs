//! Error types for the script engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("usage: {usage}")]
    Usage { usage: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("unknown condition: {0}")]
    UnknownCondition(String),

    #[error("{0}")]
    Assertion(String),

    #[error("command exited with status {code}: {output}")]
    Exit { code: i64, output: String },

    #[error("{0}")]
    Command(Box<dyn std::error::Error + Send + Sync>),

    #[error("unexpected command success")]
    UnexpectedSuccess,

    #[error("line {line}: {text}: {source}")]
    Script {
        line: usize,
        text: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Wrap a command-specific error so its source chain is preserved
    pub fn command(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Command(Box::new(err))
    }

    /// Usage error built from a command's usage block
    pub fn usage_of(usage: &crate::Usage) -> Self {
        Self::Usage {
            usage: usage.args.to_string(),
        }
    }

    /// Attach script position to an error
    pub fn at(line: usize, text: &str, source: EngineError) -> Self {
        Self::Script {
            line,
            text: text.to_string(),
            source: Box::new(source),
        }
    }

    /// True for usage errors, including ones wrapped with script position.
    /// Usage errors are never masked by `!` negation.
    pub fn is_usage(&self) -> bool {
        match self {
            Self::Usage { .. } => true,
            Self::Script { source, .. } => source.is_usage(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
