use thiserror::Error;

/// Failures in the engine's ambient setup: configuration and logging.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid engine configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
