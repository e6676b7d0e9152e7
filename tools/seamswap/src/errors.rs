use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeamError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("unknown seam: {0}")]
    UnknownSeam(String),
    #[error("incompatible backend: {0}")]
    IncompatibleBackend(String),
    #[error("pool error: {0}")]
    Pool(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("teardown error: {0}")]
    Teardown(String),
}
