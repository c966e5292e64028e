use thiserror::Error;

/// Errors raised while assembling the runtime (config, logging, capabilities).
#[derive(Error, Debug)]
pub enum Error {
    /// A tunable or filter string is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// A bridge the core cannot run without was not injected
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
