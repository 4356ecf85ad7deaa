use logsig_ksi_client::KsiClientError;
use thiserror::Error;

pub type SignerResult<T> = Result<T, SignerError>;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("aggregator error: {0}")]
    Aggregator(#[from] KsiClientError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("signer queue failure: {0}")]
    Queue(String),

    #[error("signing is disabled")]
    Disabled,

    #[error("internal error: {0}")]
    Internal(String),
}
