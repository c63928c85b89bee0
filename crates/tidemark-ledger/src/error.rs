use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LedgerError> for tidemark_core::Error {
    fn from(e: LedgerError) -> Self {
        tidemark_core::Error::Ledger(e.to_string())
    }
}
