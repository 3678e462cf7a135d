use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("illegal status transition {from} -> {to}")]
    Illegal { from: String, to: String },
}

#[derive(Debug, Error)]
pub enum RevealParseError {
    #[error("bad reveal length: expected {expected} bytes, got {got}")]
    BadLength { expected: usize, got: usize },
    #[error("transaction truncated")]
    Truncated,
    #[error("witness-serialized transaction, expected the legacy form")]
    WitnessSerialization,
    #[error("{extra} trailing bytes after the transaction")]
    TrailingBytes { extra: usize },
}
