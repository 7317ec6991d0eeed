use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("malformed {proto} header: need at least {need} bytes, got {got}")]
    Malformed {
        proto: &'static str,
        need: usize,
        got: usize,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GuardError>;
