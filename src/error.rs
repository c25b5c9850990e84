pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("task queue overflow: spill list reached its limit of {limit} tasks")]
    QueueOverflow { limit: usize },

    #[error("already initialized")]
    AlreadyInitialized,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Whether the error is a backpressure signal rather than a failure.
    pub fn is_overflow(&self) -> bool {
        matches!(self, Error::QueueOverflow { .. })
    }
}
