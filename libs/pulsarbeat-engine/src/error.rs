use pulsarbeat_api::ConnectorError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("subscribe consumer '{consumer}': {source}")]
    Subscribe {
        consumer: String,
        source: ConnectorError,
    },

    #[error("{0} worker(s) ended abnormally")]
    WorkersAborted(usize),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// For `Connector` variant, context is added to the inner `ConnectorError`.
    /// For `Config`, context is prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Connector(e) => EngineError::Connector(e.with_context(ctx)),
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}
