use fifo_harness::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("unsupported endpoint '{0}': only memory:// is built in")]
    Endpoint(String),

    #[error("broker config: {0}")]
    Broker(String),

    #[error("report: {0}")]
    Json(#[from] serde_json::Error),
}
