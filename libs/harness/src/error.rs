use harness_api::{ObservationRecord, SchedulerError, TransportError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProducerError {
    #[error("send failed at offset {offset} after retry: {source}")]
    SendFailed { offset: u64, source: TransportError },

    #[error("stopped after {sent} messages")]
    Stopped { sent: u64 },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConsumerError {
    #[error("idle timeout: received {received} of {expected}")]
    Timeout { received: u64, expected: u64 },

    #[error("transport closed")]
    TransportClosed,

    #[error("transport: {0}")]
    Transport(TransportError),

    #[error("stopped: received {received} of {expected}")]
    Stopped { received: u64, expected: u64 },
}

impl ConsumerError {
    /// Фатальна ли ошибка для всего прогона.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConsumerError::TransportClosed)
    }
}

/// Досрочное завершение consumer'а. Несёт всё, что успели наблюдать:
/// частичный лог тоже уходит в verifier.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct ConsumerAbort {
    pub error: ConsumerError,
    pub observed: Vec<ObservationRecord>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RunError {
    #[error("scheduler: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("connect ({client}): {source}")]
    Connect { client: String, source: TransportError },

    #[error("consumer lost its transport")]
    TransportClosed,

    #[error("config: {0}")]
    Config(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read { path: String, source: std::io::Error },

    #[error("bad config {path}: {detail}")]
    Parse { path: String, detail: String },

    #[error("{0}")]
    Invalid(String),
}
