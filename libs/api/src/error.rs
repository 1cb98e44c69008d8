/// Category of a transport error. Lets the harness decide between
/// retrying a send, ending a consumer, or failing the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Channel or broker connection is closed. Permanent for this channel.
    Closed,
    /// I/O or network error. Transient, a retry may succeed.
    Io,
    /// Transport-level timeout (e.g. send acknowledgment never arrived).
    Timeout,
    /// Broker refused the operation (unknown delivery tag, rejected send).
    Rejected,
    /// Invalid configuration: bad endpoint, unsupported scheme.
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Closed => f.write_str("closed"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Timeout => f.write_str("timeout"),
            ErrorKind::Rejected => f.write_str("rejected"),
            ErrorKind::Config => f.write_str("config"),
        }
    }
}

/// Unified error type for all `MessageChannel` and `Connector` methods.
///
/// Carries an `ErrorKind` for categorization and a human-readable message.
#[derive(Clone, PartialEq, Eq)]
pub struct TransportError {
    kind: ErrorKind,
    message: String,
}

impl TransportError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into() }
    }

    /// Channel closed: by the peer, by `close()` or by broker shutdown.
    pub fn closed(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Closed, msg)
    }

    /// I/O error, may retry.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, msg)
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rejected, msg)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_closed(&self) -> bool {
        self.kind == ErrorKind::Closed
    }
}

impl std::fmt::Debug for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected => ErrorKind::Closed,
            _ => ErrorKind::Io,
        };
        Self { kind, message: e.to_string() }
    }
}

/// Ошибка планировщика задач. Для прогона всегда фатальна.
#[derive(Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Планировщик уже остановлен (`shutdown()`), новые trigger'ы не принимаются.
    ShutDown,
    /// Handle не выдавался этим планировщиком.
    UnknownTrigger(u64),
}

impl std::fmt::Debug for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::ShutDown => f.write_str("scheduler is shut down"),
            SchedulerError::UnknownTrigger(id) => write!(f, "unknown trigger #{id}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_kinds() {
        let closed: TransportError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert!(closed.is_closed());

        let timeout: TransportError = std::io::Error::from(std::io::ErrorKind::TimedOut).into();
        assert_eq!(timeout.kind(), ErrorKind::Timeout);

        let other: TransportError = std::io::Error::other("boom").into();
        assert_eq!(other.kind(), ErrorKind::Io);
        assert_eq!(other.to_string(), "boom");
    }

    #[test]
    fn debug_includes_kind() {
        let e = TransportError::rejected("unknown delivery tag 7");
        assert_eq!(format!("{e:?}"), "[rejected] unknown delivery tag 7");
    }
}
