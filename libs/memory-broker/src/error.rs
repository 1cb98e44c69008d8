use harness_api::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("queue '{0}' is closed")]
    QueueClosed(String),

    #[error("channel '{0}' is closed")]
    ChannelClosed(String),

    #[error("send of '{payload_id}' rejected by fault plan")]
    Rejected { payload_id: String },

    #[error("unknown delivery tag {tag} for '{client}'")]
    UnknownDelivery { tag: u64, client: String },

    #[error("prefetch must be at least 1")]
    InvalidPrefetch,
}

impl BrokerError {
    /// Convert to TransportError preserving the failure category.
    ///
    /// Closed queue/channel → `Closed`, injected rejection → `Io` (the
    /// producer retries it), unknown tag → `Rejected`, bad prefetch → `Config`.
    pub fn into_transport_error(self) -> TransportError {
        let message = self.to_string();
        match self {
            BrokerError::QueueClosed(_) | BrokerError::ChannelClosed(_) => TransportError::closed(message),
            BrokerError::Rejected { .. } => TransportError::io(message),
            BrokerError::UnknownDelivery { .. } => TransportError::rejected(message),
            BrokerError::InvalidPrefetch => TransportError::config(message),
        }
    }
}
