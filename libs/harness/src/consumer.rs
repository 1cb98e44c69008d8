use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use harness_api::{ConsumerSpec, ErrorKind, MessageChannel, ObservationRecord, TransportError};

use crate::{ConsumerAbort, ConsumerError};

// ═══════════════════════════════════════════════════════════════
//  PrefetchedConsumer
// ═══════════════════════════════════════════════════════════════

/// Единственный consumer прогона: читает с фиксированным prefetch window
/// и ведёт лог наблюдений в порядке получения.
///
/// Запись в лог делается до ack: доставка, которую не успели подтвердить,
/// всё равно уже наблюдена.
pub struct PrefetchedConsumer {
    spec: ConsumerSpec,
    channel: Arc<dyn MessageChannel>,
    stop: CancellationToken,
}

impl PrefetchedConsumer {
    pub fn new(spec: ConsumerSpec, channel: Arc<dyn MessageChannel>, stop: CancellationToken) -> Self {
        Self { spec, channel, stop }
    }

    pub async fn run(self) -> Result<Vec<ObservationRecord>, ConsumerAbort> {
        let spec = &self.spec;
        let expected = spec.expected_message_count;
        let mut log: Vec<ObservationRecord> = Vec::with_capacity(expected.min(65536) as usize);

        if let Err(e) = self.channel.set_prefetch(spec.prefetch_size).await {
            return Err(abort(transport_error(e), log));
        }
        tracing::info!(
            consumer = %spec.consumer_id,
            prefetch = spec.prefetch_size,
            expected,
            "consumer started"
        );

        while (log.len() as u64) < expected {
            let received = log.len() as u64;
            let next = tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    tracing::warn!(consumer = %spec.consumer_id, received, expected, "consumer stopped");
                    return Err(abort(ConsumerError::Stopped { received, expected }, log));
                }
                next = self.channel.receive(spec.idle_timeout) => next,
            };

            let delivery = match next {
                Ok(Some(delivery)) => delivery,
                Ok(None) => {
                    tracing::warn!(
                        consumer = %spec.consumer_id,
                        received,
                        expected,
                        idle_ms = spec.idle_timeout.as_millis() as u64,
                        "idle timeout"
                    );
                    return Err(abort(ConsumerError::Timeout { received, expected }, log));
                }
                Err(e) => {
                    tracing::error!(consumer = %spec.consumer_id, error = ?e, "receive error");
                    return Err(abort(transport_error(e), log));
                }
            };

            let record = ObservationRecord::from_delivery(&delivery, received);
            tracing::debug!(
                consumer = %spec.consumer_id,
                group = %record.group_id,
                sequence = record.sequence_id,
                arrival = record.arrival_index,
                redelivered = record.redelivered,
                "received"
            );
            log.push(record);

            if let Err(e) = self.channel.ack(&delivery).await {
                tracing::error!(consumer = %spec.consumer_id, error = ?e, "ack error");
                return Err(abort(transport_error(e), log));
            }
        }

        tracing::info!(consumer = %spec.consumer_id, received = log.len(), "consumer finished");
        Ok(log)
    }
}

fn abort(error: ConsumerError, observed: Vec<ObservationRecord>) -> ConsumerAbort {
    ConsumerAbort { error, observed }
}

fn transport_error(e: TransportError) -> ConsumerError {
    match e.kind() {
        ErrorKind::Closed => ConsumerError::TransportClosed,
        _ => ConsumerError::Transport(e),
    }
}
