use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use harness_api::{Ack, MessageChannel, ProducerSpec};

use crate::ProducerError;

/// Количество сообщений, подтверждённых транспортом.
pub type SentCount = u64;

// ═══════════════════════════════════════════════════════════════
//  SentCounter
// ═══════════════════════════════════════════════════════════════

/// Счётчик отправленных сообщений одного producer'а.
///
/// Пишет только владелец-producer; оркестратор читает после завершения.
#[derive(Debug, Clone, Default)]
pub struct SentCounter(Arc<AtomicU64>);

impl SentCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn increment(&self) {
        self.0.fetch_add(1, Ordering::Release);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

// ═══════════════════════════════════════════════════════════════
//  MessageGroupProducer
// ═══════════════════════════════════════════════════════════════

/// Отправляет последовательность сообщений одной группы.
///
/// Следующая отправка начинается только после ack предыдущей, поэтому
/// собственный порядок producer'а сохраняется; перемешиваться могут
/// только параллельные producer'ы.
pub struct MessageGroupProducer {
    spec: ProducerSpec,
    channel: Arc<dyn MessageChannel>,
    counter: SentCounter,
    stop: CancellationToken,
}

impl MessageGroupProducer {
    pub fn new(
        spec: ProducerSpec,
        channel: Arc<dyn MessageChannel>,
        counter: SentCounter,
        stop: CancellationToken,
    ) -> Self {
        Self { spec, channel, counter, stop }
    }

    pub async fn run(self) -> Result<SentCount, ProducerError> {
        let spec = &self.spec;
        tracing::info!(
            producer = %spec.producer_id,
            group = %spec.message_group,
            count = spec.message_count,
            start_sequence = spec.start_sequence,
            "producer started"
        );

        let mut sent: SentCount = 0;
        for offset in 0..spec.message_count {
            if self.stop.is_cancelled() {
                tracing::warn!(producer = %spec.producer_id, sent, "producer stopped");
                return Err(ProducerError::Stopped { sent });
            }

            let ack = self.send_with_retry(offset).await?;
            sent += 1;
            self.counter.increment();
            tracing::debug!(
                producer = %spec.producer_id,
                group = %spec.message_group,
                sequence = spec.start_sequence + offset,
                broker_sequence = ack.broker_sequence,
                "sent"
            );
        }

        tracing::info!(producer = %spec.producer_id, group = %spec.message_group, sent, "producer finished");
        Ok(sent)
    }

    /// Одна немедленная повторная попытка, без backoff.
    async fn send_with_retry(&self, offset: u64) -> Result<Ack, ProducerError> {
        let message = self.spec.message_at(offset);
        match self.channel.send(message.clone()).await {
            Ok(ack) => Ok(ack),
            Err(e) => {
                tracing::warn!(
                    producer = %self.spec.producer_id,
                    payload = %message.payload_id,
                    error = ?e,
                    "send error, retrying"
                );
                self.channel.send(message).await.map_err(|source| {
                    tracing::error!(
                        producer = %self.spec.producer_id,
                        offset,
                        error = ?source,
                        "send failed after retry"
                    );
                    ProducerError::SendFailed { offset, source }
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use memory_broker::{FaultPlan, MemoryBroker};

    use harness_api::Connector;

    use super::*;

    fn spec(count: u64) -> ProducerSpec {
        ProducerSpec {
            producer_id: "producer_1".into(),
            message_group: "Group-A".into(),
            message_count: count,
            start_sequence: 10000,
            id_prefix: "A-".into(),
            start_delay: Duration::ZERO,
        }
    }

    async fn drain(broker: &MemoryBroker) -> Vec<(u64, String)> {
        let channel = broker.connect("q", "reader").await.unwrap();
        let mut out = Vec::new();
        while let Some(d) = channel.receive(Duration::from_millis(10)).await.unwrap() {
            channel.ack(&d).await.unwrap();
            out.push((d.message.sequence_id, d.message.payload_id));
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn sends_sequenced_messages_in_order() {
        let broker = MemoryBroker::new();
        let channel = broker.connect("q", "producer_1").await.unwrap();
        let counter = SentCounter::new();

        let sent = MessageGroupProducer::new(spec(5), channel, counter.clone(), CancellationToken::new())
            .run()
            .await
            .unwrap();

        assert_eq!(sent, 5);
        assert_eq!(counter.get(), 5);
        let received = drain(&broker).await;
        assert_eq!(
            received,
            (0..5).map(|i| (10000 + i, format!("A-{i}"))).collect::<Vec<_>>()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn single_failure_is_retried() {
        let mut faults = FaultPlan::default();
        faults.reject_sends.insert("A-2".into(), 1);
        let broker = MemoryBroker::with_faults(faults);
        let channel = broker.connect("q", "producer_1").await.unwrap();

        let sent = MessageGroupProducer::new(spec(4), channel, SentCounter::new(), CancellationToken::new())
            .run()
            .await
            .unwrap();

        assert_eq!(sent, 4);
        assert_eq!(drain(&broker).await.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn second_failure_aborts_with_offset() {
        let mut faults = FaultPlan::default();
        faults.reject_sends.insert("A-2".into(), 2);
        let broker = MemoryBroker::with_faults(faults);
        let channel = broker.connect("q", "producer_1").await.unwrap();
        let counter = SentCounter::new();

        let err = MessageGroupProducer::new(spec(4), channel, counter.clone(), CancellationToken::new())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, ProducerError::SendFailed { offset: 2, .. }));
        assert_eq!(counter.get(), 2);
    }

    #[tokio::test]
    async fn stop_signal_is_checked_between_sends() {
        let broker = MemoryBroker::new();
        let channel = broker.connect("q", "producer_1").await.unwrap();
        let stop = CancellationToken::new();
        stop.cancel();

        let err = MessageGroupProducer::new(spec(3), channel, SentCounter::new(), stop)
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, ProducerError::Stopped { sent: 0 }));
        assert_eq!(broker.depth("q").await, 0);
    }
}
