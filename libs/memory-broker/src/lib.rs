//! In-process message broker with ActiveMQ-style message groups.
//!
//! Реализует `MessageChannel` и `Connector` из `harness-api`, чтобы
//! harness, его тесты и CLI могли работать без внешнего брокера.

pub mod error;
mod faults;
mod queue;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use harness_api::{Ack, Connector, Delivery, Message, MessageChannel, TransportError};

pub use error::BrokerError;
pub use faults::FaultPlan;

use queue::Queue;

/// Prefetch по умолчанию для queue consumer'а (как у ActiveMQ).
pub const DEFAULT_PREFETCH: u32 = 1000;

// ═══════════════════════════════════════════════════════════════
//  MemoryBroker
// ═══════════════════════════════════════════════════════════════

/// Реестр очередей. Очередь создаётся при первом подключении к ней.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

#[derive(Default)]
struct BrokerInner {
    queues: RwLock<HashMap<String, Arc<Queue>>>,
    faults: FaultPlan,
    closed: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Брокер с искусственными сбоями (см. `FaultPlan`).
    pub fn with_faults(faults: FaultPlan) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                queues: RwLock::new(HashMap::new()),
                faults,
                closed: AtomicBool::new(false),
            }),
        }
    }

    async fn queue(&self, name: &str) -> Arc<Queue> {
        if let Some(q) = self.inner.queues.read().await.get(name) {
            return q.clone();
        }
        let mut queues = self.inner.queues.write().await;
        queues
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(queue = %name, "queue created");
                Arc::new(Queue::new(name.to_string(), &self.inner.faults))
            })
            .clone()
    }

    /// Открыть канал к очереди.
    pub async fn open_channel(&self, queue: &str, client_id: &str) -> MemoryChannel {
        MemoryChannel {
            queue: self.queue(queue).await,
            client_id: client_id.to_string(),
            prefetch: AtomicU32::new(DEFAULT_PREFETCH),
            closed: AtomicBool::new(false),
        }
    }

    /// Количество сообщений, ожидающих доставки.
    pub async fn depth(&self, queue: &str) -> usize {
        match self.inner.queues.read().await.get(queue) {
            Some(q) => q.state.lock().await.depth(),
            None => 0,
        }
    }

    /// Количество доставленных, но не подтверждённых сообщений.
    pub async fn in_flight(&self, queue: &str) -> usize {
        match self.inner.queues.read().await.get(queue) {
            Some(q) => q.state.lock().await.in_flight(),
            None => 0,
        }
    }

    /// Закрыть все очереди: любые операции каналов и новые подключения
    /// далее завершаются `Closed`.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let queues = self.inner.queues.read().await;
        for q in queues.values() {
            q.state.lock().await.close();
            q.notify.notify_waiters();
        }
        tracing::info!(queues = queues.len(), "broker shut down");
    }
}

impl Connector for MemoryBroker {
    fn connect(
        &self,
        queue: &str,
        client_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn MessageChannel>, TransportError>> + Send + '_>> {
        let queue = queue.to_string();
        let client_id = client_id.to_string();
        Box::pin(async move {
            if self.inner.closed.load(Ordering::Acquire) {
                return Err(BrokerError::QueueClosed(queue).into_transport_error());
            }
            let channel = self.open_channel(&queue, &client_id).await;
            if channel.queue.state.lock().await.is_closed() {
                return Err(BrokerError::QueueClosed(queue).into_transport_error());
            }
            tracing::debug!(queue = %queue, client = %client_id, "channel opened");
            Ok(Arc::new(channel) as Arc<dyn MessageChannel>)
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryChannel
// ═══════════════════════════════════════════════════════════════

/// Канал одного клиента к одной очереди.
pub struct MemoryChannel {
    queue: Arc<Queue>,
    client_id: String,
    prefetch: AtomicU32,
    closed: AtomicBool,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::ChannelClosed(self.client_id.clone()).into_transport_error());
        }
        Ok(())
    }
}

impl MessageChannel for MemoryChannel {
    fn send(&self, message: Message) -> Pin<Box<dyn Future<Output = Result<Ack, TransportError>> + Send + '_>> {
        Box::pin(async move {
            self.ensure_open()?;
            let ack = self
                .queue
                .state
                .lock()
                .await
                .enqueue(message)
                .map_err(BrokerError::into_transport_error)?;
            self.queue.notify.notify_waiters();
            Ok(ack)
        })
    }

    fn set_prefetch(&self, n: u32) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        Box::pin(async move {
            self.ensure_open()?;
            if n == 0 {
                return Err(BrokerError::InvalidPrefetch.into_transport_error());
            }
            self.prefetch.store(n, Ordering::Release);
            // больше кредита: ожидающий receive может продолжить
            self.queue.notify.notify_waiters();
            Ok(())
        })
    }

    fn receive(
        &self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Delivery>, TransportError>> + Send + '_>> {
        Box::pin(async move {
            let deadline = Instant::now() + timeout;
            loop {
                // Регистрируемся до проверки очереди, чтобы не пропустить notify.
                let notified = self.queue.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                {
                    self.ensure_open()?;
                    let mut state = self.queue.state.lock().await;
                    if state.is_closed() {
                        return Err(BrokerError::QueueClosed(self.queue.name.clone()).into_transport_error());
                    }
                    let prefetch = self.prefetch.load(Ordering::Acquire);
                    if let Some(delivery) = state.next_delivery(&self.client_id, prefetch) {
                        return Ok(Some(delivery));
                    }
                }

                tokio::select! {
                    _ = &mut notified => {}
                    _ = tokio::time::sleep_until(deadline) => return Ok(None),
                }
            }
        })
    }

    fn ack(&self, delivery: &Delivery) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        let tag = delivery.delivery_tag;
        Box::pin(async move {
            self.ensure_open()?;
            let mut state = self.queue.state.lock().await;
            if state.is_closed() {
                return Err(BrokerError::QueueClosed(self.queue.name.clone()).into_transport_error());
            }
            state
                .ack(&self.client_id, tag)
                .map_err(BrokerError::into_transport_error)?;
            drop(state);
            self.queue.notify.notify_waiters();
            Ok(())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            let returned = self.queue.state.lock().await.release(&self.client_id);
            self.queue.notify.notify_waiters();
            if returned > 0 {
                tracing::debug!(
                    queue = %self.queue.name,
                    client = %self.client_id,
                    returned,
                    "unacked deliveries returned to queue"
                );
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn delivers_in_send_order_and_acks() {
        let broker = MemoryBroker::new();
        let producer = broker.connect("q", "p1").await.unwrap();
        let consumer = broker.connect("q", "c1").await.unwrap();

        for seq in 0..3 {
            producer.send(Message::new("A", seq, format!("A-{seq}"))).await.unwrap();
        }
        consumer.set_prefetch(1).await.unwrap();

        for seq in 0..3 {
            let d = consumer.receive(Duration::from_secs(1)).await.unwrap().unwrap();
            assert_eq!(d.message.sequence_id, seq);
            consumer.ack(&d).await.unwrap();
        }
        assert_eq!(broker.depth("q").await, 0);
        assert_eq!(broker.in_flight("q").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn receive_times_out_when_prefetch_exhausted() {
        let broker = MemoryBroker::new();
        let channel = broker.connect("q", "c1").await.unwrap();
        channel.send(Message::new("A", 0, "A-0")).await.unwrap();
        channel.send(Message::new("A", 1, "A-1")).await.unwrap();
        channel.set_prefetch(1).await.unwrap();

        let first = channel.receive(Duration::from_millis(100)).await.unwrap();
        assert!(first.is_some());
        // не подтвердили: кредита нет
        let second = channel.receive(Duration::from_millis(100)).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn receive_wakes_on_send() {
        let broker = MemoryBroker::new();
        let consumer = broker.connect("q", "c1").await.unwrap();
        let producer = broker.connect("q", "p1").await.unwrap();

        let waiter = tokio::spawn(async move { consumer.receive(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        producer.send(Message::new("A", 7, "A-7")).await.unwrap();

        let delivery = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.message.sequence_id, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn close_redelivers_to_next_consumer() {
        let broker = MemoryBroker::new();
        let first = broker.connect("q", "c1").await.unwrap();
        first.send(Message::new("A", 0, "A-0")).await.unwrap();
        let d = first.receive(Duration::from_secs(1)).await.unwrap().unwrap();
        assert!(!d.redelivered);
        first.close().await.unwrap();

        let second = broker.connect("q", "c2").await.unwrap();
        let again = second.receive(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(again.message.payload_id, "A-0");
        assert!(again.redelivered);

        let err = first.send(Message::new("A", 1, "A-1")).await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_channels() {
        let broker = MemoryBroker::new();
        let channel = broker.connect("q", "c1").await.unwrap();
        broker.shutdown().await;

        let err = channel.receive(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.is_closed());
        assert!(broker.connect("q", "c2").await.is_err());
        // и для очереди, которой до shutdown не было
        assert!(broker.connect("other", "c3").await.is_err());
    }

    #[tokio::test]
    async fn zero_prefetch_is_config_error() {
        let broker = MemoryBroker::new();
        let channel = broker.connect("q", "c1").await.unwrap();
        let err = channel.set_prefetch(0).await.unwrap_err();
        assert_eq!(err.kind(), harness_api::ErrorKind::Config);
    }
}
