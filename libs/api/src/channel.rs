use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::{Ack, Delivery, Message, TransportError};

// ════════════════════════════════════════════════════════════════
//  Transport capability
// ════════════════════════════════════════════════════════════════

/// Канал к очереди брокера: отправка, получение с prefetch-кредитом, ack.
///
/// Wire-протокол и управление соединением вне этого трейта. Harness
/// требует только четыре операции с описанной семантикой блокировки.
pub trait MessageChannel: Send + Sync {
    /// Отправить сообщение. Future завершается после подтверждения
    /// брокером (send acknowledgment). Group affinity по `message.group_key`.
    fn send(&self, message: Message) -> Pin<Box<dyn Future<Output = Result<Ack, TransportError>> + Send + '_>>;

    /// Установить prefetch window: максимум неподтверждённых доставок.
    fn set_prefetch(&self, n: u32) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>>;

    /// Получить следующее сообщение. `Ok(None)` = за `timeout` ничего не пришло.
    fn receive(
        &self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Delivery>, TransportError>> + Send + '_>>;

    /// Подтвердить доставку.
    fn ack(&self, delivery: &Delivery) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>>;

    /// Закрыть канал. Неподтверждённые доставки возвращаются брокеру.
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>>;
}

/// Фабрика каналов: одно соединение на producer/consumer.
pub trait Connector: Send + Sync {
    /// Открыть канал к очереди `queue` от имени `client_id`.
    fn connect(
        &self,
        queue: &str,
        client_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn MessageChannel>, TransportError>> + Send + '_>>;
}
