use std::time::Duration;

use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════
//  Specs
// ════════════════════════════════════════════════════════════════

/// Описание одного producer'а: какую группу, сколько сообщений и с какой
/// нумерацией он отправляет.
///
/// Создаётся из конфигурации, неизменяем. Оркестратор владеет им до передачи
/// в задачу producer'а.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerSpec {
    pub producer_id: String,
    /// Message group (JMSXGroupID-подобный ключ affinity).
    pub message_group: String,
    pub message_count: u64,
    /// sequence_id первого сообщения; далее +1 на каждое.
    pub start_sequence: u64,
    /// Префикс payload id, e.g. "A-" → "A-0", "A-1", ...
    pub id_prefix: String,
    /// Смещение старта от начала прогона.
    pub start_delay: Duration,
}

impl ProducerSpec {
    /// Последний (exclusive) sequence_id, который producer может отправить.
    pub fn end_sequence(&self) -> u64 {
        self.start_sequence + self.message_count
    }

    /// Сообщение для заданного offset в [0, message_count).
    pub fn message_at(&self, offset: u64) -> Message {
        Message::new(
            self.message_group.clone(),
            self.start_sequence + offset,
            format!("{}{offset}", self.id_prefix),
        )
    }
}

/// Описание consumer'а.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSpec {
    pub consumer_id: String,
    pub expected_message_count: u64,
    /// Transport-level prefetch credit.
    pub prefetch_size: u32,
    pub start_delay: Duration,
    /// Максимальное ожидание одного receive().
    pub idle_timeout: Duration,
}

// ════════════════════════════════════════════════════════════════
//  Messages
// ════════════════════════════════════════════════════════════════

/// Сообщение, отправляемое producer'ом.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub group_id: String,
    pub sequence_id: u64,
    /// Глобально уникальный id: id_prefix + offset.
    pub payload_id: String,
    /// Ключ group affinity для транспорта. Совпадает с group_id.
    pub group_key: String,
}

impl Message {
    pub fn new(group_id: impl Into<String>, sequence_id: u64, payload_id: impl Into<String>) -> Self {
        let group_id = group_id.into();
        Self {
            group_key: group_id.clone(),
            group_id,
            sequence_id,
            payload_id: payload_id.into(),
        }
    }
}

/// Подтверждение отправки от транспорта.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Позиция, присвоенная брокером при постановке в очередь.
    pub broker_sequence: u64,
}

/// Доставленное consumer'у сообщение.
///
/// `delivery_tag` идентифицирует доставку для `ack()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message: Message,
    pub delivery_tag: u64,
    /// true если сообщение уже доставлялось и не было подтверждено.
    pub redelivered: bool,
}

// ════════════════════════════════════════════════════════════════
//  Observation / verification
// ════════════════════════════════════════════════════════════════

/// Одна запись лога наблюдений consumer'а.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub group_id: String,
    pub sequence_id: u64,
    /// Глобальный порядковый номер получения (с 0).
    pub arrival_index: u64,
    pub payload_id: String,
    #[serde(default)]
    pub redelivered: bool,
}

impl ObservationRecord {
    pub fn from_delivery(delivery: &Delivery, arrival_index: u64) -> Self {
        Self {
            group_id: delivery.message.group_id.clone(),
            sequence_id: delivery.message.sequence_id,
            arrival_index,
            payload_id: delivery.message.payload_id.clone(),
            redelivered: delivery.redelivered,
        }
    }
}

/// Результат проверки порядка для одной группы.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub group_id: String,
    pub ok: bool,
    /// arrival_index первой записи, нарушившей строгий рост sequence_id.
    pub first_violation_index: Option<u64>,
    /// Количество записей группы в логе.
    pub observed: usize,
}

/// Пропуски в группе: sequence_id, которые producer должен был отправить,
/// но consumer их не увидел. Отдельное от нарушения порядка условие.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapReport {
    pub group_id: String,
    pub expected: u64,
    pub received_distinct: u64,
    pub missing: Vec<u64>,
}
