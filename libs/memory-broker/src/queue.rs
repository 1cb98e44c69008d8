use std::collections::{BTreeMap, HashMap, VecDeque};

use tokio::sync::{Mutex, Notify};

use harness_api::{Ack, Delivery, Message};

use crate::{BrokerError, FaultPlan};

// ═══════════════════════════════════════════════════════════════
//  Stored message
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct Stored {
    broker_seq: u64,
    message: Message,
    redelivered: bool,
}

struct InFlight {
    stored: Stored,
    consumer: String,
}

// ═══════════════════════════════════════════════════════════════
//  Queue
// ═══════════════════════════════════════════════════════════════

/// Именованная очередь: pending (в порядке поступления) + in-flight
/// доставки + владельцы групп.
///
/// Группа закрепляется за первым consumer'ом, получившим её сообщение,
/// и освобождается только когда этот consumer закрывает канал.
pub(crate) struct Queue {
    pub(crate) name: String,
    pub(crate) state: Mutex<QueueState>,
    pub(crate) notify: Notify,
}

impl Queue {
    pub(crate) fn new(name: String, faults: &FaultPlan) -> Self {
        Self {
            state: Mutex::new(QueueState::new(name.clone(), faults.clone())),
            name,
            notify: Notify::new(),
        }
    }
}

pub(crate) struct QueueState {
    name: String,
    pending: VecDeque<Stored>,
    in_flight: BTreeMap<u64, InFlight>,
    owners: HashMap<String, String>,
    next_broker_seq: u64,
    next_tag: u64,
    deliveries: u64,
    closed: bool,
    faults: FaultPlan,
}

impl QueueState {
    fn new(name: String, faults: FaultPlan) -> Self {
        Self {
            name,
            pending: VecDeque::new(),
            in_flight: BTreeMap::new(),
            owners: HashMap::new(),
            next_broker_seq: 0,
            next_tag: 1,
            deliveries: 0,
            closed: false,
            faults,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    pub(crate) fn depth(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub(crate) fn enqueue(&mut self, message: Message) -> Result<Ack, BrokerError> {
        if self.closed {
            return Err(BrokerError::QueueClosed(self.name.clone()));
        }
        if let Some(left) = self.faults.reject_sends.get_mut(&message.payload_id) {
            if *left > 0 {
                *left -= 1;
                return Err(BrokerError::Rejected { payload_id: message.payload_id });
            }
        }

        let broker_seq = self.next_broker_seq;
        self.next_broker_seq += 1;
        self.pending.push_back(Stored { broker_seq, message, redelivered: false });
        Ok(Ack { broker_sequence: broker_seq })
    }

    /// Следующая доставка для `consumer`, если хватает prefetch-кредита
    /// и в очереди есть сообщение группы, не закреплённой за другим consumer'ом.
    pub(crate) fn next_delivery(&mut self, consumer: &str, prefetch: u32) -> Option<Delivery> {
        let unacked = self.in_flight.values().filter(|f| f.consumer == consumer).count();
        if unacked >= prefetch as usize {
            return None;
        }

        let mut idx = self.pending.iter().position(|s| {
            self.owners
                .get(&s.message.group_key)
                .is_none_or(|owner| owner == consumer)
        })?;

        if self.faults.swaps(self.deliveries + 1) {
            let key = &self.pending[idx].message.group_key;
            if let Some(later) = self
                .pending
                .iter()
                .skip(idx + 1)
                .position(|s| &s.message.group_key == key)
            {
                tracing::debug!(queue = %self.name, "fault plan: delivering out of order");
                idx = idx + 1 + later;
            }
        }

        let stored = self.pending.remove(idx)?;
        self.owners
            .entry(stored.message.group_key.clone())
            .or_insert_with(|| consumer.to_string());

        let tag = self.next_tag;
        self.next_tag += 1;
        self.deliveries += 1;

        let delivery = Delivery {
            message: stored.message.clone(),
            delivery_tag: tag,
            redelivered: stored.redelivered,
        };
        self.in_flight.insert(tag, InFlight { stored, consumer: consumer.to_string() });
        Some(delivery)
    }

    pub(crate) fn ack(&mut self, consumer: &str, tag: u64) -> Result<(), BrokerError> {
        match self.in_flight.get(&tag) {
            Some(f) if f.consumer == consumer => {
                self.in_flight.remove(&tag);
                Ok(())
            }
            _ => Err(BrokerError::UnknownDelivery { tag, client: consumer.to_string() }),
        }
    }

    /// Вернуть неподтверждённые доставки consumer'а в голову очереди
    /// (в исходном порядке, с флагом redelivered) и освободить его группы.
    pub(crate) fn release(&mut self, consumer: &str) -> usize {
        let tags: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.consumer == consumer)
            .map(|(tag, _)| *tag)
            .collect();

        let mut returned: Vec<Stored> = tags
            .iter()
            .filter_map(|tag| self.in_flight.remove(tag))
            .map(|f| f.stored)
            .collect();
        returned.sort_by_key(|s| s.broker_seq);

        let count = returned.len();
        for mut stored in returned.into_iter().rev() {
            stored.redelivered = true;
            self.pending.push_front(stored);
        }

        self.owners.retain(|_, owner| owner != consumer);
        count
    }
}
