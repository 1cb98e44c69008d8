use std::collections::HashMap;

use serde::Deserialize;

/// Искусственные сбои брокера для проверки самого harness'а.
///
/// По умолчанию пустой: брокер честно соблюдает FIFO внутри группы.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FaultPlan {
    /// Каждая N-я доставка отдаёт следующее сообщение той же группы
    /// вместо головы очереди (нарушение порядка). None/0 = выключено.
    #[serde(default)]
    pub swap_every: Option<u64>,
    /// payload_id → сколько раз подряд отклонить отправку.
    #[serde(default)]
    pub reject_sends: HashMap<String, u32>,
}

impl FaultPlan {
    pub fn is_empty(&self) -> bool {
        self.swap_every.unwrap_or(0) == 0 && self.reject_sends.is_empty()
    }

    /// Должна ли доставка с порядковым номером `delivery` (с 1) быть переставлена.
    pub(crate) fn swaps(&self, delivery: u64) -> bool {
        match self.swap_every {
            Some(every) if every > 0 => delivery % every == 0,
            _ => false,
        }
    }
}
