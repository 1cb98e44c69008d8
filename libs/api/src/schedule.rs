use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::SchedulerError;

// ════════════════════════════════════════════════════════════════
//  Scheduling capability
// ════════════════════════════════════════════════════════════════

/// Задача, запускаемая планировщиком один раз.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Handle одноразового trigger'а.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerHandle(pub u64);

impl std::fmt::Display for TriggerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "trigger#{}", self.0)
    }
}

/// Одноразовые trigger'ы с задержкой относительно момента постановки.
///
/// Повторений и persistence нет.
pub trait TaskScheduler: Send + Sync {
    /// Запустить `task` через `delay`. `name` используется только для логов.
    fn schedule_once(&self, name: &str, delay: Duration, task: Task) -> Result<TriggerHandle, SchedulerError>;

    /// Отменить ещё не сработавший trigger.
    ///
    /// `Ok(true)` = запуск предотвращён, `Ok(false)` = trigger уже сработал.
    /// Уже запущенная задача не прерывается.
    fn cancel(&self, handle: TriggerHandle) -> Result<bool, SchedulerError>;

    /// Остановить планировщик: отклонять новые trigger'ы, отменить ожидающие
    /// и дождаться завершения уже запущенных задач.
    fn shutdown(&self) -> Pin<Box<dyn Future<Output = Result<(), SchedulerError>> + Send + '_>>;
}
