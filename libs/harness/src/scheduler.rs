use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use harness_api::{SchedulerError, Task, TaskScheduler, TriggerHandle};

// ═══════════════════════════════════════════════════════════════
//  TokioScheduler
// ═══════════════════════════════════════════════════════════════

/// `TaskScheduler` поверх tokio: каждый trigger это задача, которая спит
/// `delay` и затем выполняет переданный future.
///
/// Trigger считается сработавшим в момент снятия с учёта в `pending`;
/// `cancel()` конкурирует за то же снятие, поэтому задача либо
/// запускается, либо отменяется, но не оба сразу.
#[derive(Clone, Default)]
pub struct TokioScheduler {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingTrigger>>,
    root: CancellationToken,
    tracker: TaskTracker,
}

struct PendingTrigger {
    name: String,
    cancel: CancellationToken,
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, PendingTrigger>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Количество trigger'ов, которые ещё не сработали и не отменены.
    pub fn pending(&self) -> usize {
        self.inner.pending().len()
    }

    /// Количество задач (ожидающих и выполняющихся) под наблюдением.
    pub fn tracked(&self) -> usize {
        self.inner.tracker.len()
    }
}

impl TaskScheduler for TokioScheduler {
    fn schedule_once(&self, name: &str, delay: Duration, task: Task) -> Result<TriggerHandle, SchedulerError> {
        if self.inner.root.is_cancelled() || self.inner.tracker.is_closed() {
            return Err(SchedulerError::ShutDown);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.inner.root.child_token();
        self.inner.pending().insert(
            id,
            PendingTrigger {
                name: name.to_string(),
                cancel: cancel.clone(),
            },
        );

        let inner = self.inner.clone();
        let task_name = name.to_string();
        self.inner.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(trigger = id, name = %task_name, "trigger cancelled before firing");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if inner.pending().remove(&id).is_none() {
                return;
            }
            tracing::debug!(trigger = id, name = %task_name, "trigger fired");
            task.await;
        });

        tracing::debug!(trigger = id, name = %name, delay_ms = delay.as_millis() as u64, "trigger scheduled");
        Ok(TriggerHandle(id))
    }

    fn cancel(&self, handle: TriggerHandle) -> Result<bool, SchedulerError> {
        if handle.0 >= self.inner.next_id.load(Ordering::Relaxed) {
            return Err(SchedulerError::UnknownTrigger(handle.0));
        }
        match self.inner.pending().remove(&handle.0) {
            Some(trigger) => {
                trigger.cancel.cancel();
                tracing::debug!(trigger = handle.0, name = %trigger.name, "trigger unscheduled");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn shutdown(&self) -> Pin<Box<dyn Future<Output = Result<(), SchedulerError>> + Send + '_>> {
        Box::pin(async move {
            self.inner.root.cancel();
            let dropped = {
                let mut pending = self.inner.pending();
                let n = pending.len();
                pending.clear();
                n
            };
            self.inner.tracker.close();
            self.inner.tracker.wait().await;
            tracing::info!(unscheduled = dropped, "scheduler shut down");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn flag_task(flag: &Arc<AtomicBool>) -> Task {
        let flag = flag.clone();
        Box::pin(async move {
            flag.store(true, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        scheduler
            .schedule_once("job", Duration::from_secs(5), flag_task(&fired))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(scheduler.pending(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let handle = scheduler
            .schedule_once("job", Duration::from_secs(5), flag_task(&fired))
            .unwrap();

        assert_eq!(scheduler.cancel(handle), Ok(true));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!fired.load(Ordering::SeqCst));
        // повторная отмена: уже не pending
        assert_eq!(scheduler.cancel(handle), Ok(false));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_firing_reports_false() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let handle = scheduler
            .schedule_once("job", Duration::ZERO, flag_task(&fired))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(scheduler.cancel(handle), Ok(false));
    }

    #[tokio::test]
    async fn unknown_handle_is_an_error() {
        let scheduler = TokioScheduler::new();
        assert_eq!(
            scheduler.cancel(TriggerHandle(42)),
            Err(SchedulerError::UnknownTrigger(42))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_running_and_rejects_new() {
        let scheduler = TokioScheduler::new();
        let done = Arc::new(AtomicBool::new(false));
        let never = Arc::new(AtomicBool::new(false));

        let d = done.clone();
        scheduler
            .schedule_once(
                "running",
                Duration::ZERO,
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    d.store(true, Ordering::SeqCst);
                }),
            )
            .unwrap();
        scheduler
            .schedule_once("pending", Duration::from_secs(60), flag_task(&never))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1)).await;
        scheduler.shutdown().await.unwrap();

        assert!(done.load(Ordering::SeqCst));
        assert!(!never.load(Ordering::SeqCst));
        assert_eq!(scheduler.tracked(), 0);
        assert!(matches!(
            scheduler.schedule_once("late", Duration::ZERO, flag_task(&never)),
            Err(SchedulerError::ShutDown)
        ));
    }
}
