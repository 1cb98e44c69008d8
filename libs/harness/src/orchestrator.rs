use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use harness_api::{
    Connector, ConsumerSpec, MessageChannel, ObservationRecord, ProducerSpec, Task, TaskScheduler,
    TriggerHandle, duration_ms,
};

use crate::consumer::PrefetchedConsumer;
use crate::producer::{MessageGroupProducer, SentCount, SentCounter};
use crate::report::{ProducerOutcome, RunReport};
use crate::verifier;
use crate::{ConsumerAbort, ProducerError, RunError};

// ═══════════════════════════════════════════════════════════════
//  Run state
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Scheduled,
    ProducersRunning,
    ConsumerRunning,
    Draining,
    Completed,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Scheduled => "scheduled",
            RunState::ProducersRunning => "producers_running",
            RunState::ConsumerRunning => "consumer_running",
            RunState::Draining => "draining",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scenario / plan
// ═══════════════════════════════════════════════════════════════

/// Относительные интервалы прогона.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    pub producer_stagger: Duration,
    /// None → 2 × последний старт producer'а.
    pub consumer_delay: Option<Duration>,
    pub run_budget: Duration,
    pub drain_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct Scenario {
    pub scenario_id: String,
    pub queue: String,
    pub producers: Vec<ProducerSpec>,
    pub consumer: ConsumerSpec,
    pub timing: Timing,
}

impl Scenario {
    pub fn total_configured(&self) -> u64 {
        self.producers.iter().map(|p| p.message_count).sum()
    }
}

/// Спеки с уже посчитанными абсолютными смещениями от старта прогона.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulePlan {
    pub producers: Vec<ProducerSpec>,
    pub consumer: ConsumerSpec,
}

/// Посчитать смещения: producer *i* стартует на `start_delay + i × stagger`,
/// consumer строго после последнего producer'а и строго внутри бюджета.
pub fn plan(scenario: &Scenario) -> Result<SchedulePlan, RunError> {
    if scenario.producers.is_empty() {
        return Err(RunError::Config("scenario has no producers".into()));
    }
    let timing = &scenario.timing;

    let mut producers = Vec::with_capacity(scenario.producers.len());
    for (i, spec) in scenario.producers.iter().enumerate() {
        let start_delay = u32::try_from(i)
            .ok()
            .and_then(|i| timing.producer_stagger.checked_mul(i))
            .and_then(|stagger| spec.start_delay.checked_add(stagger))
            .ok_or_else(|| RunError::Config(format!("start offset of '{}' overflows", spec.producer_id)))?;
        producers.push(ProducerSpec {
            start_delay,
            ..spec.clone()
        });
    }

    let last_producer = producers.iter().map(|p| p.start_delay).max().unwrap_or_default();
    let consumer_delay = match timing.consumer_delay {
        Some(delay) if !last_producer.is_zero() && delay <= last_producer => {
            return Err(RunError::Config(format!(
                "consumer delay {}ms is not after the last producer start {}ms",
                duration_ms(delay),
                duration_ms(last_producer)
            )));
        }
        Some(delay) => delay,
        None => last_producer.saturating_mul(2),
    };
    if consumer_delay >= timing.run_budget {
        return Err(RunError::Config(format!(
            "consumer delay {}ms does not fit into run budget {}ms",
            duration_ms(consumer_delay),
            duration_ms(timing.run_budget)
        )));
    }

    Ok(SchedulePlan {
        producers,
        consumer: ConsumerSpec {
            start_delay: consumer_delay,
            ..scenario.consumer.clone()
        },
    })
}

// ═══════════════════════════════════════════════════════════════
//  Run context
// ═══════════════════════════════════════════════════════════════

/// Результат задачи, отправленный из trigger'а оркестратору.
enum TaskEvent {
    Producer {
        index: usize,
        result: Result<SentCount, ProducerError>,
    },
    Consumer(Result<Vec<ObservationRecord>, ConsumerAbort>),
}

/// Почему закончилось ожидание событий.
enum Wake {
    Deadline,
    Stopped,
    AllReported,
}

struct RunContext {
    counters: Vec<SentCounter>,
    producers: Vec<Option<Result<SentCount, ProducerError>>>,
    consumer: Option<Result<Vec<ObservationRecord>, ConsumerAbort>>,
    consumer_scheduled: bool,
    channels: Vec<Arc<dyn MessageChannel>>,
    triggers: Vec<TriggerHandle>,
    failure: Option<RunError>,
}

impl RunContext {
    fn new(producers: usize) -> Self {
        Self {
            counters: (0..producers).map(|_| SentCounter::new()).collect(),
            producers: (0..producers).map(|_| None).collect(),
            consumer: None,
            consumer_scheduled: false,
            channels: Vec::new(),
            triggers: Vec::new(),
            failure: None,
        }
    }

    fn all_reported(&self) -> bool {
        self.consumer_scheduled && self.consumer.is_some() && self.producers.iter().all(Option::is_some)
    }

    /// Сохранить результат задачи. Возвращает фатальную ошибку прогона, если она есть.
    fn record(&mut self, event: TaskEvent) -> Option<RunError> {
        match event {
            TaskEvent::Producer { index, result } => {
                if let Err(e) = &result {
                    tracing::warn!(index, error = %e, "producer reported error");
                }
                if let Some(slot) = self.producers.get_mut(index) {
                    *slot = Some(result);
                }
                None
            }
            TaskEvent::Consumer(result) => {
                let fatal = match &result {
                    Ok(log) => {
                        tracing::info!(observed = log.len(), "consumer reported");
                        None
                    }
                    Err(abort) => {
                        tracing::warn!(observed = abort.observed.len(), error = %abort.error, "consumer aborted");
                        abort.error.is_fatal().then_some(RunError::TransportClosed)
                    }
                };
                self.consumer = Some(result);
                fatal
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  TestOrchestrator
// ═══════════════════════════════════════════════════════════════

/// Проводит один прогон: планирует producer'ов и consumer'а через
/// `TaskScheduler`, ждёт бюджет, сворачивает всё и проверяет лог.
///
/// Результаты задач приходят только через mpsc; других точек
/// синхронизации с задачами нет.
pub struct TestOrchestrator {
    scenario: Scenario,
    connector: Arc<dyn Connector>,
    scheduler: Arc<dyn TaskScheduler>,
    stop: CancellationToken,
    state: watch::Sender<RunState>,
}

impl TestOrchestrator {
    pub fn new(scenario: Scenario, connector: Arc<dyn Connector>, scheduler: Arc<dyn TaskScheduler>) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            scenario,
            connector,
            scheduler,
            stop: CancellationToken::new(),
            state,
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Подписка на переходы состояния.
    pub fn watch_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Кооперативный сигнал остановки; отмена переводит прогон в Draining.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub async fn run(self) -> RunReport {
        let started = Instant::now();
        let started_at_ms = harness_api::now_ms();
        tracing::info!(
            scenario = %self.scenario.scenario_id,
            queue = %self.scenario.queue,
            producers = self.scenario.producers.len(),
            "run starting"
        );

        let mut ctx = RunContext::new(self.scenario.producers.len());
        let (tx, mut rx) = mpsc::channel(self.scenario.producers.len() + 1);

        if let Err(e) = self.execute(&mut ctx, tx, &mut rx, started).await {
            tracing::error!(error = %e, "run failed");
            ctx.failure = Some(e);
        }
        self.teardown(&mut ctx, &mut rx).await;

        let state = if ctx.failure.is_some() {
            RunState::Failed
        } else {
            RunState::Completed
        };
        self.transition(state);
        self.build_report(ctx, state, started_at_ms, started.elapsed())
    }

    fn transition(&self, next: RunState) {
        let prev = self.state.send_replace(next);
        tracing::info!(scenario = %self.scenario.scenario_id, from = %prev, to = %next, "state transition");
    }

    async fn connect(&self, client: &str) -> Result<Arc<dyn MessageChannel>, RunError> {
        self.connector
            .connect(&self.scenario.queue, client)
            .await
            .map_err(|source| RunError::Connect {
                client: client.to_string(),
                source,
            })
    }

    async fn execute(
        &self,
        ctx: &mut RunContext,
        tx: mpsc::Sender<TaskEvent>,
        rx: &mut mpsc::Receiver<TaskEvent>,
        started: Instant,
    ) -> Result<(), RunError> {
        let plan = plan(&self.scenario)?;
        self.transition(RunState::Scheduled);

        // --- Producers ---
        for (index, spec) in plan.producers.into_iter().enumerate() {
            let channel = self.connect(&spec.producer_id).await?;
            ctx.channels.push(channel.clone());

            let name = spec.producer_id.clone();
            let delay = spec.start_delay;
            let producer = MessageGroupProducer::new(spec, channel, ctx.counters[index].clone(), self.stop.clone());
            let tx = tx.clone();
            let task: Task = Box::pin(async move {
                let result = producer.run().await;
                let _ = tx.send(TaskEvent::Producer { index, result }).await;
            });
            let handle = self.scheduler.schedule_once(&name, delay, task)?;
            tracing::info!(producer = %name, offset_ms = duration_ms(delay), trigger = %handle, "producer scheduled");
            ctx.triggers.push(handle);
        }
        self.transition(RunState::ProducersRunning);

        // --- Consumer ---
        let consumer_at = started + plan.consumer.start_delay;
        match self.wait_events(ctx, rx, consumer_at, false).await? {
            Wake::Deadline => {}
            Wake::Stopped | Wake::AllReported => {
                tracing::info!("stop requested before consumer start");
                return Ok(());
            }
        }

        let spec = plan.consumer;
        let name = spec.consumer_id.clone();
        let channel = self.connect(&name).await?;
        ctx.channels.push(channel.clone());
        let consumer = PrefetchedConsumer::new(spec, channel, self.stop.clone());
        let task: Task = Box::pin(async move {
            let result = consumer.run().await;
            let _ = tx.send(TaskEvent::Consumer(result)).await;
        });
        let handle = self.scheduler.schedule_once(&name, Duration::ZERO, task)?;
        ctx.triggers.push(handle);
        ctx.consumer_scheduled = true;
        self.transition(RunState::ConsumerRunning);

        // --- Budget ---
        let budget_end = started + self.scenario.timing.run_budget;
        match self.wait_events(ctx, rx, budget_end, true).await? {
            Wake::Deadline => tracing::info!(
                budget_ms = duration_ms(self.scenario.timing.run_budget),
                "run budget elapsed"
            ),
            Wake::Stopped => tracing::info!("stop requested"),
            Wake::AllReported => tracing::info!("all tasks reported"),
        }
        Ok(())
    }

    /// Собирать события до дедлайна, сигнала остановки, фатальной ошибки
    /// или (если `until_all`) до отчёта всех задач.
    async fn wait_events(
        &self,
        ctx: &mut RunContext,
        rx: &mut mpsc::Receiver<TaskEvent>,
        deadline: Instant,
        until_all: bool,
    ) -> Result<Wake, RunError> {
        loop {
            if until_all && ctx.all_reported() {
                return Ok(Wake::AllReported);
            }
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => return Ok(Wake::Stopped),
                Some(event) = rx.recv() => {
                    if let Some(fatal) = ctx.record(event) {
                        return Err(fatal);
                    }
                }
                _ = tokio::time::sleep_until(deadline) => return Ok(Wake::Deadline),
            }
        }
    }

    async fn teardown(&self, ctx: &mut RunContext, rx: &mut mpsc::Receiver<TaskEvent>) {
        self.transition(RunState::Draining);

        // 1. Несработавшие trigger'ы
        for handle in ctx.triggers.drain(..) {
            match self.scheduler.cancel(handle) {
                Ok(true) => tracing::info!(trigger = %handle, "trigger unscheduled"),
                Ok(false) => {}
                Err(e) => tracing::warn!(trigger = %handle, error = %e, "cancel failed"),
            }
        }

        // 2. Сигнал работающим задачам
        self.stop.cancel();

        // 3. Scheduler, не дольше drain_grace
        let grace = self.scenario.timing.drain_grace;
        match tokio::time::timeout(grace, self.scheduler.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "scheduler shutdown failed");
                ctx.failure.get_or_insert(RunError::Scheduler(e));
            }
            Err(_) => tracing::warn!(grace_ms = duration_ms(grace), "drain grace elapsed, tasks still running"),
        }

        // 4. Поздние результаты
        while let Ok(event) = rx.try_recv() {
            if let Some(fatal) = ctx.record(event) {
                ctx.failure.get_or_insert(fatal);
            }
        }

        // 5. Каналы
        for channel in ctx.channels.drain(..) {
            if let Err(e) = channel.close().await {
                tracing::debug!(error = ?e, "channel close error");
            }
        }
    }

    fn build_report(&self, ctx: RunContext, state: RunState, started_at_ms: i64, elapsed: Duration) -> RunReport {
        let producers: Vec<ProducerOutcome> = self
            .scenario
            .producers
            .iter()
            .zip(ctx.counters.iter())
            .zip(ctx.producers)
            .map(|((spec, counter), outcome)| ProducerOutcome {
                producer_id: spec.producer_id.clone(),
                group_id: spec.message_group.clone(),
                configured: spec.message_count,
                sent: counter.get(),
                reported: outcome.is_some(),
                error: outcome.and_then(Result::err),
            })
            .collect();

        let (observations, consumer_error, consumer_reported) = match ctx.consumer {
            Some(Ok(log)) => (log, None, true),
            Some(Err(abort)) => (abort.observed, Some(abort.error), true),
            None => (Vec::new(), None, false),
        };

        let total_sent: u64 = ctx.counters.iter().map(SentCounter::get).sum();
        let total_configured = self.scenario.total_configured();
        if total_sent != total_configured {
            tracing::warn!(total_sent, total_configured, "sent count differs from configured total");
        }

        let results = verifier::verify(&observations);
        let gaps = verifier::find_gaps(&observations, &self.scenario.producers);

        RunReport {
            scenario_id: self.scenario.scenario_id.clone(),
            state,
            failure: ctx.failure,
            producers,
            consumer_reported,
            consumer_error,
            observed: observations.len(),
            total_sent,
            total_configured,
            results,
            gaps,
            started_at_ms,
            elapsed,
        }
    }
}
