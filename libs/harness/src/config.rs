use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use harness_api::{ConsumerSpec, ProducerSpec};

use crate::ConfigError;
use crate::orchestrator::{Scenario, Timing};

/// Идентификатор встроенного сценария.
pub const TESTCASE_ONE: &str = "fifo-testcase-1";

// ═══════════════════════════════════════════════════════════════
//  Scenario Config
// ═══════════════════════════════════════════════════════════════

/// Сценарий прогона, как он записан в TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default = "default_scenario_id")]
    pub scenario_id: String,
    /// Имя очереди, общей для всех producer'ов и consumer'а.
    #[serde(default = "default_queue")]
    pub queue: String,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub producers: Vec<ProducerConfig>,
    /// Настройки транспорта (для `memory://` это `FaultPlan`).
    #[serde(default)]
    pub broker: Option<toml::Value>,
}

fn default_scenario_id() -> String {
    TESTCASE_ONE.into()
}
fn default_queue() -> String {
    "fifo.test".into()
}

// ═══════════════════════════════════════════════════════════════
//  Timing Config
// ═══════════════════════════════════════════════════════════════

/// Все относительные смещения прогона, в миллисекундах.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    /// Шаг между стартами соседних producer'ов.
    #[serde(default)]
    pub producer_stagger_ms: u64,
    /// Старт consumer'а. Без указания: 2 × последний старт producer'а.
    #[serde(default)]
    pub consumer_delay_ms: Option<u64>,
    #[serde(default = "default_run_budget_ms")]
    pub run_budget_ms: u64,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,
}

fn default_run_budget_ms() -> u64 {
    60_000
}
fn default_idle_timeout_ms() -> u64 {
    10_000
}
fn default_drain_grace_ms() -> u64 {
    5_000
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            producer_stagger_ms: 0,
            consumer_delay_ms: None,
            run_budget_ms: default_run_budget_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            drain_grace_ms: default_drain_grace_ms(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Consumer / Producer Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    #[serde(default = "default_consumer_name")]
    pub name: String,
    #[serde(default = "default_prefetch")]
    pub prefetch: u32,
    /// Сколько сообщений ждать. Без указания: сумма `count` всех producer'ов.
    #[serde(default)]
    pub expected: Option<u64>,
}

fn default_consumer_name() -> String {
    "consumer_1".into()
}
fn default_prefetch() -> u32 {
    1
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            name: default_consumer_name(),
            prefetch: default_prefetch(),
            expected: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    pub name: String,
    pub group: String,
    pub count: u64,
    pub sequence_start: u64,
    pub prefix: String,
    /// Собственная задержка до stagger-смещения.
    #[serde(default)]
    pub start_delay_ms: u64,
}

impl ScenarioConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(path, &content)
    }

    /// Разобрать и проверить TOML. `origin` попадает только в текст ошибки.
    pub fn parse(origin: &str, content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            detail: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Встроенный сценарий: три группы A/B/C по `count` сообщений,
    /// producer'ы стартуют сразу, consumer через 10s и ждёт `4 × count`
    /// (заведомо больше, чем будет отправлено).
    pub fn testcase_one(count: u64, prefetch: u32) -> Self {
        let producer = |n: u32, letter: &str, start: u64| ProducerConfig {
            name: format!("producer_{n}"),
            group: format!("Group-{letter}"),
            count,
            sequence_start: start,
            prefix: format!("{letter}-"),
            start_delay_ms: 0,
        };
        Self {
            scenario_id: default_scenario_id(),
            queue: default_queue(),
            timing: TimingConfig {
                producer_stagger_ms: 0,
                consumer_delay_ms: Some(10_000),
                ..TimingConfig::default()
            },
            consumer: ConsumerConfig {
                name: default_consumer_name(),
                prefetch,
                expected: Some(count.saturating_mul(4)),
            },
            producers: vec![
                producer(1, "A", 10_000),
                producer(2, "B", 15_000),
                producer(3, "C", 20_000),
            ],
            broker: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.producers.is_empty() {
            return Err(ConfigError::Invalid("no [[producers]] configured".into()));
        }
        if self.consumer.prefetch == 0 {
            return Err(ConfigError::Invalid("consumer.prefetch must be > 0".into()));
        }
        if self.timing.idle_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timing.idle_timeout_ms must be > 0".into()));
        }
        if self.timing.run_budget_ms == 0 {
            return Err(ConfigError::Invalid("timing.run_budget_ms must be > 0".into()));
        }

        let mut names = HashSet::new();
        let mut groups = HashSet::new();
        let mut prefixes = HashSet::new();
        for p in &self.producers {
            if p.count == 0 {
                return Err(ConfigError::Invalid(format!("producer '{}': count must be > 0", p.name)));
            }
            if p.sequence_start.checked_add(p.count).is_none() {
                return Err(ConfigError::Invalid(format!("producer '{}': sequence range overflows", p.name)));
            }
            if !names.insert(p.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate producer name '{}'", p.name)));
            }
            if !groups.insert(p.group.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate message group '{}'", p.group)));
            }
            if !prefixes.insert(p.prefix.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate id prefix '{}'", p.prefix)));
            }
        }
        if names.contains(self.consumer.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "consumer name '{}' is already used by a producer",
                self.consumer.name
            )));
        }
        Ok(())
    }

    pub fn total_configured(&self) -> u64 {
        self.producers.iter().map(|p| p.count).sum()
    }

    /// Типизированный сценарий для оркестратора.
    ///
    /// Смещения здесь ещё не посчитаны: `start_delay` producer'а пока
    /// собственная задержка, stagger и старт consumer'а применяет `plan()`.
    pub fn to_scenario(&self) -> Scenario {
        let producers = self
            .producers
            .iter()
            .map(|p| ProducerSpec {
                producer_id: p.name.clone(),
                message_group: p.group.clone(),
                message_count: p.count,
                start_sequence: p.sequence_start,
                id_prefix: p.prefix.clone(),
                start_delay: Duration::from_millis(p.start_delay_ms),
            })
            .collect();

        let consumer = ConsumerSpec {
            consumer_id: self.consumer.name.clone(),
            expected_message_count: self.consumer.expected.unwrap_or_else(|| self.total_configured()),
            prefetch_size: self.consumer.prefetch,
            start_delay: Duration::ZERO,
            idle_timeout: Duration::from_millis(self.timing.idle_timeout_ms),
        };

        Scenario {
            scenario_id: self.scenario_id.clone(),
            queue: self.queue.clone(),
            producers,
            consumer,
            timing: Timing {
                producer_stagger: Duration::from_millis(self.timing.producer_stagger_ms),
                consumer_delay: self.timing.consumer_delay_ms.map(Duration::from_millis),
                run_budget: Duration::from_millis(self.timing.run_budget_ms),
                drain_grace: Duration::from_millis(self.timing.drain_grace_ms),
            },
        }
    }
}
