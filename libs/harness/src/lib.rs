//! Per-group FIFO ordering harness.
//!
//! Оркестратор запускает producer'ов и одного consumer'а через
//! `TaskScheduler`, собирает лог наблюдений и проверяет, что внутри
//! каждой message group sequence_id строго возрастает.

pub mod config;
pub mod consumer;
pub mod error;
pub mod orchestrator;
pub mod producer;
pub mod report;
pub mod scheduler;
pub mod verifier;

pub use config::{ConsumerConfig, ProducerConfig, ScenarioConfig, TESTCASE_ONE, TimingConfig};
pub use consumer::PrefetchedConsumer;
pub use error::{ConfigError, ConsumerAbort, ConsumerError, ProducerError, RunError};
pub use orchestrator::{RunState, Scenario, SchedulePlan, TestOrchestrator, Timing, plan};
pub use producer::{MessageGroupProducer, SentCount, SentCounter};
pub use report::{ProducerOutcome, RunReport};
pub use scheduler::TokioScheduler;
pub use verifier::{find_gaps, verify};
