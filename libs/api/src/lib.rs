//! Capability traits and data model shared by the ordering harness,
//! the in-memory broker and the CLI.

pub mod channel;
pub mod error;
pub mod schedule;
pub mod types;
pub mod util;

pub use channel::{Connector, MessageChannel};
pub use error::{ErrorKind, SchedulerError, TransportError};
pub use schedule::{Task, TaskScheduler, TriggerHandle};
pub use types::{
    Ack, ConsumerSpec, Delivery, GapReport, Message, ObservationRecord, ProducerSpec,
    VerificationResult,
};
pub use util::{duration_ms, now_ms};
