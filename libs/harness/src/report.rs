use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use harness_api::{GapReport, VerificationResult, duration_ms};

use crate::orchestrator::RunState;
use crate::{ConsumerError, ProducerError, RunError};

/// Сколько пропущенных sequence_id показывать в текстовом отчёте.
const MISSING_PREVIEW: usize = 8;

#[derive(Debug, Clone)]
pub struct ProducerOutcome {
    pub producer_id: String,
    pub group_id: String,
    pub configured: u64,
    /// Значение счётчика producer'а после прогона.
    pub sent: u64,
    /// false → задача не успела отчитаться (не стартовала или не уложилась в drain grace).
    pub reported: bool,
    pub error: Option<ProducerError>,
}

// ═══════════════════════════════════════════════════════════════
//  RunReport
// ═══════════════════════════════════════════════════════════════

/// Итог прогона: состояние, ошибки задач и результат проверки порядка.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub scenario_id: String,
    pub state: RunState,
    pub failure: Option<RunError>,
    pub producers: Vec<ProducerOutcome>,
    pub consumer_reported: bool,
    pub consumer_error: Option<ConsumerError>,
    pub observed: usize,
    pub total_sent: u64,
    pub total_configured: u64,
    pub results: BTreeMap<String, VerificationResult>,
    /// Только группы с пропусками; на PASS/FAIL не влияют.
    pub gaps: BTreeMap<String, GapReport>,
    pub started_at_ms: i64,
    pub elapsed: Duration,
}

impl RunReport {
    /// Прогон завершён штатно, есть хотя бы одна проверенная группа
    /// и ни одна группа не нарушила порядок.
    pub fn passed(&self) -> bool {
        self.state == RunState::Completed
            && self.failure.is_none()
            && !self.results.is_empty()
            && self.results.values().all(|r| r.ok)
    }

    pub fn exit_code(&self) -> i32 {
        if self.passed() { 0 } else { 1 }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let producers: Vec<serde_json::Value> = self
            .producers
            .iter()
            .map(|p| {
                serde_json::json!({
                    "producer_id": p.producer_id,
                    "group_id": p.group_id,
                    "configured": p.configured,
                    "sent": p.sent,
                    "reported": p.reported,
                    "error": p.error.as_ref().map(ToString::to_string),
                })
            })
            .collect();

        serde_json::json!({
            "scenario_id": self.scenario_id,
            "state": self.state,
            "passed": self.passed(),
            "failure": self.failure.as_ref().map(ToString::to_string),
            "producers": producers,
            "consumer": {
                "reported": self.consumer_reported,
                "error": self.consumer_error.as_ref().map(ToString::to_string),
                "observed": self.observed,
            },
            "total_sent": self.total_sent,
            "total_configured": self.total_configured,
            "results": self.results,
            "gaps": self.gaps,
            "started_at_ms": self.started_at_ms,
            "elapsed_ms": duration_ms(self.elapsed),
        })
    }

    /// Человекочитаемый отчёт: по строке PASS/FAIL на группу.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "scenario {}: {} in {:.1}s",
            self.scenario_id,
            self.state,
            self.elapsed.as_secs_f64()
        );
        if let Some(failure) = &self.failure {
            let _ = writeln!(out, "  failure: {failure}");
        }

        for r in self.results.values() {
            match r.first_violation_index {
                None => {
                    let _ = writeln!(out, "  PASS {} ({} observed)", r.group_id, r.observed);
                }
                Some(idx) => {
                    let _ = writeln!(
                        out,
                        "  FAIL {} ({} observed, first violation at arrival {idx})",
                        r.group_id, r.observed
                    );
                }
            }
        }

        for gap in self.gaps.values() {
            let preview: Vec<String> = gap.missing.iter().take(MISSING_PREVIEW).map(u64::to_string).collect();
            let more = if gap.missing.len() > MISSING_PREVIEW { ", ..." } else { "" };
            let _ = writeln!(
                out,
                "  gap {}: {} of {} missing [{}{more}]",
                gap.group_id,
                gap.missing.len(),
                gap.expected,
                preview.join(", ")
            );
        }

        for p in &self.producers {
            let status = match (&p.error, p.reported) {
                (Some(e), _) => e.to_string(),
                (None, true) => "ok".to_string(),
                (None, false) => "not reported".to_string(),
            };
            let _ = writeln!(out, "  {} [{}] sent {}/{}: {status}", p.producer_id, p.group_id, p.sent, p.configured);
        }

        let consumer = match (&self.consumer_error, self.consumer_reported) {
            (Some(e), _) => e.to_string(),
            (None, true) => "ok".to_string(),
            (None, false) => "not reported".to_string(),
        };
        let _ = writeln!(out, "  consumer: {} observed, {consumer}", self.observed);
        let _ = writeln!(out, "  total sent {}/{}", self.total_sent, self.total_configured);
        let _ = write!(out, "result: {}", if self.passed() { "PASS" } else { "FAIL" });
        out
    }

    /// Итог в tracing: info на группу, warn на нарушения и пропуски.
    pub fn log_summary(&self) {
        for r in self.results.values() {
            if r.ok {
                tracing::info!(group = %r.group_id, observed = r.observed, "group in order");
            } else {
                tracing::warn!(
                    group = %r.group_id,
                    observed = r.observed,
                    first_violation = ?r.first_violation_index,
                    "group out of order"
                );
            }
        }
        for gap in self.gaps.values() {
            tracing::warn!(group = %gap.group_id, missing = gap.missing.len(), expected = gap.expected, "group has gaps");
        }
        tracing::info!(
            scenario = %self.scenario_id,
            state = %self.state,
            passed = self.passed(),
            observed = self.observed,
            total_sent = self.total_sent,
            elapsed_ms = duration_ms(self.elapsed),
            "run finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(results: &[(&str, Option<u64>)]) -> RunReport {
        RunReport {
            scenario_id: "t".into(),
            state: RunState::Completed,
            failure: None,
            producers: vec![ProducerOutcome {
                producer_id: "producer_1".into(),
                group_id: "A".into(),
                configured: 3,
                sent: 3,
                reported: true,
                error: None,
            }],
            consumer_reported: true,
            consumer_error: Some(ConsumerError::Timeout { received: 3, expected: 4 }),
            observed: 3,
            total_sent: 3,
            total_configured: 3,
            results: results
                .iter()
                .map(|(g, v)| {
                    (
                        g.to_string(),
                        VerificationResult {
                            group_id: g.to_string(),
                            ok: v.is_none(),
                            first_violation_index: *v,
                            observed: 3,
                        },
                    )
                })
                .collect(),
            gaps: BTreeMap::new(),
            started_at_ms: 0,
            elapsed: Duration::from_millis(1500),
        }
    }

    #[test]
    fn all_groups_ok_passes() {
        let r = report(&[("A", None), ("B", None)]);
        assert!(r.passed());
        assert_eq!(r.exit_code(), 0);
        assert!(r.render_text().ends_with("result: PASS"));
    }

    #[test]
    fn one_failed_group_fails_run() {
        let r = report(&[("A", None), ("B", Some(4))]);
        assert!(!r.passed());
        assert_eq!(r.exit_code(), 1);
        assert!(r.results["A"].ok);
        assert!(!r.results["B"].ok);
        assert!(r.render_text().contains("FAIL B (3 observed, first violation at arrival 4)"));
    }

    #[test]
    fn failed_state_fails_even_if_groups_ok() {
        let mut r = report(&[("A", None)]);
        r.state = RunState::Failed;
        r.failure = Some(RunError::TransportClosed);
        assert_eq!(r.exit_code(), 1);
    }

    #[test]
    fn nothing_observed_is_not_a_pass() {
        assert!(!report(&[]).passed());
    }

    #[test]
    fn json_carries_state_and_errors() {
        let json = report(&[("A", None)]).to_json();
        assert_eq!(json["state"], "completed");
        assert_eq!(json["passed"], true);
        assert_eq!(json["consumer"]["error"], "idle timeout: received 3 of 4");
        assert_eq!(json["results"]["A"]["ok"], true);
        assert_eq!(json["elapsed_ms"], 1500);
    }
}
