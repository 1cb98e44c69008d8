use std::sync::Arc;

use fifo_harness::{TestOrchestrator, TokioScheduler};
use memory_broker::MemoryBroker;

use super::config::{Effective, Endpoint};
use super::error::CheckError;

/// Прогнать сценарий и напечатать отчёт. Возвращает код выхода.
pub async fn run(eff: Effective) -> Result<i32, CheckError> {
    let broker = match eff.endpoint {
        Endpoint::Memory => MemoryBroker::with_faults(eff.faults.clone()),
    };
    tracing::info!(
        scenario = %eff.scenario.scenario_id,
        queue = %eff.scenario.queue,
        user = eff.username.as_deref().unwrap_or("-"),
        authenticated = eff.password.is_some(),
        faults = !eff.faults.is_empty(),
        "fifo-check starting"
    );

    let orchestrator = TestOrchestrator::new(
        eff.scenario.to_scenario(),
        Arc::new(broker.clone()),
        Arc::new(TokioScheduler::new()),
    );

    // Ctrl-C → кооперативная остановка, отчёт всё равно печатается
    let stop = orchestrator.stop_token();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, stopping run");
            stop.cancel();
        }
    });

    let report = orchestrator.run().await;
    signal.abort();
    broker.shutdown().await;

    report.log_summary();
    if eff.json {
        println!("{}", serde_json::to_string_pretty(&report.to_json())?);
    } else {
        println!("{}", report.render_text());
    }
    Ok(report.exit_code())
}
