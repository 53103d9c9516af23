//! Re-drives settlement for approved expenses that never completed, e.g.
//! after a queue-full drop, an abandoned job or a restart. Jobs are processed
//! in place with the configured retry policy instead of a background worker.

use std::sync::Arc;

use reimburse_core::{JobState, SettlementOutcome};
use reimburse_db::SqlExpenseStore;
use reimburse_gateway::HttpPaymentGateway;
use reimburse_workflow::{process_job, settlement_queue, ExpenseWorkflow, SettlementWorkerConfig};

use crate::commands::{finish, open_pool, prepare, CommandResult, StepFailure};

pub const DEFAULT_LIMIT: u32 = 100;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct ReconcileTally {
    scanned: usize,
    settled: usize,
    skipped: usize,
    abandoned: usize,
}

pub fn run(limit: u32) -> CommandResult {
    let (config, runtime) = match prepare("reconcile") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let gateway = HttpPaymentGateway::from_config(&config.gateway)
            .map_err(|error| ("gateway_config", error.to_string(), 2u8))?;

        let worker_config = SettlementWorkerConfig::from_settings(&config.settlement);
        let (intake, mut receiver) = settlement_queue(limit.max(1) as usize);
        let workflow = ExpenseWorkflow::new(
            Arc::new(SqlExpenseStore::new(pool.clone())),
            Arc::new(gateway),
            Arc::new(intake),
            config.expense.policy(),
        );

        let requeued = workflow
            .requeue_unsettled(limit)
            .await
            .map_err(|error| ("store", error.to_string(), 5u8))?;

        let mut tally = ReconcileTally { scanned: requeued.scanned, ..ReconcileTally::default() };
        while let Some(job) = receiver.try_next() {
            let report = process_job(&workflow, job, &worker_config).await;
            match (report.state, report.outcome) {
                (JobState::Succeeded, Some(SettlementOutcome::Completed)) => tally.settled += 1,
                (JobState::Succeeded, _) => tally.skipped += 1,
                _ => tally.abandoned += 1,
            }
        }
        pool.close().await;

        Ok::<ReconcileTally, StepFailure>(tally)
    });

    let result = result.and_then(|tally| {
        let message = format!(
            "scanned {} unsettled expenses: {} settled, {} skipped, {} abandoned",
            tally.scanned, tally.settled, tally.skipped, tally.abandoned
        );
        if tally.abandoned > 0 {
            Err(("settlement_abandoned", message, 6))
        } else {
            Ok(message)
        }
    });

    finish("reconcile", result)
}
