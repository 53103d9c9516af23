pub mod orchestrator;
pub mod worker;

pub use orchestrator::{ExpenseQuery, ExpenseWorkflow, NewExpense, RequeueSummary};
pub use worker::{
    process_job, settlement_queue, EnqueueOutcome, JobReport, SettlementHandler, SettlementIntake,
    SettlementQueue, SettlementReceiver, SettlementWorker, SettlementWorkerConfig, WorkerSummary,
};
