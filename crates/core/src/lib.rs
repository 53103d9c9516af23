pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod gateway;
pub mod projection;

pub use chrono;

pub use audit::{reconstruct_path, record_transition, HistoryPathError};
pub use domain::actor::{Actor, Role, UserId};
pub use domain::approval::{Approval, ApprovalDecision, ApprovalId};
pub use domain::expense::{Expense, ExpenseId, ExpensePolicy, ExpenseStatus, ExpenseTransition};
pub use domain::history::{StatusHistory, StatusHistoryId};
pub use domain::settlement::{
    IdempotencyKey, JobState, SettlementJob, SettlementOutcome,
};
pub use errors::{DomainError, ExpenseError};
pub use gateway::{
    GatewayError, InMemoryPaymentGateway, PaymentGateway, PaymentReceipt, PaymentRequest,
    PaymentStatus,
};
pub use projection::{
    ApprovalView, ExpenseDetail, ExpenseView, Page, PageMetadata, PageRequest, StatusHistoryView,
};
