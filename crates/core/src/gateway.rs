//! Payment gateway contract.
//!
//! The orchestrator only relies on one property of an implementation:
//! submitting the same external id twice never creates a second charge. A
//! duplicate submission returns the original transaction instead. Clients map
//! every transport or protocol problem into [`GatewayError`] and never retry
//! on their own; retries belong to the settlement worker.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::settlement::IdempotencyKey;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: i64,
    pub external_id: IdempotencyKey,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub transaction_id: String,
    pub external_id: String,
    pub status: PaymentStatus,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("invalid payment request: {0}")]
    InvalidRequest(String),
    #[error("gateway transport failure: {0}")]
    Transport(String),
    #[error("gateway request timed out")]
    Timeout,
    #[error("gateway rejected payment with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("gateway declined payment {transaction_id}")]
    Declined { transaction_id: String },
    #[error("gateway returned an unrecognised response: {0}")]
    InvalidResponse(String),
}

impl PaymentRequest {
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.amount <= 0 {
            return Err(GatewayError::InvalidRequest("amount must be positive".to_string()));
        }
        if self.external_id.as_str().trim().is_empty() {
            return Err(GatewayError::InvalidRequest("external id is required".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn process(&self, request: PaymentRequest) -> Result<PaymentReceipt, GatewayError>;
}

#[derive(Default)]
struct GatewayLedger {
    receipts: HashMap<String, PaymentReceipt>,
    calls: usize,
    scripted_failures: VecDeque<GatewayError>,
    delay: Option<Duration>,
}

/// Gateway double that honours the idempotency contract. Failures can be
/// scripted and a delay injected before the charge is taken.
#[derive(Clone, Default)]
pub struct InMemoryPaymentGateway {
    ledger: Arc<Mutex<GatewayLedger>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, error: GatewayError) {
        self.with_ledger(|ledger| ledger.scripted_failures.push_back(error));
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        self.with_ledger(|ledger| ledger.delay = delay);
    }

    /// Every `process` invocation, including failed ones.
    pub fn calls(&self) -> usize {
        self.with_ledger(|ledger| ledger.calls)
    }

    /// Distinct charges taken, one per external id.
    pub fn charge_count(&self) -> usize {
        self.with_ledger(|ledger| ledger.receipts.len())
    }

    pub fn receipt_for(&self, key: &IdempotencyKey) -> Option<PaymentReceipt> {
        self.with_ledger(|ledger| ledger.receipts.get(key.as_str()).cloned())
    }

    fn with_ledger<T>(&self, f: impl FnOnce(&mut GatewayLedger) -> T) -> T {
        match self.ledger.lock() {
            Ok(mut ledger) => f(&mut ledger),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn process(&self, request: PaymentRequest) -> Result<PaymentReceipt, GatewayError> {
        let (scripted, delay) = self.with_ledger(|ledger| {
            ledger.calls += 1;
            (ledger.scripted_failures.pop_front(), ledger.delay)
        });

        request.validate()?;
        if let Some(error) = scripted {
            return Err(error);
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(self.with_ledger(|ledger| {
            ledger
                .receipts
                .entry(request.external_id.0.clone())
                .or_insert_with(|| PaymentReceipt {
                    transaction_id: Uuid::new_v4().to_string(),
                    external_id: request.external_id.0.clone(),
                    status: PaymentStatus::Completed,
                })
                .clone()
        }))
    }
}
