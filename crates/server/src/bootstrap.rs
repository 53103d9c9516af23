use std::sync::Arc;

use reimburse_core::config::{AppConfig, ConfigError, LoadOptions};
use reimburse_core::GatewayError;
use reimburse_db::{connect_with_settings, migrations, DbPool, SqlExpenseStore};
use reimburse_gateway::HttpPaymentGateway;
use reimburse_workflow::{
    settlement_queue, ExpenseWorkflow, RequeueSummary, SettlementIntake, SettlementWorker,
    SettlementWorkerConfig, WorkerSummary,
};
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub workflow: Arc<ExpenseWorkflow>,
    pub intake: SettlementIntake,
    pub startup_requeue: RequeueSummary,
    worker: SettlementWorker,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("payment gateway client setup failed: {0}")]
    Gateway(#[source] GatewayError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let gateway = HttpPaymentGateway::from_config(&config.gateway).map_err(BootstrapError::Gateway)?;
    info!(
        event_name = "system.bootstrap.gateway_ready",
        endpoint = gateway.endpoint(),
        timeout_secs = config.gateway.timeout_secs,
        "payment gateway client configured"
    );

    let worker_config = SettlementWorkerConfig::from_settings(&config.settlement);
    let (intake, receiver) = settlement_queue(worker_config.queue_capacity);
    let workflow = Arc::new(ExpenseWorkflow::new(
        Arc::new(SqlExpenseStore::new(db_pool.clone())),
        Arc::new(gateway),
        Arc::new(intake.clone()),
        config.expense.policy(),
    ));
    let worker = SettlementWorker::start(receiver, workflow.clone(), worker_config.clone());

    // expenses left unsettled by a previous run have no job in the fresh queue
    let sweep_limit = u32::try_from(worker_config.queue_capacity).unwrap_or(u32::MAX);
    let startup_requeue = match workflow.requeue_unsettled(sweep_limit).await {
        Ok(summary) => summary,
        Err(error) => {
            warn!(
                event_name = "system.bootstrap.requeue_failed",
                error = %error,
                "startup settlement sweep failed; unsettled expenses wait for reconciliation"
            );
            RequeueSummary::default()
        }
    };

    Ok(Application { config, db_pool, workflow, intake, startup_requeue, worker })
}

impl Application {
    /// Stops the settlement worker, then closes the pool.
    pub async fn shutdown(self) -> WorkerSummary {
        let summary = self.worker.stop().await;
        self.db_pool.close().await;
        summary
    }
}

#[cfg(test)]
mod tests {
    use reimburse_core::config::{ConfigOverrides, LoadOptions};
    use reimburse_core::domain::timestamp_now;
    use reimburse_core::{record_transition, Actor, Expense, ExpensePolicy, ExpenseStatus, UserId};
    use reimburse_db::{connect_with_settings, migrations, ExpenseStore, SqlExpenseStore};
    use reimburse_workflow::NewExpense;

    use crate::bootstrap::bootstrap;

    fn overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                // nothing listens on the discard port; settlement attempts fail fast
                gateway_base_url: Some("http://127.0.0.1:9".to_string()),
                settlement_retry_count: Some(1),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_gateway_url() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                gateway_base_url: Some("ftp://payments.internal".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("invalid gateway url").to_string();
        assert!(message.contains("gateway.base_url"), "{message}");
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_requeues_unsettled_expenses() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("reimburse.db").display());

        let pool = connect_with_settings(&url, 1, 5).await.expect("seed pool");
        migrations::run_pending(&pool).await.expect("migrate seed db");
        let store = SqlExpenseStore::new(pool.clone());
        let (expense, transition) = Expense::submit(
            UserId("u-1".to_string()),
            120_000,
            "Printer toner",
            None,
            &ExpensePolicy::default(),
            timestamp_now(),
        )
        .expect("valid expense");
        let mut unit = store.begin().await.expect("begin");
        unit.insert_expense(&expense).await.expect("insert");
        let record = record_transition(&expense.id, Some(&expense.owner_id), &transition, None);
        unit.append_history(&record).await.expect("history");
        unit.commit().await.expect("commit");
        pool.close().await;

        let app = bootstrap(overrides(&url)).await.expect("bootstrap");
        assert_eq!(app.startup_requeue.scanned, 1);
        assert_eq!(app.startup_requeue.enqueued, 1);

        let created = app
            .workflow
            .create(
                &Actor::employee("u-2"),
                NewExpense {
                    amount: 3_000_000,
                    description: "Conference ticket".to_string(),
                    receipt_url: None,
                },
            )
            .await
            .expect("create through bootstrapped workflow");
        assert_eq!(created.status, ExpenseStatus::AwaitingApproval);

        let summary = app.shutdown().await;
        assert!(summary.processed + summary.dropped_on_stop >= 1);
    }
}
