use reimburse_db::migrations::{self, MIGRATOR};

use crate::commands::{finish, open_pool, prepare, CommandResult, StepFailure};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("migrate") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;

        let latest = MIGRATOR.iter().map(|migration| migration.version).max().unwrap_or_default();
        Ok::<String, StepFailure>(format!("applied pending migrations; schema version {latest}"))
    });

    finish("migrate", result)
}
