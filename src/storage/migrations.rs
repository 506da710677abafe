use rusqlite::Connection;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use crate::core::error::AppResult;

mod embedded {
    use refinery::embed_migrations;

    embed_migrations!("./migrations");
}

static MIGRATION_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Applies pending schema migrations. Idempotent.
pub fn run_migrations(conn: &mut Connection) -> AppResult<()> {
    // Serialize runners within the process; refinery takes care of its
    // own transactions.
    let mutex = MIGRATION_LOCK.get_or_init(|| Mutex::new(()));
    let _guard = match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Migration lock was poisoned, recovering...");
            poisoned.into_inner()
        }
    };

    conn.busy_timeout(Duration::from_secs(30))?;
    let report = embedded::migrations::runner().run(conn)?;
    for migration in report.applied_migrations() {
        log::info!("Applied migration {}", migration);
    }
    Ok(())
}
