use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::time::Duration;

use crate::core::error::AppResult;
use crate::storage::migrations;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

const POOL_SIZE: u32 = 10;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a new database connection pool
///
/// Initializes a connection pool with up to 10 connections and brings the
/// schema up to date before returning.
///
/// # Example
///
/// ```no_run
/// use tgcast::storage::db;
///
/// let pool = db::create_pool("tgcast.sqlite")?;
/// # Ok::<(), tgcast::core::error::AppError>(())
/// ```
pub fn create_pool(database_path: &str) -> AppResult<DbPool> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", "ON")
    });
    let pool = Pool::builder().max_size(POOL_SIZE).build(manager)?;

    let mut conn = pool.get()?;
    migrations::run_migrations(&mut conn)?;
    log::info!("Database ready at {}", database_path);

    Ok(pool)
}

/// Get a connection from the pool
///
/// The connection is returned to the pool when dropped.
pub fn get_connection(pool: &DbPool) -> Result<DbConnection, r2d2::Error> {
    pool.get()
}
