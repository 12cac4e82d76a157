use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

use crate::config::AppConfig;
use crate::error::HelpdeskError;

// Shorthand so we don't have to write the full Pool<SqliteConnectionManager> everywhere.
pub type DbPool = Pool<SqliteConnectionManager>;

const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON;
     PRAGMA busy_timeout = 5000;";

/// Creates the database directory, connection pool, and initializes the schema.
pub fn initialize(config: &AppConfig) -> Result<DbPool, HelpdeskError> {
    let db_path = config.database_path()?;
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| HelpdeskError::Database(format!("Failed to create db dir: {e}")))?;
    }

    let pool = create_pool(&db_path, config.database.pool_size)?;
    let conn = pool.get()?;
    super::schema::initialize_schema(&conn)?;

    Ok(pool)
}

pub fn create_pool(db_path: &Path, max_size: u32) -> Result<DbPool, HelpdeskError> {
    let manager = SqliteConnectionManager::file(db_path)
        .with_init(|c| c.execute_batch(CONNECTION_PRAGMAS));

    let pool = Pool::builder().max_size(max_size).build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;
         PRAGMA temp_store = MEMORY;",
    )?;

    Ok(pool)
}

/// Single-connection in-memory database with the schema applied.
///
/// Every pooled connection to `:memory:` is its own database, so the pool is
/// capped at one connection. Callers must not hold a connection while
/// asking for another.
pub fn in_memory() -> Result<DbPool, HelpdeskError> {
    let manager = SqliteConnectionManager::memory().with_init(|c| c.execute_batch(CONNECTION_PRAGMAS));
    let pool = Pool::builder().max_size(1).build(manager)?;

    let conn = pool.get()?;
    super::schema::initialize_schema(&conn)?;

    Ok(pool)
}
