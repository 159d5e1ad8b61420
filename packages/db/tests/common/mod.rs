use std::sync::LazyLock;

use tokio::sync::{Mutex, MutexGuard};

use db::{DbConfig, DbError, TABLES};

static TEST_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Connect to the shared in-memory database and empty every table.
pub async fn setup_db() -> Result<MutexGuard<'static, ()>, DbError> {
    let guard = TEST_LOCK.lock().await;
    db::init(DbConfig::memory()).await?;
    reset_db().await?;
    Ok(guard)
}

pub async fn reset_db() -> Result<(), DbError> {
    let statements: String = TABLES.iter().map(|table| format!("DELETE {table};")).collect();
    db::get_db()?.query(statements).await?;
    Ok(())
}
