//! Lazily initialized SurrealDB connection shared by the repositories.

use std::sync::LazyLock;

use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};
use surrealdb::opt::auth::Root;
use thiserror::Error;
use tokio::sync::OnceCell;

static DB: LazyLock<OnceCell<Surreal<Any>>> = LazyLock::new(OnceCell::new);

/// Database connection handle.
pub type Database = Surreal<Any>;

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// `mem://`, `file://path` or `rocksdb://path`.
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    /// Optional root credentials.
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "ci".to_string(),
            database: "main".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// In-memory database, used by tests and single-process setups.
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("file://{}", path.into()),
            ..Default::default()
        }
    }

    /// RocksDB-backed database (requires the `rocksdb` feature).
    pub fn rocksdb(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("rocksdb://{}", path.into()),
            ..Default::default()
        }
    }

    /// Read `CI_DB_ENDPOINT`, `CI_DB_NAMESPACE`, `CI_DB_DATABASE`,
    /// `CI_DB_USER` and `CI_DB_PASSWORD`, falling back to the in-memory defaults.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        Self {
            endpoint: var("CI_DB_ENDPOINT").unwrap_or(defaults.endpoint),
            namespace: var("CI_DB_NAMESPACE").unwrap_or(defaults.namespace),
            database: var("CI_DB_DATABASE").unwrap_or(defaults.database),
            credentials: var("CI_DB_USER").zip(var("CI_DB_PASSWORD")),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database not initialized - call init_db first")]
    NotInitialized,
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Connect once; later calls return the existing connection.
pub async fn init_db(config: DbConfig) -> Result<&'static Database, DbError> {
    DB.get_or_try_init(|| async {
        tracing::info!("Connecting to database: {}", config.endpoint);

        let db = connect(&config.endpoint).await?;

        if let Some((username, password)) = &config.credentials {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(&config.namespace).use_db(&config.database).await?;

        tracing::info!(
            "Connected to database: {}/{}",
            config.namespace,
            config.database
        );

        Ok(db)
    })
    .await
}

/// Get the database connection.
pub fn get_db() -> Result<&'static Database, DbError> {
    DB.get().ok_or(DbError::NotInitialized)
}
