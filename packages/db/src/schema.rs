//! Database schema definitions using SurrealQL.
//!
//! Tables are schemaless: each record stores the serialized domain value plus
//! the top-level columns the queries filter on.

use crate::{DbError, get_db};

/// Create all tables and indexes.
pub async fn init_schema() -> Result<(), DbError> {
    let db = get_db()?;

    tracing::info!("Initializing database schema...");

    db.query(PIPELINE_SCHEMA).await?;
    db.query(JOB_SCHEMA).await?;
    db.query(RESOURCE_SCHEMA).await?;
    db.query(TRACE_CHUNK_SCHEMA).await?;
    db.query(SEQUENCE_SCHEMA).await?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Every table the repositories write to.
pub const TABLES: [&str; 6] = [
    "pipeline",
    "job",
    "resource_group",
    "resource",
    "trace_chunk",
    "sequence",
];

const PIPELINE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS pipeline SCHEMALESS;

-- Parent/child family lookups
DEFINE INDEX IF NOT EXISTS pipeline_root ON pipeline FIELDS root_id;
"#;

const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

DEFINE INDEX IF NOT EXISTS job_pipeline ON job FIELDS pipeline_id;
DEFINE INDEX IF NOT EXISTS job_pipeline_name ON job FIELDS pipeline_id, name;

-- Upcoming processables of a resource group
DEFINE INDEX IF NOT EXISTS job_resource_group ON job FIELDS resource_group, status;
"#;

const RESOURCE_SCHEMA: &str = r#"
-- Keyed by group key: type::thing('resource_group', $key)
DEFINE TABLE IF NOT EXISTS resource_group SCHEMALESS;

-- Exactly one slot per group, keyed the same way
DEFINE TABLE IF NOT EXISTS resource SCHEMALESS;
DEFINE INDEX IF NOT EXISTS resource_holder ON resource FIELDS retained_by;
"#;

const TRACE_CHUNK_SCHEMA: &str = r#"
-- Keyed by [job_id, chunk_index]
DEFINE TABLE IF NOT EXISTS trace_chunk SCHEMALESS;
DEFINE INDEX IF NOT EXISTS trace_chunk_job ON trace_chunk FIELDS job_id, chunk_index UNIQUE;
"#;

const SEQUENCE_SCHEMA: &str = r#"
-- Id allocation counters, one record per sequence name
DEFINE TABLE IF NOT EXISTS sequence SCHEMALESS;
"#;
