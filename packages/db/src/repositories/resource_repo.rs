//! SurrealDB-backed resource groups and their single resource slot.
//!
//! Both tables are keyed by the group key, so "one resource per group" holds
//! by construction. Holder changes are single `UPDATE ... WHERE` statements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ci_core::{JobId, Resource, ResourceGroup};

use crate::store::ResourceStore;
use crate::{DbError, get_db};

pub struct ResourceRepository;

#[async_trait]
impl ResourceStore for ResourceRepository {
    async fn save_resource_group(&self, group: &ResourceGroup) -> Result<ResourceGroup, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                r#"
                UPSERT type::thing('resource_group', $key) SET
                    key = $key,
                    process_mode = $mode,
                    created_at = (created_at OR $created_at)
                RETURN AFTER
                "#,
            )
            .bind(("key", group.key.clone()))
            .bind(("mode", group.process_mode))
            .bind(("created_at", group.created_at))
            .await?;
        let groups: Vec<ResourceGroup> = result.take(0)?;

        groups
            .into_iter()
            .next()
            .ok_or_else(|| DbError::Query(format!("Failed to save resource group {}", group.key)))
    }

    async fn find_resource_group(&self, key: &str) -> Result<Option<ResourceGroup>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT * FROM type::thing('resource_group', $key)")
            .bind(("key", key.to_string()))
            .await?;
        let groups: Vec<ResourceGroup> = result.take(0)?;

        Ok(groups.into_iter().next())
    }

    async fn ensure_resource(&self, key: &str) -> Result<Resource, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("UPSERT type::thing('resource', $key) SET group_key = $key RETURN AFTER")
            .bind(("key", key.to_string()))
            .await?;
        let resources: Vec<Resource> = result.take(0)?;

        resources
            .into_iter()
            .next()
            .ok_or_else(|| DbError::Query(format!("Failed to create resource {}", key)))
    }

    async fn find_resource(&self, key: &str) -> Result<Option<Resource>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT * FROM type::thing('resource', $key)")
            .bind(("key", key.to_string()))
            .await?;
        let resources: Vec<Resource> = result.take(0)?;

        Ok(resources.into_iter().next())
    }

    async fn retain_resource(
        &self,
        key: &str,
        job_id: JobId,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                r#"
                UPDATE type::thing('resource', $key)
                SET retained_by = $job, retained_at = $at
                WHERE retained_by = NONE
                RETURN AFTER
                "#,
            )
            .bind(("key", key.to_string()))
            .bind(("job", job_id.0))
            .bind(("at", at))
            .await?;
        let updated: Vec<Resource> = result.take(0)?;

        Ok(!updated.is_empty())
    }

    async fn release_resource(&self, key: &str, job_id: JobId) -> Result<bool, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                r#"
                UPDATE type::thing('resource', $key)
                SET retained_by = NONE, retained_at = NONE
                WHERE retained_by = $job
                RETURN AFTER
                "#,
            )
            .bind(("key", key.to_string()))
            .bind(("job", job_id.0))
            .await?;
        let updated: Vec<Resource> = result.take(0)?;

        Ok(!updated.is_empty())
    }

    async fn retained_resources(&self) -> Result<Vec<Resource>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT * FROM resource WHERE retained_by != NONE ORDER BY group_key ASC")
            .await?;
        let resources: Vec<Resource> = result.take(0)?;

        Ok(resources)
    }
}
