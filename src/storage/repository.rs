//! SurrealDB 仓储实现
//!
//! Record ids carry the domain id (`profile:⟨uuid⟩`), so every SELECT
//! projects `meta::id(id)` back into a plain string.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::{Surreal, engine::any::Any};

use crate::error::{AppError, Result};
use crate::models::{
    Blob, BlobData, BlobRepository, BlobType, ChangeSet, CommitSummary, EventRepository,
    ProfileEntry, ProfileRepository, ProfileUpdate, ProjectRepository, UserEvent,
};
use crate::storage::page_offset;

const PROFILE_FIELDS: &str =
    "meta::id(id) AS id, user_id, project_id, topic, sub_topic, content, update_hits, created_at, updated_at";

const EVENT_FIELDS: &str =
    "meta::id(id) AS id, user_id, project_id, event_tip, event_tags, profile_delta, created_at";

const BLOB_FIELDS: &str =
    "meta::id(id) AS id, user_id, project_id, blob_type, data, fields, created_at";

/// Whether a statement error is a record-id or unique-index collision.
fn is_uniqueness_violation(message: &str) -> bool {
    message.contains("already contains") || message.contains("already exists")
}

/// Collisions become `Conflict`; anything else stays a database error.
fn write_error(e: surrealdb::Error) -> AppError {
    let message = e.to_string();
    if is_uniqueness_violation(&message) {
        AppError::Conflict(message)
    } else {
        AppError::Database(message)
    }
}

/// Serialize a record body without its `id`, which lives in the record key.
fn content_of<T: Serialize>(record: &T) -> Result<Value> {
    let mut value = serde_json::to_value(record)?;
    if let Some(map) = value.as_object_mut() {
        map.remove("id");
    }
    Ok(value)
}

/// Stored blob; the payload is kept as JSON text
#[derive(Debug, Serialize, Deserialize)]
struct BlobRecord {
    id: String,
    user_id: String,
    project_id: String,
    blob_type: BlobType,
    data: String,
    fields: Option<String>,
    created_at: DateTime<Utc>,
}

impl BlobRecord {
    fn from_blob(blob: &Blob) -> Result<Self> {
        Ok(Self {
            id: blob.id.clone(),
            user_id: blob.user_id.clone(),
            project_id: blob.project_id.clone(),
            blob_type: blob.blob_type(),
            data: serde_json::to_string(&blob.data)?,
            fields: blob.fields.as_ref().map(serde_json::to_string).transpose()?,
            created_at: blob.created_at,
        })
    }

    fn into_blob(self) -> Result<Blob> {
        let data: BlobData = serde_json::from_str(&self.data)?;
        let fields = self.fields.as_deref().map(serde_json::from_str).transpose()?;
        Ok(Blob {
            id: self.id,
            user_id: self.user_id,
            project_id: self.project_id,
            data,
            fields,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ProjectRecord {
    profile_config: Option<String>,
}

/// SurrealDB 仓储，实现全部四个仓储接口
#[derive(Clone)]
pub struct SurrealRepository {
    db: Surreal<Any>,
}

impl SurrealRepository {
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProfileRepository for SurrealRepository {
    async fn list_profiles(&self, project_id: &str, user_id: &str) -> Result<Vec<ProfileEntry>> {
        let query = format!(
            "SELECT {} FROM profile WHERE project_id = $project_id AND user_id = $user_id",
            PROFILE_FIELDS
        );
        let result: Vec<ProfileEntry> = self
            .db
            .query(query)
            .bind(("project_id", project_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;
        Ok(result)
    }

    async fn get_profile(
        &self,
        project_id: &str,
        user_id: &str,
        profile_id: &str,
    ) -> Result<Option<ProfileEntry>> {
        let query = format!(
            "SELECT {} FROM type::thing('profile', $id) WHERE project_id = $project_id AND user_id = $user_id",
            PROFILE_FIELDS
        );
        let result: Vec<ProfileEntry> = self
            .db
            .query(query)
            .bind(("id", profile_id.to_string()))
            .bind(("project_id", project_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;
        Ok(result.into_iter().next())
    }

    async fn insert_profile(&self, entry: &ProfileEntry) -> Result<()> {
        self.db
            .query("CREATE type::thing('profile', $id) CONTENT $content")
            .bind(("id", entry.id.clone()))
            .bind(("content", content_of(entry)?))
            .await?
            .check()
            .map_err(write_error)?;
        Ok(())
    }

    async fn update_profile(
        &self,
        project_id: &str,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<ProfileEntry> {
        let query = format!(
            "UPDATE type::thing('profile', $id) SET content = $content, topic = $topic, \
             sub_topic = $sub_topic, update_hits += 1, updated_at = $now \
             WHERE project_id = $project_id AND user_id = $user_id RETURN {}",
            PROFILE_FIELDS
        );
        let result: Vec<ProfileEntry> = self
            .db
            .query(query)
            .bind(("id", update.profile_id.clone()))
            .bind(("content", update.content.clone()))
            .bind(("topic", update.attributes.topic.clone()))
            .bind(("sub_topic", update.attributes.sub_topic.clone()))
            .bind(("now", Utc::now()))
            .bind(("project_id", project_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)
            .map_err(write_error)?;
        result
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("profile {}", update.profile_id)))
    }

    async fn touch_profiles(&self, project_id: &str, user_id: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.db
            .query(
                "UPDATE profile SET update_hits += 1, updated_at = $now \
                 WHERE project_id = $project_id AND user_id = $user_id AND meta::id(id) IN $ids",
            )
            .bind(("now", Utc::now()))
            .bind(("project_id", project_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .bind(("ids", ids.to_vec()))
            .await?
            .check()?;
        Ok(())
    }

    async fn delete_profiles(&self, project_id: &str, user_id: &str, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let deleted: Vec<Value> = self
            .db
            .query(
                "DELETE profile WHERE project_id = $project_id AND user_id = $user_id \
                 AND meta::id(id) IN $ids RETURN BEFORE",
            )
            .bind(("project_id", project_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .bind(("ids", ids.to_vec()))
            .await?
            .take(0)?;
        Ok(deleted.len())
    }

    /// Runs the whole change set in one transaction. Deletes go first so an
    /// update or add may reuse a slot freed in the same batch. An update that
    /// matches no row of this user aborts the transaction.
    async fn commit_change_set(
        &self,
        project_id: &str,
        user_id: &str,
        changes: &ChangeSet,
    ) -> Result<CommitSummary> {
        let mut statements = vec!["BEGIN TRANSACTION;".to_string()];
        if !changes.delete.is_empty() {
            statements.push(
                "DELETE profile WHERE project_id = $project_id AND user_id = $user_id \
                 AND meta::id(id) IN $delete_ids;"
                    .into(),
            );
        }
        for i in 0..changes.update.len() {
            statements.push(format!(
                "LET $updated_{i} = (UPDATE type::thing('profile', $update_id_{i}) \
                 SET content = $update_content_{i}, \
                 topic = $update_topic_{i}, sub_topic = $update_sub_topic_{i}, \
                 update_hits += 1, updated_at = $now \
                 WHERE project_id = $project_id AND user_id = $user_id RETURN id);"
            ));
            statements.push(format!(
                "IF array::len($updated_{i}) = 0 {{ THROW \"profile \" + $update_id_{i} + \" not found\" }};"
            ));
        }
        if !changes.touched.is_empty() {
            statements.push(
                "UPDATE profile SET update_hits += 1, updated_at = $now \
                 WHERE project_id = $project_id AND user_id = $user_id \
                 AND meta::id(id) IN $touched_ids;"
                    .into(),
            );
        }
        let entries: Vec<ProfileEntry> = changes
            .add
            .iter()
            .map(|add| ProfileEntry::new(user_id, project_id, &add.content, &add.attributes))
            .collect();
        for i in 0..entries.len() {
            statements.push(format!(
                "CREATE type::thing('profile', $add_id_{i}) CONTENT $add_content_{i};"
            ));
        }
        statements.push("COMMIT TRANSACTION;".into());

        let mut query = self
            .db
            .query(statements.join("\n"))
            .bind(("project_id", project_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .bind(("now", Utc::now()))
            .bind(("delete_ids", changes.delete.clone()))
            .bind(("touched_ids", changes.touched.clone()));
        for (i, update) in changes.update.iter().enumerate() {
            query = query
                .bind((format!("update_id_{i}"), update.profile_id.clone()))
                .bind((format!("update_content_{i}"), update.content.clone()))
                .bind((format!("update_topic_{i}"), update.attributes.topic.clone()))
                .bind((format!("update_sub_topic_{i}"), update.attributes.sub_topic.clone()));
        }
        for (i, entry) in entries.iter().enumerate() {
            query = query
                .bind((format!("add_id_{i}"), entry.id.clone()))
                .bind((format!("add_content_{i}"), content_of(entry)?));
        }

        query
            .await
            .map_err(|e| AppError::Commit(e.to_string()))?
            .check()
            .map_err(|e| AppError::Commit(e.to_string()))?;

        Ok(CommitSummary {
            added: entries.into_iter().map(|e| e.id).collect(),
            updated: changes.update.len(),
            deleted: changes.delete.len(),
            touched: changes.touched.len(),
        })
    }
}

#[async_trait]
impl EventRepository for SurrealRepository {
    async fn append_event(&self, event: &UserEvent) -> Result<()> {
        self.db
            .query("CREATE type::thing('user_event', $id) CONTENT $content")
            .bind(("id", event.id.clone()))
            .bind(("content", content_of(event)?))
            .await?
            .check()?;
        Ok(())
    }

    async fn list_events(&self, project_id: &str, user_id: &str, limit: usize) -> Result<Vec<UserEvent>> {
        let query = format!(
            "SELECT {} FROM user_event WHERE project_id = $project_id AND user_id = $user_id \
             ORDER BY created_at DESC LIMIT $limit",
            EVENT_FIELDS
        );
        let result: Vec<UserEvent> = self
            .db
            .query(query)
            .bind(("project_id", project_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .bind(("limit", limit as i64))
            .await?
            .take(0)?;
        Ok(result)
    }

    async fn delete_event(&self, project_id: &str, user_id: &str, event_id: &str) -> Result<bool> {
        let deleted: Vec<Value> = self
            .db
            .query(
                "DELETE type::thing('user_event', $id) \
                 WHERE project_id = $project_id AND user_id = $user_id RETURN BEFORE",
            )
            .bind(("id", event_id.to_string()))
            .bind(("project_id", project_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;
        Ok(!deleted.is_empty())
    }
}

#[async_trait]
impl BlobRepository for SurrealRepository {
    async fn insert_blob(&self, blob: &Blob) -> Result<()> {
        let record = BlobRecord::from_blob(blob)?;
        self.db
            .query("CREATE type::thing('blob', $id) CONTENT $content")
            .bind(("id", blob.id.clone()))
            .bind(("content", content_of(&record)?))
            .await?
            .check()?;
        Ok(())
    }

    async fn get_blob(&self, project_id: &str, user_id: &str, blob_id: &str) -> Result<Option<Blob>> {
        let query = format!(
            "SELECT {} FROM type::thing('blob', $id) WHERE project_id = $project_id AND user_id = $user_id",
            BLOB_FIELDS
        );
        let result: Vec<BlobRecord> = self
            .db
            .query(query)
            .bind(("id", blob_id.to_string()))
            .bind(("project_id", project_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;
        result.into_iter().next().map(BlobRecord::into_blob).transpose()
    }

    async fn delete_blob(&self, project_id: &str, user_id: &str, blob_id: &str) -> Result<bool> {
        let ids = [blob_id.to_string()];
        Ok(self.delete_blobs(project_id, user_id, &ids).await? > 0)
    }

    async fn delete_blobs(&self, project_id: &str, user_id: &str, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let deleted: Vec<Value> = self
            .db
            .query(
                "DELETE blob WHERE project_id = $project_id AND user_id = $user_id \
                 AND meta::id(id) IN $ids RETURN BEFORE",
            )
            .bind(("project_id", project_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .bind(("ids", ids.to_vec()))
            .await?
            .take(0)?;
        Ok(deleted.len())
    }

    async fn list_blob_ids(
        &self,
        project_id: &str,
        user_id: &str,
        blob_type: BlobType,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<String>> {
        let ids: Vec<String> = self
            .db
            .query(
                "SELECT VALUE meta::id(id) FROM blob \
                 WHERE project_id = $project_id AND user_id = $user_id AND blob_type = $blob_type \
                 ORDER BY created_at DESC LIMIT $limit START $start",
            )
            .bind(("project_id", project_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .bind(("blob_type", blob_type.as_str()))
            .bind(("limit", page_size as i64))
            .bind(("start", page_offset(page, page_size)? as i64))
            .await?
            .take(0)?;
        Ok(ids)
    }
}

#[async_trait]
impl ProjectRepository for SurrealRepository {
    async fn get_profile_config(&self, project_id: &str) -> Result<Option<String>> {
        let result: Vec<ProjectRecord> = self
            .db
            .query("SELECT profile_config FROM type::thing('project', $id)")
            .bind(("id", project_id.to_string()))
            .await?
            .take(0)?;
        Ok(result.into_iter().next().and_then(|r| r.profile_config))
    }

    async fn update_profile_config(&self, project_id: &str, yaml: &str) -> Result<()> {
        self.db
            .query("UPSERT type::thing('project', $id) SET profile_config = $yaml, updated_at = $now")
            .bind(("id", project_id.to_string()))
            .bind(("yaml", yaml.to_string()))
            .bind(("now", Utc::now()))
            .await?
            .check()?;
        Ok(())
    }
}
