//! 进程内存储
//!
//! Default backend and test double. Every map sits behind a `parking_lot`
//! lock; no guard is held across an await point.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::{AppError, Result};
use crate::models::{
    Blob, BlobRepository, BlobType, ChangeSet, CommitSummary, EventRepository, ProfileEntry,
    ProfileRepository, ProfileUpdate, ProjectRepository, UserEvent,
};
use crate::storage::page_offset;

type UserKey = (String, String);

fn user_key(project_id: &str, user_id: &str) -> UserKey {
    (project_id.to_string(), user_id.to_string())
}

/// 内存存储实现
#[derive(Default)]
pub struct InMemoryStore {
    profiles: RwLock<HashMap<UserKey, Vec<ProfileEntry>>>,
    events: RwLock<HashMap<UserKey, Vec<UserEvent>>>,
    blobs: RwLock<HashMap<UserKey, Vec<Blob>>>,
    projects: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn slot_taken(entries: &[ProfileEntry], topic: &str, sub_topic: &str, except: Option<&str>) -> bool {
    entries
        .iter()
        .any(|e| e.slot() == (topic, sub_topic) && Some(e.id.as_str()) != except)
}

fn apply_update(entries: &mut [ProfileEntry], update: &ProfileUpdate) -> Result<ProfileEntry> {
    let attrs = &update.attributes;
    if slot_taken(entries, &attrs.topic, &attrs.sub_topic, Some(&update.profile_id)) {
        return Err(AppError::Conflict(format!(
            "profile slot {}/{} is already taken",
            attrs.topic, attrs.sub_topic
        )));
    }
    let entry = entries
        .iter_mut()
        .find(|e| e.id == update.profile_id)
        .ok_or_else(|| AppError::NotFound(format!("profile {}", update.profile_id)))?;
    entry.apply_update(&update.content, attrs);
    Ok(entry.clone())
}

#[async_trait]
impl ProfileRepository for InMemoryStore {
    async fn list_profiles(&self, project_id: &str, user_id: &str) -> Result<Vec<ProfileEntry>> {
        Ok(self
            .profiles
            .read()
            .get(&user_key(project_id, user_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_profile(
        &self,
        project_id: &str,
        user_id: &str,
        profile_id: &str,
    ) -> Result<Option<ProfileEntry>> {
        Ok(self
            .profiles
            .read()
            .get(&user_key(project_id, user_id))
            .and_then(|entries| entries.iter().find(|e| e.id == profile_id).cloned()))
    }

    async fn insert_profile(&self, entry: &ProfileEntry) -> Result<()> {
        let mut profiles = self.profiles.write();
        let entries = profiles
            .entry(user_key(&entry.project_id, &entry.user_id))
            .or_default();
        if slot_taken(entries, &entry.topic, &entry.sub_topic, None) {
            return Err(AppError::Conflict(format!(
                "profile slot {}/{} is already taken",
                entry.topic, entry.sub_topic
            )));
        }
        entries.push(entry.clone());
        Ok(())
    }

    async fn update_profile(
        &self,
        project_id: &str,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<ProfileEntry> {
        let mut profiles = self.profiles.write();
        let entries = profiles
            .get_mut(&user_key(project_id, user_id))
            .ok_or_else(|| AppError::NotFound(format!("profile {}", update.profile_id)))?;
        apply_update(entries, update)
    }

    async fn touch_profiles(&self, project_id: &str, user_id: &str, ids: &[String]) -> Result<()> {
        let mut profiles = self.profiles.write();
        if let Some(entries) = profiles.get_mut(&user_key(project_id, user_id)) {
            entries
                .iter_mut()
                .filter(|e| ids.contains(&e.id))
                .for_each(ProfileEntry::touch);
        }
        Ok(())
    }

    async fn delete_profiles(&self, project_id: &str, user_id: &str, ids: &[String]) -> Result<usize> {
        let mut profiles = self.profiles.write();
        let Some(entries) = profiles.get_mut(&user_key(project_id, user_id)) else {
            return Ok(0);
        };
        let before = entries.len();
        entries.retain(|e| !ids.contains(&e.id));
        Ok(before - entries.len())
    }

    /// Applies the whole change set to a copy and swaps it in only when
    /// every operation succeeded.
    async fn commit_change_set(
        &self,
        project_id: &str,
        user_id: &str,
        changes: &ChangeSet,
    ) -> Result<CommitSummary> {
        let key = user_key(project_id, user_id);
        let mut profiles = self.profiles.write();
        let mut staged = profiles.get(&key).cloned().unwrap_or_default();

        let before = staged.len();
        staged.retain(|e| !changes.delete.contains(&e.id));
        let deleted = before - staged.len();

        for update in &changes.update {
            apply_update(&mut staged, update).map_err(|e| AppError::Commit(e.to_string()))?;
        }

        let now = Utc::now();
        for entry in staged.iter_mut().filter(|e| changes.touched.contains(&e.id)) {
            entry.update_hits = entry.update_hits.saturating_add(1);
            entry.updated_at = now;
        }

        let mut added = Vec::with_capacity(changes.add.len());
        for add in &changes.add {
            let attrs = &add.attributes;
            if slot_taken(&staged, &attrs.topic, &attrs.sub_topic, None) {
                return Err(AppError::Commit(format!(
                    "profile slot {}/{} is already taken",
                    attrs.topic, attrs.sub_topic
                )));
            }
            let entry = ProfileEntry::new(user_id, project_id, &add.content, attrs);
            added.push(entry.id.clone());
            staged.push(entry);
        }

        profiles.insert(key, staged);
        Ok(CommitSummary {
            added,
            updated: changes.update.len(),
            deleted,
            touched: changes.touched.len(),
        })
    }
}

#[async_trait]
impl EventRepository for InMemoryStore {
    async fn append_event(&self, event: &UserEvent) -> Result<()> {
        self.events
            .write()
            .entry(user_key(&event.project_id, &event.user_id))
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn list_events(&self, project_id: &str, user_id: &str, limit: usize) -> Result<Vec<UserEvent>> {
        let events = self.events.read();
        Ok(events
            .get(&user_key(project_id, user_id))
            .map(|list| list.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_event(&self, project_id: &str, user_id: &str, event_id: &str) -> Result<bool> {
        let mut events = self.events.write();
        let Some(list) = events.get_mut(&user_key(project_id, user_id)) else {
            return Ok(false);
        };
        let before = list.len();
        list.retain(|e| e.id != event_id);
        Ok(list.len() != before)
    }
}

#[async_trait]
impl BlobRepository for InMemoryStore {
    async fn insert_blob(&self, blob: &Blob) -> Result<()> {
        self.blobs
            .write()
            .entry(user_key(&blob.project_id, &blob.user_id))
            .or_default()
            .push(blob.clone());
        Ok(())
    }

    async fn get_blob(&self, project_id: &str, user_id: &str, blob_id: &str) -> Result<Option<Blob>> {
        Ok(self
            .blobs
            .read()
            .get(&user_key(project_id, user_id))
            .and_then(|list| list.iter().find(|b| b.id == blob_id).cloned()))
    }

    async fn delete_blob(&self, project_id: &str, user_id: &str, blob_id: &str) -> Result<bool> {
        let ids = [blob_id.to_string()];
        Ok(self.delete_blobs(project_id, user_id, &ids).await? > 0)
    }

    async fn delete_blobs(&self, project_id: &str, user_id: &str, ids: &[String]) -> Result<usize> {
        let mut blobs = self.blobs.write();
        let Some(list) = blobs.get_mut(&user_key(project_id, user_id)) else {
            return Ok(0);
        };
        let before = list.len();
        list.retain(|b| !ids.contains(&b.id));
        Ok(before - list.len())
    }

    async fn list_blob_ids(
        &self,
        project_id: &str,
        user_id: &str,
        blob_type: BlobType,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<String>> {
        let offset = page_offset(page, page_size)?;
        let blobs = self.blobs.read();
        Ok(blobs
            .get(&user_key(project_id, user_id))
            .map(|list| {
                list.iter()
                    .rev()
                    .filter(|b| b.blob_type() == blob_type)
                    .skip(offset)
                    .take(page_size)
                    .map(|b| b.id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl ProjectRepository for InMemoryStore {
    async fn get_profile_config(&self, project_id: &str) -> Result<Option<String>> {
        Ok(self.projects.read().get(project_id).cloned())
    }

    async fn update_profile_config(&self, project_id: &str, yaml: &str) -> Result<()> {
        self.projects
            .write()
            .insert(project_id.to_string(), yaml.to_string());
        Ok(())
    }
}
