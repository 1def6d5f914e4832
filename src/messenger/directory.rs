//! Participant directory: resolves user ids to names, roles and groups.
//!
//! The directory is owned by the surrounding platform; the messenger only reads it,
//! for notification categories and the optional shared-group send policy.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::messenger::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Instructor,
    Student,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub name: String,
    pub role: Role,
    /// School or class the user belongs to
    #[serde(default)]
    pub group_id: Option<String>,
}

impl Participant {
    pub fn new(user_id: &str, name: &str, role: Role, group_id: Option<&str>) -> Self {
        Self {
            user_id: user_id.to_string(),
            name: name.to_string(),
            role,
            group_id: group_id.map(str::to_string),
        }
    }
}

#[async_trait]
pub trait ParticipantDirectory: Send + Sync {
    /// Looks a user up. `Ok(None)` means the user does not exist.
    async fn lookup(&self, user_id: &str) -> Result<Option<Participant>>;
}

/// Directory held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    participants: DashMap<String, Participant>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_participants(participants: impl IntoIterator<Item = Participant>) -> Self {
        let directory = Self::new();
        for participant in participants {
            directory.upsert(participant);
        }
        directory
    }

    /// Loads a JSON array of participants.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read directory file: {:?}", path))?;
        let participants: Vec<Participant> = serde_json::from_str(&raw)?;
        Ok(Self::from_participants(participants))
    }

    pub fn upsert(&self, participant: Participant) {
        self.participants
            .insert(participant.user_id.clone(), participant);
    }

    pub fn remove(&self, user_id: &str) -> Option<Participant> {
        self.participants.remove(user_id).map(|(_, p)| p)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

#[async_trait]
impl ParticipantDirectory for InMemoryDirectory {
    async fn lookup(&self, user_id: &str) -> Result<Option<Participant>> {
        Ok(self.participants.get(user_id).map(|p| p.value().clone()))
    }
}

/// Read-through cache in front of another directory.
///
/// Only found users are cached, so a user created after a miss is picked up on the
/// next lookup. Role or group changes need an explicit [`CachedDirectory::invalidate`].
pub struct CachedDirectory {
    inner: Arc<dyn ParticipantDirectory>,
    cache: DashMap<String, Participant>,
}

impl CachedDirectory {
    pub fn new(inner: Arc<dyn ParticipantDirectory>) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    pub fn invalidate(&self, user_id: &str) {
        self.cache.remove(user_id);
    }

    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

impl std::fmt::Debug for CachedDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedDirectory")
            .field("cached", &self.cache.len())
            .finish()
    }
}

#[async_trait]
impl ParticipantDirectory for CachedDirectory {
    async fn lookup(&self, user_id: &str) -> Result<Option<Participant>> {
        if let Some(hit) = self.cache.get(user_id) {
            return Ok(Some(hit.value().clone()));
        }

        let found = self.inner.lookup(user_id).await?;
        if let Some(participant) = &found {
            self.cache.insert(user_id.to_string(), participant.clone());
        } else {
            tracing::debug!(target: "messenger::directory", "Unknown user {}", user_id);
        }
        Ok(found)
    }
}
