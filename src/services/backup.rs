use anyhow::{Context, Result};
use std::sync::Arc;

use crate::core::io::LocalStore;
use crate::core::state::BackupSnapshot;

const BACKUP_KEY_PREFIX: &str = "story-draft-backup";

pub struct BackupStore {
    store: Arc<dyn LocalStore>,
}

impl BackupStore {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        BackupStore { store }
    }

    fn primary_key(draft_id: &str) -> String {
        format!("{BACKUP_KEY_PREFIX}_{draft_id}")
    }

    fn emergency_key(draft_id: &str) -> String {
        format!("{BACKUP_KEY_PREFIX}_{draft_id}_emergency")
    }

    pub async fn write_backup(&self, draft_id: &str, snapshot: &BackupSnapshot) -> Result<()> {
        let payload =
            serde_json::to_string(snapshot).context("Failed to serialize backup snapshot")?;
        self.store.set(&Self::primary_key(draft_id), &payload).await
    }

    pub async fn write_emergency(&self, draft_id: &str, snapshot: &BackupSnapshot) -> Result<()> {
        let payload =
            serde_json::to_string(snapshot).context("Failed to serialize backup snapshot")?;
        self.store
            .set(&Self::emergency_key(draft_id), &payload)
            .await
    }

    pub async fn read_backup(&self, draft_id: &str) -> Result<Option<BackupSnapshot>> {
        match self.store.get(&Self::primary_key(draft_id)).await? {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).context("Failed to parse backup snapshot")?,
            )),
            None => Ok(None),
        }
    }

    // Primary tier first, then emergency. Unreadable entries do not end the
    // search.
    pub async fn recover(&self, draft_id: &str) -> Result<Option<BackupSnapshot>> {
        for key in [Self::primary_key(draft_id), Self::emergency_key(draft_id)] {
            if let Some(raw) = self.store.get(&key).await? {
                match serde_json::from_str::<BackupSnapshot>(&raw) {
                    Ok(snapshot) => return Ok(Some(snapshot)),
                    Err(e) => log::warn!("Discarding unreadable backup {}: {}", key, e),
                }
            }
        }
        Ok(None)
    }

    pub async fn clear(&self, draft_id: &str) -> Result<()> {
        self.store.remove(&Self::primary_key(draft_id)).await?;
        self.store.remove(&Self::emergency_key(draft_id)).await?;
        Ok(())
    }
}
