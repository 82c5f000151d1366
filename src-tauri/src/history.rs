//! History backends and the one-way local → Drive migration.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::db::Db;
use crate::drive::{file_name_for, DriveClient};
use crate::error::Result;
use crate::types::InvoiceHistoryItem;

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Items newest first.
    async fn list(&self) -> Result<Vec<InvoiceHistoryItem>>;

    /// Persist `item` and return it as stored (Drive fills in `drive_file_id`).
    async fn save(&self, item: &InvoiceHistoryItem) -> Result<InvoiceHistoryItem>;

    async fn delete(&self, item: &InvoiceHistoryItem) -> Result<()>;
}

#[async_trait]
impl HistoryStore for Db {
    async fn list(&self) -> Result<Vec<InvoiceHistoryItem>> {
        self.list_history()
    }

    async fn save(&self, item: &InvoiceHistoryItem) -> Result<InvoiceHistoryItem> {
        self.save_history_item(item)?;
        Ok(item.clone())
    }

    async fn delete(&self, item: &InvoiceHistoryItem) -> Result<()> {
        self.delete_history_item(&item.id)?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for DriveClient {
    async fn list(&self) -> Result<Vec<InvoiceHistoryItem>> {
        self.list_all().await
    }

    async fn save(&self, item: &InvoiceHistoryItem) -> Result<InvoiceHistoryItem> {
        let file_id = self.save_item(item, item.drive_file_id.as_deref()).await?;
        let mut saved = item.clone();
        saved.drive_file_id = Some(file_id);
        Ok(saved)
    }

    async fn delete(&self, item: &InvoiceHistoryItem) -> Result<()> {
        if let Some(file_id) = item.drive_file_id.as_deref() {
            return self.delete_file(file_id).await;
        }
        // Item came from a list without ids; fall back to the file name.
        let name = file_name_for(item);
        match self.list_files().await?.into_iter().find(|f| f.name == name) {
            Some(file) => self.delete_file(&file.id).await,
            None => {
                warn!(id = %item.id, "No Drive file found for history item");
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub migrated: usize,
}

/// Upload every local item to `remote` in list order, then clear local history.
///
/// Local history is only cleared when every upload succeeded; on the first
/// failure the error is returned and nothing local is touched.
pub async fn migrate_local_to_drive(local: &Db, remote: &dyn HistoryStore) -> Result<MigrationReport> {
    let items = local.list_history()?;
    let total = items.len();
    for (idx, item) in items.iter().enumerate() {
        if let Err(e) = remote.save(item).await {
            warn!(done = idx, total, error = %e, "History migration stopped; local data kept");
            return Err(e);
        }
    }
    local.clear_history()?;
    info!(migrated = total, "Local history migrated to Drive");
    Ok(MigrationReport { migrated: total })
}

/// Drive when the frontend supplied a token, local otherwise.
pub fn select_store<'a>(local: &'a Db, drive: Option<&'a DriveClient>) -> &'a dyn HistoryStore {
    match drive {
        Some(client) => client,
        None => local,
    }
}
