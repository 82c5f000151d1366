use crate::ai::GeminiInvoiceModel;
use crate::config::AppConfig;
use crate::db::Db;
use crate::documents::{self, FileValidation};
use crate::drive::DriveClient;
use crate::history::{self, HistoryStore, MigrationReport};
use crate::services::invoice_processor;
use crate::types::{ActionResult, InvoiceHistoryItem};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tauri::{AppHandle, Manager, State};

pub struct AppState {
    pub db: Db,
    pub config: Option<AppConfig>,
    pub model: Option<Arc<GeminiInvoiceModel>>,
    /// Why the model is unavailable, shown by the status command.
    pub config_error: Option<String>,
    drive: Mutex<Option<(String, Arc<DriveClient>)>>,
}

impl AppState {
    pub fn new(db: Db, config: crate::error::Result<AppConfig>) -> Self {
        let (config, model, config_error) = match config {
            Ok(config) => match GeminiInvoiceModel::from_config(&config) {
                Ok(model) => (Some(config), Some(Arc::new(model)), None),
                Err(e) => {
                    tracing::error!(error = %e, "Could not build Gemini client");
                    (Some(config), None, Some(e.to_string()))
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "AI processing disabled");
                (None, None, Some(e.to_string()))
            }
        };
        Self {
            db,
            config,
            model,
            config_error,
            drive: Mutex::new(None),
        }
    }

    fn model(&self) -> Result<Arc<GeminiInvoiceModel>, String> {
        self.model.clone().ok_or_else(|| {
            self.config_error
                .clone()
                .unwrap_or_else(|| "AI model not configured".to_string())
        })
    }

    /// Drive client for `token`, reused while the token stays the same so the folder id stays cached.
    fn drive(&self, token: &str) -> Result<Arc<DriveClient>, String> {
        let mut cached = self.drive.lock().map_err(|e| e.to_string())?;
        if let Some((cached_token, client)) = cached.as_ref() {
            if cached_token == token {
                return Ok(client.clone());
            }
        }
        let client = Arc::new(DriveClient::new(token).map_err(|e| e.to_string())?);
        *cached = Some((token.to_string(), client.clone()));
        Ok(client)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiStatus {
    pub status: &'static str,
    pub keys: usize,
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudStatus {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

fn non_empty_token(access_token: Option<String>) -> Option<String> {
    access_token.filter(|t| !t.trim().is_empty())
}

#[tauri::command]
pub fn get_app_data_path(app: AppHandle) -> Result<String, String> {
    let path = app.path().app_data_dir().map_err(|e| e.to_string())?;
    path.to_str()
        .map(String::from)
        .ok_or_else(|| "Invalid path".to_string())
}

#[tauri::command]
pub fn get_app_version(app: AppHandle) -> String {
    app.package_info().version.to_string()
}

#[tauri::command]
pub fn open_app_data_folder(app: AppHandle) -> Result<(), String> {
    let path = app.path().app_data_dir().map_err(|e| e.to_string())?;
    opener::open(&path).map_err(|e| e.to_string())
}

#[tauri::command]
pub fn get_ai_status(state: State<AppState>) -> AiStatus {
    match &state.model {
        Some(model) => AiStatus {
            status: "configured",
            keys: model.key_count(),
            model: state.config.as_ref().map(|c| c.model.clone()),
            error: None,
        },
        None => AiStatus {
            status: "not_configured",
            keys: 0,
            model: None,
            error: state.config_error.clone(),
        },
    }
}

#[tauri::command]
pub fn get_cloud_status(state: State<AppState>) -> CloudStatus {
    let client_id = state
        .config
        .as_ref()
        .and_then(|c| c.google_client_id.clone());
    CloudStatus {
        available: client_id.is_some(),
        client_id,
    }
}

#[tauri::command]
pub async fn process_invoice(
    state: State<'_, AppState>,
    data_uri: String,
) -> Result<ActionResult, String> {
    let model = state.model()?;
    Ok(invoice_processor::extract_and_validate_invoice(model.as_ref(), &data_uri).await)
}

/// Same as `process_invoice`, reading the PDF from disk first.
#[tauri::command]
pub async fn process_invoice_file(
    state: State<'_, AppState>,
    path: String,
) -> Result<ActionResult, String> {
    let model = state.model()?;
    let data_uri = tauri::async_runtime::spawn_blocking(move || {
        documents::read_pdf_as_data_uri(Path::new(&path))
    })
    .await
    .map_err(|e| e.to_string())?
    .map_err(|e| e.to_string())?;
    Ok(invoice_processor::extract_and_validate_invoice(model.as_ref(), &data_uri).await)
}

#[tauri::command]
pub fn validate_document_file(path: String) -> Result<FileValidation, String> {
    documents::validate_pdf(Path::new(&path)).map_err(|e| e.to_string())
}

#[tauri::command]
pub fn read_file_as_data_uri(path: String) -> Result<String, String> {
    documents::read_pdf_as_data_uri(Path::new(&path)).map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn get_history(
    state: State<'_, AppState>,
    access_token: Option<String>,
) -> Result<Vec<InvoiceHistoryItem>, String> {
    let drive = match non_empty_token(access_token) {
        Some(token) => Some(state.drive(&token)?),
        None => None,
    };
    let store = history::select_store(&state.db, drive.as_deref());
    store.list().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn save_history_item(
    state: State<'_, AppState>,
    item: InvoiceHistoryItem,
    access_token: Option<String>,
) -> Result<InvoiceHistoryItem, String> {
    let drive = match non_empty_token(access_token) {
        Some(token) => Some(state.drive(&token)?),
        None => None,
    };
    let store = history::select_store(&state.db, drive.as_deref());
    store.save(&item).await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn delete_history_item(
    state: State<'_, AppState>,
    item: InvoiceHistoryItem,
    access_token: Option<String>,
) -> Result<(), String> {
    let drive = match non_empty_token(access_token) {
        Some(token) => Some(state.drive(&token)?),
        None => None,
    };
    let store = history::select_store(&state.db, drive.as_deref());
    store.delete(&item).await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn migrate_local_history_to_drive(
    state: State<'_, AppState>,
    access_token: String,
) -> Result<MigrationReport, String> {
    let token = non_empty_token(Some(access_token)).ok_or("Missing Google access token")?;
    let drive = state.drive(&token)?;
    history::migrate_local_to_drive(&state.db, drive.as_ref())
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub fn dismiss_migration(state: State<AppState>) -> Result<(), String> {
    state.db.dismiss_migration().map_err(|e| e.to_string())
}

#[tauri::command]
pub fn is_migration_dismissed(state: State<AppState>) -> Result<bool, String> {
    state.db.is_migration_dismissed().map_err(|e| e.to_string())
}

/// Database path inside the app data directory.
pub fn database_path(app_data_dir: &Path) -> PathBuf {
    app_data_dir.join(crate::config::DATABASE_FILE)
}
