pub mod ai;
#[cfg(feature = "desktop")]
mod commands;
pub mod config;
pub mod db;
pub mod documents;
pub mod drive;
pub mod error;
pub mod history;
pub mod services;
pub mod types;

pub use error::{Error, Result};

use tracing_subscriber::EnvFilter;

/// Install the global `fmt` subscriber. `RUST_LOG` overrides the default filter.
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();
}

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use commands::AppState;
    use tauri::Manager;

    init_tracing();
    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_opener::init())
        .setup(|app| {
            let app_data_dir = app.path().app_data_dir().map_err(|e| e.to_string())?;
            // .env next to the database lets packaged installs carry their own keys
            config::load_env(Some(&app_data_dir));
            let config = config::AppConfig::from_lookup(|name| std::env::var(name).ok());
            let db = db::Db::new(commands::database_path(&app_data_dir))?;
            app.manage(AppState::new(db, config));
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::get_app_data_path,
            commands::open_app_data_folder,
            commands::get_app_version,
            commands::get_ai_status,
            commands::get_cloud_status,
            commands::process_invoice,
            commands::process_invoice_file,
            commands::validate_document_file,
            commands::read_file_as_data_uri,
            commands::get_history,
            commands::save_history_item,
            commands::delete_history_item,
            commands::migrate_local_history_to_drive,
            commands::dismiss_migration,
            commands::is_migration_dismissed,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
