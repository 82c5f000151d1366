//! Headless invoice scan: `scan_invoice factura.pdf [--save]`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use pharma_receipt_lib::ai::GeminiInvoiceModel;
use pharma_receipt_lib::config::{self, AppConfig};
use pharma_receipt_lib::db::Db;
use pharma_receipt_lib::documents;
use pharma_receipt_lib::services::extract_and_validate_invoice;
use pharma_receipt_lib::types::InvoiceHistoryItem;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "scan_invoice", version, about = "Extract and validate a pharmaceutical invoice PDF")]
struct Args {
    /// Invoice PDF to process
    pdf: PathBuf,

    /// Store the result in the local history database
    #[arg(long)]
    save: bool,

    /// History database (defaults to the platform data directory)
    #[arg(long, value_name = "PATH")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    pharma_receipt_lib::init_tracing();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Cannot start without API keys");
            return ExitCode::FAILURE;
        }
    };

    match run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Invoice scan failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, config: AppConfig) -> pharma_receipt_lib::Result<()> {
    let model = GeminiInvoiceModel::from_config(&config)?;
    let data_uri = documents::read_pdf_as_data_uri(&args.pdf)?;
    info!(file = %args.pdf.display(), keys = model.key_count(), "Processing invoice");

    let result = extract_and_validate_invoice(&model, &data_uri).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    let invoices = match (result.processed_invoices, result.error_message) {
        (Some(invoices), _) => invoices,
        (None, message) => {
            return Err(pharma_receipt_lib::Error::Processing(
                message.unwrap_or_else(|| "No invoices extracted".to_string()),
            ))
        }
    };

    if args.save {
        let file_name = args
            .pdf
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("factura.pdf")
            .to_string();
        let db_path = args.database.unwrap_or_else(config::default_database_path);
        let db = Db::new(db_path.clone())?;
        let item = InvoiceHistoryItem::new(file_name, invoices);
        db.save_history_item(&item)?;
        info!(id = %item.id, database = %db_path.display(), "Saved to history");
    }
    Ok(())
}
