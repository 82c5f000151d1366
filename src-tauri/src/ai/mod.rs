pub mod error;
pub mod extract;
pub mod gemini;
pub mod key_pool;
pub mod validate;

use async_trait::async_trait;
use tracing::info;

pub use error::{classify_message, AiError, ErrorKind};
pub use extract::{InvoiceFragment, ProductFragment};
pub use gemini::GeminiClient;
pub use key_pool::KeyPool;
pub use validate::ValidationInput;

use crate::config::AppConfig;
use crate::documents::DataUri;
use crate::types::ValidationError;

/// The two model calls the invoice action depends on.
#[async_trait]
pub trait InvoiceModel: Send + Sync {
    async fn extract(&self, data_uri: &str) -> Result<Vec<InvoiceFragment>, AiError>;

    async fn validate(&self, input: &ValidationInput) -> Result<Vec<ValidationError>, AiError>;
}

/// Gemini-backed model; every call goes through key rotation.
pub struct GeminiInvoiceModel {
    pool: KeyPool<GeminiClient>,
}

impl GeminiInvoiceModel {
    pub fn new(pool: KeyPool<GeminiClient>) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &AppConfig) -> crate::error::Result<Self> {
        let http = gemini::build_http_client()?;
        let clients = config
            .api_keys
            .iter()
            .map(|key| GeminiClient::new(http.clone(), key, &config.model))
            .collect();
        let pool = KeyPool::new(clients)?;
        info!(keys = pool.len(), model = %config.model, "Gemini key pool ready");
        Ok(Self::new(pool))
    }

    pub fn key_count(&self) -> usize {
        self.pool.len()
    }
}

#[async_trait]
impl InvoiceModel for GeminiInvoiceModel {
    async fn extract(&self, data_uri: &str) -> Result<Vec<InvoiceFragment>, AiError> {
        let document = DataUri::parse(data_uri).map_err(|e| AiError::InvalidInput(e.to_string()))?;
        self.pool
            .with_key_rotation(|client| async move {
                extract::extract_invoice_data(&client, document).await
            })
            .await
    }

    async fn validate(&self, input: &ValidationInput) -> Result<Vec<ValidationError>, AiError> {
        self.pool
            .with_key_rotation(|client| async move {
                validate::validate_extracted_data(&client, input).await
            })
            .await
    }
}
