//! The extract-and-validate action behind the upload form.
//!
//! One extraction call yields invoice fragments (a multi-page invoice may come
//! back as several fragments with the same number). Fragments are merged by
//! invoice number, product fields are defaulted, and every merged invoice is
//! validated concurrently. Failures never escape as errors: the caller gets an
//! [`ActionResult`] with a Spanish message ready for display.

use std::collections::HashMap;

use futures::future::join_all;
use tracing::{error, info, warn};

use crate::ai::error::excerpt;
use crate::ai::{AiError, ErrorKind, InvoiceFragment, InvoiceModel, ProductFragment, ValidationInput};
use crate::types::{ActionResult, InvoiceData, ProcessedInvoice, Product};

pub const NO_FILE_MESSAGE: &str = "No se proporcionó ningún archivo de factura.";
pub const NOTHING_EXTRACTED_MESSAGE: &str =
    "No se pudo extraer ninguna factura del documento. Inténtelo de nuevo o con otro archivo.";
pub const QUOTA_MESSAGE: &str = "El servicio de IA alcanzó su cuota o tiene una demanda muy alta en este momento. Espere unos minutos e inténtelo de nuevo.";
pub const RATE_LIMIT_MESSAGE: &str = "Se superó el límite de solicitudes al servicio de IA. Espere un momento e inténtelo de nuevo.";
pub const INVALID_KEY_MESSAGE: &str =
    "La clave de API de Gemini no es válida. Revise la configuración de la aplicación.";
const GENERIC_MESSAGE_PREFIX: &str = "No se pudo procesar la factura. Es posible que el modelo de IA haya tenido problemas con este formato de archivo. Detalles: ";
const DETAIL_MAX_CHARS: usize = 150;

/// Run extraction, merge, defaulting and validation for one uploaded document.
pub async fn extract_and_validate_invoice(model: &dyn InvoiceModel, data_uri: &str) -> ActionResult {
    if data_uri.trim().is_empty() {
        return ActionResult::failure(NO_FILE_MESSAGE);
    }

    let fragments = match model.extract(data_uri).await {
        Ok(fragments) => fragments,
        Err(err) => {
            error!(error = %err, "Invoice extraction failed");
            return ActionResult::failure(user_message(&err));
        }
    };

    if fragments.is_empty() {
        info!("Extraction returned no invoices");
        return ActionResult::failure(NOTHING_EXTRACTED_MESSAGE);
    }

    let fragment_count = fragments.len();
    let invoices = merge_fragments(fragments);
    info!(
        fragments = fragment_count,
        invoices = invoices.len(),
        "Merged extracted invoice fragments"
    );

    ActionResult::success(validate_all(model, invoices).await)
}

/// Group fragments by trimmed invoice number, keeping first-encounter order.
///
/// The first fragment of a group provides the header; a blank supplier or
/// issue date is filled from a later fragment. Fragments with no number stay
/// separate invoices.
pub fn merge_fragments(fragments: Vec<InvoiceFragment>) -> Vec<InvoiceData> {
    let mut merged: Vec<InvoiceData> = Vec::with_capacity(fragments.len());
    let mut by_number: HashMap<String, usize> = HashMap::new();

    for fragment in fragments {
        let key = fragment.invoice_number.trim().to_string();
        let products: Vec<Product> = fragment.products.into_iter().map(sanitize_product).collect();

        if !key.is_empty() {
            if let Some(&idx) = by_number.get(&key) {
                let target = &mut merged[idx];
                if target.supplier.trim().is_empty() {
                    target.supplier = fragment.supplier;
                }
                if target.issue_date.trim().is_empty() {
                    target.issue_date = fragment.issue_date;
                }
                target.products.extend(products);
                continue;
            }
            by_number.insert(key, merged.len());
        }

        merged.push(InvoiceData {
            supplier: fragment.supplier,
            invoice_number: fragment.invoice_number,
            issue_date: fragment.issue_date,
            products,
        });
    }

    merged
}

/// Replace every absent optional field with `""` or `false`.
pub fn sanitize_product(fragment: ProductFragment) -> Product {
    Product {
        product_name: fragment.product_name,
        medical_device_name: fragment.medical_device_name.unwrap_or_default(),
        pharmaceutical_form: fragment.pharmaceutical_form,
        lot_number: fragment.lot_number,
        concentration: fragment.concentration,
        presentation: fragment.presentation,
        expiration_date: fragment.expiration_date,
        registration_number: fragment.registration_number.unwrap_or_default(),
        quantity_received: fragment.quantity_received,
        immediate_packaging: fragment.immediate_packaging.unwrap_or(false),
        mediate_packaging: fragment.mediate_packaging.unwrap_or(false),
        storage_conditions: fragment.storage_conditions.unwrap_or_default(),
        observations: fragment.observations.unwrap_or_default(),
    }
}

/// Validate all invoices at once. A failed validation only costs that invoice its error list.
pub async fn validate_all(model: &dyn InvoiceModel, invoices: Vec<InvoiceData>) -> Vec<ProcessedInvoice> {
    let checks = invoices.iter().enumerate().map(|(idx, invoice)| async move {
        let input = ValidationInput::from(invoice);
        match model.validate(&input).await {
            Ok(errors) => errors,
            Err(err) => {
                warn!(
                    invoice = idx,
                    number = %invoice.invoice_number,
                    error = %err,
                    "Validation failed; keeping invoice without validation errors"
                );
                Vec::new()
            }
        }
    });
    let results = join_all(checks).await;

    invoices
        .into_iter()
        .zip(results)
        .map(|(data, errors)| ProcessedInvoice { data, errors })
        .collect()
}

/// Map an extraction failure to the sentence shown to the user.
pub fn user_message(err: &AiError) -> String {
    let detail = err.to_string();
    let lower = detail.to_lowercase();

    if lower.contains("quota") || lower.contains("high demand") {
        QUOTA_MESSAGE.to_string()
    } else if lower.contains("rate limit") || lower.contains("rate_limit") || lower.contains("exhausted") {
        RATE_LIMIT_MESSAGE.to_string()
    } else if matches!(err, AiError::KeysExhausted { .. }) {
        detail
    } else if err.kind() == ErrorKind::AuthInvalid {
        INVALID_KEY_MESSAGE.to_string()
    } else {
        format!("{}{}", GENERIC_MESSAGE_PREFIX, excerpt(&detail, DETAIL_MAX_CHARS))
    }
}
