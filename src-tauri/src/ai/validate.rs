//! Second pass over merged invoices: ask the model to flag suspicious fields.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::AiError;
use super::gemini::{GeminiClient, Part};
use crate::types::{InvoiceData, ValidationError};

const VALIDATION_PROMPT: &str = "\
You are an assistant that reviews data extracted from pharmaceutical invoices.
Identify missing values, malformed dates (expected YYYY-MM-DD), expired or implausible
expiration dates, lot numbers or sanitary registrations that look truncated, and
quantities that are not numbers.

Return `validationErrors`: one entry per problem, where `field` is the dotted path of the
offending field (for example `products.0.lotNumber` or `invoiceDate`) and `message` is a short
explanation in Spanish. Return an empty list when everything looks correct.

Invoice data:
";

/// Flattened, English-named view of an invoice sent to the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationInput {
    pub supplier: String,
    pub invoice_number: String,
    pub invoice_date: String,
    pub products: Vec<ValidationProduct>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationProduct {
    pub product_name: String,
    pub medical_device_name: String,
    pub form: String,
    pub lot_number: String,
    pub concentration: String,
    pub presentation: String,
    pub expiration_date: String,
    pub registration_number: String,
    pub quantity_received: String,
}

impl From<&InvoiceData> for ValidationInput {
    fn from(invoice: &InvoiceData) -> Self {
        Self {
            supplier: invoice.supplier.clone(),
            invoice_number: invoice.invoice_number.clone(),
            invoice_date: invoice.issue_date.clone(),
            products: invoice
                .products
                .iter()
                .map(|p| ValidationProduct {
                    product_name: p.product_name.clone(),
                    medical_device_name: p.medical_device_name.clone(),
                    form: p.pharmaceutical_form.clone(),
                    lot_number: p.lot_number.clone(),
                    concentration: p.concentration.clone(),
                    presentation: p.presentation.clone(),
                    expiration_date: p.expiration_date.clone(),
                    registration_number: p.registration_number.clone(),
                    quantity_received: p.quantity_received.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidationOutput {
    #[serde(default)]
    validation_errors: Vec<ValidationError>,
}

pub fn validation_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "validationErrors": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "field": {"type": "STRING"},
                        "message": {"type": "STRING"}
                    },
                    "required": ["field", "message"]
                }
            }
        },
        "required": ["validationErrors"]
    })
}

fn render_prompt(input: &ValidationInput) -> Result<String, AiError> {
    let data = serde_json::to_string_pretty(input)
        .map_err(|e| AiError::InvalidInput(format!("validation input: {}", e)))?;
    Ok(format!("{}{}", VALIDATION_PROMPT, data))
}

pub async fn validate_extracted_data(
    client: &GeminiClient,
    input: &ValidationInput,
) -> Result<Vec<ValidationError>, AiError> {
    let parts = vec![Part::text(render_prompt(input)?)];
    let output: ValidationOutput = client.generate_json(parts, validation_schema()).await?;
    Ok(output.validation_errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Product;

    #[test]
    fn input_flattens_invoice_with_english_names() {
        let invoice = InvoiceData {
            supplier: "Quimica Suiza".to_string(),
            invoice_number: "F001-2231".to_string(),
            issue_date: "2024-03-01".to_string(),
            products: vec![Product {
                product_name: "IBUPROFENO".to_string(),
                pharmaceutical_form: "TABLETA".to_string(),
                lot_number: "L2231".to_string(),
                quantity_received: "100".to_string(),
                ..Default::default()
            }],
        };

        let json = serde_json::to_value(ValidationInput::from(&invoice)).unwrap();
        assert_eq!(json["invoiceNumber"], "F001-2231");
        assert_eq!(json["invoiceDate"], "2024-03-01");
        assert_eq!(json["products"][0]["form"], "TABLETA");
        assert_eq!(json["products"][0]["lotNumber"], "L2231");
        assert_eq!(json["products"][0]["registrationNumber"], "");
    }

    #[test]
    fn prompt_embeds_invoice_json() {
        let input = ValidationInput::from(&InvoiceData {
            invoice_number: "F-9".to_string(),
            ..Default::default()
        });
        let prompt = render_prompt(&input).unwrap();
        assert!(prompt.starts_with(VALIDATION_PROMPT));
        assert!(prompt.contains("\"invoiceNumber\": \"F-9\""));
    }

    #[test]
    fn output_defaults_to_no_errors() {
        let output: ValidationOutput = serde_json::from_str("{}").unwrap();
        assert!(output.validation_errors.is_empty());
        let output: ValidationOutput = serde_json::from_str(
            r#"{"validationErrors": [{"field": "products.0.lotNumber", "message": "Lote vacío"}]}"#,
        )
        .unwrap();
        assert_eq!(output.validation_errors[0].field, "products.0.lotNumber");
    }
}
