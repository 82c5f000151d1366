//! Invoice extraction: one schema-constrained `generateContent` call per document.

use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use super::error::AiError;
use super::gemini::{GeminiClient, Part};
use crate::documents::DataUri;
use crate::types::lenient_opt_bool;

const EXTRACTION_PROMPT: &str = "\
Eres un asistente especializado en facturas de productos farmacéuticos y dispositivos médicos.
Lee el documento adjunto y devuelve cada factura que encuentres en `invoices`.
Si una misma factura continúa en varias páginas, repite su número de factura en cada fragmento.

Para cada factura extrae:
- proveedor, numeroDeFactura y fechaDeEmision (YYYY-MM-DD).
- productos: una entrada por línea de producto con nombreDelProductoFarmaceutico,
  nombreDelDispositivoMedico (si aplica), formaFarmaceutica, numeroDeLote, concentracion,
  presentacion, fechaDeVencimiento (YYYY-MM-DD), registroSanitario (si aparece),
  cantidadRecibida, envaseInmediato y envaseMediato (true si el documento los marca como conformes),
  condicionesDeAlmacenamiento y observaciones (si aparecen).

No inventes valores: deja vacío lo que no figure en el documento.";

/// Product line as the model returns it, before defaulting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProductFragment {
    #[serde(rename = "nombreDelProductoFarmaceutico", default, deserialize_with = "lenient_string")]
    pub product_name: String,
    #[serde(rename = "nombreDelDispositivoMedico", default, deserialize_with = "lenient_opt_string")]
    pub medical_device_name: Option<String>,
    #[serde(rename = "formaFarmaceutica", default, deserialize_with = "lenient_string")]
    pub pharmaceutical_form: String,
    #[serde(rename = "numeroDeLote", default, deserialize_with = "lenient_string")]
    pub lot_number: String,
    #[serde(rename = "concentracion", default, deserialize_with = "lenient_string")]
    pub concentration: String,
    #[serde(rename = "presentacion", default, deserialize_with = "lenient_string")]
    pub presentation: String,
    #[serde(rename = "fechaDeVencimiento", default, deserialize_with = "lenient_string")]
    pub expiration_date: String,
    #[serde(rename = "registroSanitario", default, deserialize_with = "lenient_opt_string")]
    pub registration_number: Option<String>,
    #[serde(rename = "cantidadRecibida", default, deserialize_with = "lenient_string")]
    pub quantity_received: String,
    #[serde(rename = "envaseInmediato", default, deserialize_with = "lenient_opt_bool")]
    pub immediate_packaging: Option<bool>,
    #[serde(rename = "envaseMediato", default, deserialize_with = "lenient_opt_bool")]
    pub mediate_packaging: Option<bool>,
    #[serde(rename = "condicionesDeAlmacenamiento", default, deserialize_with = "lenient_opt_string")]
    pub storage_conditions: Option<String>,
    #[serde(rename = "observaciones", default, deserialize_with = "lenient_opt_string")]
    pub observations: Option<String>,
}

/// One invoice (or one page-range of an invoice) found in the document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InvoiceFragment {
    #[serde(rename = "proveedor", default, deserialize_with = "lenient_string")]
    pub supplier: String,
    #[serde(rename = "numeroDeFactura", default, deserialize_with = "lenient_string")]
    pub invoice_number: String,
    #[serde(rename = "fechaDeEmision", default, deserialize_with = "lenient_string")]
    pub issue_date: String,
    #[serde(rename = "productos", default, deserialize_with = "null_as_empty")]
    pub products: Vec<ProductFragment>,
}

#[derive(Debug, Deserialize)]
struct ExtractionOutput {
    #[serde(default, deserialize_with = "null_as_empty")]
    invoices: Vec<InvoiceFragment>,
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// The model occasionally emits numbers (`cantidadRecibida: 10`) or nulls for string fields.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(scalar_to_string).unwrap_or_default())
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(scalar_to_string))
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// `responseSchema` for the extraction call (OpenAPI subset understood by Gemini).
pub fn extraction_schema() -> Value {
    let string = json!({"type": "STRING"});
    let boolean = json!({"type": "BOOLEAN"});
    json!({
        "type": "OBJECT",
        "properties": {
            "invoices": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "proveedor": string,
                        "numeroDeFactura": string,
                        "fechaDeEmision": string,
                        "productos": {
                            "type": "ARRAY",
                            "items": {
                                "type": "OBJECT",
                                "properties": {
                                    "nombreDelProductoFarmaceutico": string,
                                    "nombreDelDispositivoMedico": string,
                                    "formaFarmaceutica": string,
                                    "numeroDeLote": string,
                                    "concentracion": string,
                                    "presentacion": string,
                                    "fechaDeVencimiento": string,
                                    "registroSanitario": string,
                                    "cantidadRecibida": string,
                                    "envaseInmediato": boolean,
                                    "envaseMediato": boolean,
                                    "condicionesDeAlmacenamiento": string,
                                    "observaciones": string
                                },
                                "required": [
                                    "nombreDelProductoFarmaceutico",
                                    "formaFarmaceutica",
                                    "numeroDeLote",
                                    "concentracion",
                                    "presentacion",
                                    "fechaDeVencimiento",
                                    "cantidadRecibida"
                                ]
                            }
                        }
                    },
                    "required": ["proveedor", "numeroDeFactura", "fechaDeEmision", "productos"]
                }
            }
        },
        "required": ["invoices"]
    })
}

/// Decode the model's JSON answer. Exposed for tests and offline replays.
pub fn parse_extraction(json_text: &str) -> Result<Vec<InvoiceFragment>, AiError> {
    let output: ExtractionOutput = serde_json::from_str(json_text)
        .map_err(|e| AiError::InvalidResponse(format!("extraction output: {}", e)))?;
    Ok(output.invoices)
}

/// Extract every invoice fragment in `document` using one client (one key).
pub async fn extract_invoice_data(
    client: &GeminiClient,
    document: DataUri<'_>,
) -> Result<Vec<InvoiceFragment>, AiError> {
    let parts = vec![
        Part::text(EXTRACTION_PROMPT),
        Part::inline(document.mime_type, document.data),
    ];
    let output: ExtractionOutput = client.generate_json(parts, extraction_schema()).await?;
    Ok(output.invoices)
}
